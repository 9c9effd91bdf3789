//! Splitting a region's bounding box into request-sized tiles.
//!
//! Two strategies are supported. [`PartitionMode::EdgeLength`] walks the
//! bounding box in fixed-size steps and keeps every cell, truncating the
//! last row and column. [`PartitionMode::TileCount`] cuts a regular
//! `n` × `n` grid and clips each cell to the region, dropping cells that
//! miss it.

use geo::{Area, BooleanOps, MultiPolygon};
use std::fmt;
use tracing::debug;

use crate::bounding_box::BoundingBox;
use crate::crs::Crs;
use crate::error::Error;
use crate::tile::TileSpec;

/// Default tile edge: one mile in US survey feet.
pub const DEFAULT_EDGE_LENGTH: f64 = 5280.0;

/// Default pixel size of a full tile's longer side.
pub const DEFAULT_TILE_PIXELS: u32 = 1024;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PartitionMode {
    /// Cells of at most this edge length, in CRS units. Not clipped.
    EdgeLength(f64),
    /// A regular grid of this many cells per axis, clipped to the region.
    TileCount(u32),
}

impl Default for PartitionMode {
    fn default() -> Self {
        PartitionMode::EdgeLength(DEFAULT_EDGE_LENGTH)
    }
}

impl fmt::Display for PartitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionMode::EdgeLength(edge) => write!(f, "tiles of at most {} units", edge),
            PartitionMode::TileCount(n) => write!(f, "{0}x{0} grid clipped to region", n),
        }
    }
}

/// Partition parameters shared by every tile of one run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Partition {
    pub mode: PartitionMode,
    /// Pixel size of a full-size tile's side.
    pub tile_pixels: u32,
    /// CRS the bounding box and geometry are expressed in.
    pub crs: Crs,
}

impl Partition {
    pub fn new(mode: PartitionMode, crs: Crs) -> Self {
        Self {
            mode,
            tile_pixels: DEFAULT_TILE_PIXELS,
            crs,
        }
    }

    pub fn with_tile_pixels(mut self, tile_pixels: u32) -> Self {
        self.tile_pixels = tile_pixels;
        self
    }

    /// Checks the parameters without partitioning anything.
    pub fn validate(&self) -> Result<(), Error> {
        match self.mode {
            PartitionMode::EdgeLength(edge) if !(edge > 0.0) => {
                return Err(Error::InvalidParameter(format!(
                    "tile edge length must be positive, got {}",
                    edge
                )));
            }
            PartitionMode::TileCount(0) => {
                return Err(Error::InvalidParameter(
                    "tile count per axis must be positive, got 0".to_owned(),
                ));
            }
            _ => {}
        }

        if self.tile_pixels == 0 {
            return Err(Error::InvalidParameter(
                "tile pixel size must be positive, got 0".to_owned(),
            ));
        }

        Ok(())
    }

    /// Computes the tiles covering `bbox`, in column-major order with the
    /// outer loop over X.
    ///
    /// Returns an empty sequence for a degenerate bounding box and
    /// [`Error::InvalidParameter`] for a non-positive edge length, tile
    /// count or pixel size.
    ///
    /// # Example
    /// ```rust
    /// # use municipal_tile_downloader::{BoundingBox, Crs, Partition, PartitionMode};
    /// # use geo::MultiPolygon;
    /// let bbox = BoundingBox::new(0.0, 0.0, 1000.0, 1000.0);
    /// let partition = Partition::new(PartitionMode::EdgeLength(600.0), Crs(6455));
    /// let tiles = partition.tiles(&bbox, &MultiPolygon::new(vec![])).unwrap();
    /// assert_eq!(tiles.len(), 4);
    /// ```
    pub fn tiles(
        &self,
        bbox: &BoundingBox,
        geometry: &MultiPolygon<f64>,
    ) -> Result<Vec<TileSpec>, Error> {
        self.validate()?;

        if bbox.is_degenerate() {
            debug!(?bbox, "degenerate bounding box, nothing to partition");
            return Ok(Vec::new());
        }

        let tiles = match self.mode {
            PartitionMode::EdgeLength(edge) => {
                let scale = self.tile_pixels as f64 / edge;

                bbox.edge_cells(edge)
                    .enumerate()
                    .map(|(index, cell)| {
                        TileSpec::new(index, cell, self.crs, scale, self.tile_pixels)
                    })
                    .collect()
            }
            PartitionMode::TileCount(count) => {
                let cell_edge = (bbox.width() / count as f64).max(bbox.height() / count as f64);
                let scale = self.tile_pixels as f64 / cell_edge;

                bbox.grid_cells(count)
                    .filter_map(|cell| clip(&cell, geometry))
                    .enumerate()
                    .map(|(index, clipped)| {
                        TileSpec::new(index, clipped, self.crs, scale, self.tile_pixels)
                    })
                    .collect()
            }
        };

        Ok(tiles)
    }
}

/// The bounding box of `cell ∩ geometry`, or `None` if the two only touch
/// or miss each other entirely.
fn clip(cell: &BoundingBox, geometry: &MultiPolygon<f64>) -> Option<BoundingBox> {
    if geometry.0.is_empty() {
        return None;
    }

    let cell_polygon = MultiPolygon::new(vec![cell.to_polygon()]);
    let intersection = cell_polygon.intersection(geometry);

    if intersection.0.is_empty() || intersection.unsigned_area() <= 0.0 {
        return None;
    }

    BoundingBox::of(&intersection).filter(|clipped| !clipped.is_degenerate())
}

/// Partitions `bbox` with the given mode at the default pixel size.
pub fn partition(
    bbox: &BoundingBox,
    geometry: &MultiPolygon<f64>,
    mode: PartitionMode,
    crs: Crs,
) -> Result<Vec<TileSpec>, Error> {
    Partition::new(mode, crs).tiles(bbox, geometry)
}
