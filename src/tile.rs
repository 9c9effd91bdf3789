use crate::bounding_box::BoundingBox;
use crate::crs::Crs;

/// One planned download: a rectangle in the target CRS, the pixel size to
/// render it at and its position in the partition order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileSpec {
    pub index: usize,
    pub bbox: BoundingBox,
    pub width: u32,
    pub height: u32,
    pub crs: Crs,
}

impl TileSpec {
    /// Creates a tile rendered at `pixels_per_unit`, so that tiles cut from
    /// the same partition share one ground resolution. Each side is clamped
    /// to `1..=max_pixels`.
    pub(crate) fn new(
        index: usize,
        bbox: BoundingBox,
        crs: Crs,
        pixels_per_unit: f64,
        max_pixels: u32,
    ) -> Self {
        let side = |extent: f64| {
            let px = (extent * pixels_per_unit).round();
            if px.is_finite() {
                (px as u32).clamp(1, max_pixels)
            } else {
                max_pixels
            }
        };

        Self {
            index,
            bbox,
            width: side(bbox.width()),
            height: side(bbox.height()),
            crs,
        }
    }

    /// The `size` request parameter, `width,height`.
    pub fn size(&self) -> String {
        format!("{},{}", self.width, self.height)
    }
}
