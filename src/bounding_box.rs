use geo::{BoundingRect, Coord, MultiPolygon, Polygon, Rect};
use std::fmt::{self, Debug};

/// An axis-aligned rectangle in the linear units of a single projected
/// coordinate reference system.
///
/// # Example
/// ```rust
/// # use municipal_tile_downloader::BoundingBox;
/// let palatine = BoundingBox::new(1_054_000.0, 1_960_000.0, 1_090_000.0, 1_995_000.0);
/// assert_eq!(palatine.width(), 36_000.0);
/// ```
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a new bounding box from its lower left and upper right corners.
    ///
    /// # Panics
    /// Panics if a minimum lies above its maximum or a coordinate is NaN.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        assert!(min_x <= max_x, "min_x must not exceed max_x");
        assert!(min_y <= max_y, "min_y must not exceed max_y");

        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The smallest bounding box containing `geometry`, or `None` if the
    /// geometry has no coordinates.
    pub fn of(geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry.bounding_rect().map(Self::from)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Whether the box has zero width or zero height.
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::from(*self).to_polygon()
    }

    /// Walks the box in steps of `edge`, column by column, yielding every
    /// cell. Cells in the last column and row are truncated at the box
    /// boundary.
    ///
    /// # Panics
    /// Panics unless `edge` is positive.
    pub fn edge_cells(&self, edge: f64) -> impl Iterator<Item = BoundingBox> + Debug {
        assert!(edge > 0.0);

        let b = *self;

        steps(b.min_x, b.max_x, edge).flat_map(move |(x0, x1)| {
            steps(b.min_y, b.max_y, edge).map(move |(y0, y1)| BoundingBox::new(x0, y0, x1, y1))
        })
    }

    /// Splits the box into a regular `count` × `count` grid, column by
    /// column. The last column and row end exactly on the box boundary.
    ///
    /// # Panics
    /// Panics if `count` is zero.
    pub fn grid_cells(&self, count: u32) -> impl Iterator<Item = BoundingBox> + Debug {
        assert!(count >= 1);

        let b = *self;

        (0..count).flat_map(move |i| {
            let (x0, x1) = split(b.min_x, b.max_x, count, i);

            (0..count).map(move |j| {
                let (y0, y1) = split(b.min_y, b.max_y, count, j);
                BoundingBox::new(x0, y0, x1, y1)
            })
        })
    }
}

/// `(start, end)` of every step below `max`, with `start = min + i * edge`.
/// A step ends exactly where the next one starts, or at `max`.
fn steps(min: f64, max: f64, edge: f64) -> impl Iterator<Item = (f64, f64)> + Debug {
    let at = move |i: u64| min + i as f64 * edge;

    (0u64..)
        .map(move |i| (at(i), at(i + 1).min(max)))
        .take_while(move |(start, _)| *start < max)
}

fn split(min: f64, max: f64, count: u32, i: u32) -> (f64, f64) {
    let size = (max - min) / count as f64;
    let start = min + i as f64 * size;
    let end = if i + 1 == count {
        max
    } else {
        min + (i + 1) as f64 * size
    };

    (start, end)
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        let (min, max) = (rect.min(), rect.max());
        BoundingBox::new(min.x, min.y, max.x, max.y)
    }
}

impl From<BoundingBox> for Rect<f64> {
    fn from(b: BoundingBox) -> Self {
        Rect::new(
            Coord {
                x: b.min_x,
                y: b.min_y,
            },
            Coord {
                x: b.max_x,
                y: b.max_y,
            },
        )
    }
}

impl fmt::Display for BoundingBox {
    /// Formats as `min_x,min_y,max_x,max_y`, the order ArcGIS expects,
    /// using the shortest representation that parses back to the same `f64`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.min_x, self.min_y, self.max_x, self.max_y)
    }
}

impl std::str::FromStr for BoundingBox {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("invalid bounding box `{}`: {}", s, e))?;

        match parts[..] {
            [min_x, min_y, max_x, max_y] if min_x <= max_x && min_y <= max_y => {
                Ok(BoundingBox::new(min_x, min_y, max_x, max_y))
            }
            _ => Err(format!("invalid bounding box `{}`", s)),
        }
    }
}
