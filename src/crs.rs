use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;
use std::fmt;

use crate::error::Error;

/// A coordinate reference system identified by its EPSG code.
///
/// # Example
/// ```rust
/// # use municipal_tile_downloader::Crs;
/// let illinois_east: Crs = "EPSG:6455".parse().unwrap();
/// assert_eq!(illinois_east, Crs(6455));
/// assert_eq!(illinois_east.to_string(), "EPSG:6455");
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Crs(pub u32);

impl Crs {
    /// WGS84 longitude / latitude.
    pub const WGS84: Crs = Crs(4326);

    /// The EPSG code as used by the ArcGIS `bboxSR` / `imageSR` parameters.
    pub fn code(self) -> u32 {
        self.0
    }

    /// Whether coordinates in this CRS are longitude / latitude in degrees.
    pub fn is_geographic(self) -> bool {
        definition(self).map_or(false, |(_, geographic)| geographic)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl std::str::FromStr for Crs {
    type Err = Error;

    /// Accepts `EPSG:6455`, `6455`, OGC URNs such as
    /// `urn:ogc:def:crs:EPSG::6455` and the CRS84 URN.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_ascii_lowercase();

        if lower == "urn:ogc:def:crs:ogc:1.3:crs84" || lower == "crs84" {
            return Ok(Crs::WGS84);
        }

        let code = if lower.starts_with("urn:ogc:def:crs:epsg:") {
            s.rsplit(':').next().unwrap_or_default()
        } else if lower.starts_with("epsg:") {
            &s[5..]
        } else {
            s
        };

        code.trim()
            .parse::<u32>()
            .map(Crs)
            .map_err(|_| Error::InvalidParameter(format!("`{}` is not a CRS identifier", s)))
    }
}

/// PROJ definitions of the coordinate systems we know how to transform
/// between, and whether each one is geographic.
fn definition(crs: Crs) -> Option<(&'static str, bool)> {
    let def = match crs.0 {
        4326 => ("+proj=longlat +datum=WGS84 +no_defs", true),
        4269 => (
            "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs",
            true,
        ),
        3857 => (
            "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs",
            false,
        ),
        // NAD83 / Illinois East (ftUS)
        3435 => (
            "+proj=tmerc +lat_0=36.66666666666666 +lon_0=-88.33333333333333 +k=0.999975 +x_0=300000 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=us-ft +no_defs",
            false,
        ),
        // NAD83(2011) / Illinois East
        6454 => (
            "+proj=tmerc +lat_0=36.66666666666666 +lon_0=-88.33333333333333 +k=0.999975 +x_0=300000 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            false,
        ),
        // NAD83(2011) / Illinois East (ftUS)
        6455 => (
            "+proj=tmerc +lat_0=36.66666666666666 +lon_0=-88.33333333333333 +k=0.999975 +x_0=300000 +y_0=0 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=us-ft +no_defs",
            false,
        ),
        // NAD83 / UTM zone 16N
        26916 => (
            "+proj=utm +zone=16 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            false,
        ),
        _ => return None,
    };

    Some(def)
}

struct Projection {
    crs: Crs,
    proj: Proj,
    geographic: bool,
}

impl Projection {
    fn new(crs: Crs) -> Result<Self, Error> {
        let (def, geographic) = definition(crs).ok_or(Error::UnsupportedCrs(crs))?;
        let proj = Proj::from_proj_string(def).map_err(|e| Error::Reprojection {
            from: crs,
            to: crs,
            reason: format!("invalid projection definition: {:?}", e),
        })?;

        Ok(Self {
            crs,
            proj,
            geographic,
        })
    }
}

/// Transforms coordinates between two coordinate reference systems.
///
/// Geographic systems take and produce degrees in (longitude, latitude)
/// order, projected systems their native linear unit.
pub struct Reprojector {
    from: Crs,
    to: Crs,
    projections: Option<(Projection, Projection)>,
}

impl fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reprojector")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl Reprojector {
    pub fn new(from: Crs, to: Crs) -> Result<Self, Error> {
        if from == to {
            return Ok(Self {
                from,
                to,
                projections: None,
            });
        }

        Ok(Self {
            from,
            to,
            projections: Some((Projection::new(from)?, Projection::new(to)?)),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.projections.is_none()
    }

    pub fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>, Error> {
        let (source, target) = match &self.projections {
            Some(pair) => pair,
            None => return Ok(coord),
        };

        let mut point = if source.geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };

        transform(&source.proj, &target.proj, &mut point).map_err(|e| {
            Error::Reprojection {
                from: source.crs,
                to: target.crs,
                reason: format!("{:?}", e),
            }
        })?;

        let (x, y) = if target.geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };

        if !x.is_finite() || !y.is_finite() {
            return Err(Error::Reprojection {
                from: self.from,
                to: self.to,
                reason: format!("({}, {}) has no finite image", coord.x, coord.y),
            });
        }

        Ok(Coord { x, y })
    }

    pub fn reproject(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, Error> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }

        geometry.try_map_coords(|coord| self.transform(coord))
    }
}

/// Reprojects `geometry` from `from` into `to`.
pub fn reproject(
    geometry: &MultiPolygon<f64>,
    from: Crs,
    to: Crs,
) -> Result<MultiPolygon<f64>, Error> {
    Reprojector::new(from, to)?.reproject(geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon};

    #[test]
    fn parses_crs_spellings() {
        assert_eq!("EPSG:6455".parse::<Crs>().unwrap(), Crs(6455));
        assert_eq!("epsg:3435".parse::<Crs>().unwrap(), Crs(3435));
        assert_eq!(" 4326 ".parse::<Crs>().unwrap(), Crs(4326));
        assert_eq!(
            "urn:ogc:def:crs:EPSG::6455".parse::<Crs>().unwrap(),
            Crs(6455)
        );
        assert_eq!(
            "urn:ogc:def:crs:OGC:1.3:CRS84".parse::<Crs>().unwrap(),
            Crs::WGS84
        );
        assert!("EPSG:".parse::<Crs>().is_err());
        assert!("Palatine".parse::<Crs>().is_err());
    }

    #[test]
    fn unknown_crs_is_unsupported() {
        match Reprojector::new(Crs(4326), Crs(1)) {
            Err(Error::UnsupportedCrs(crs)) => assert_eq!(crs, Crs(1)),
            other => panic!("expected UnsupportedCrs, got {:?}", other),
        }
    }

    #[test]
    fn same_crs_is_identity() {
        let reprojector = Reprojector::new(Crs(6455), Crs(6455)).unwrap();
        assert!(reprojector.is_identity());

        let c = coord! { x: 1_090_123.456789, y: 1_981_234.987654 };
        assert_eq!(reprojector.transform(c).unwrap(), c);
    }

    #[test]
    fn web_mercator_origin() {
        let reprojector = Reprojector::new(Crs::WGS84, Crs(3857)).unwrap();
        let out = reprojector.transform(coord! { x: 0.0, y: 0.0 }).unwrap();
        assert!(out.x.abs() < 1e-6 && out.y.abs() < 1e-6, "{:?}", out);

        let out = reprojector.transform(coord! { x: 180.0, y: 0.0 }).unwrap();
        assert!((out.x - 20_037_508.342789244).abs() < 1e-3, "{:?}", out);
    }

    #[test]
    fn illinois_east_round_trip() {
        let palatine = coord! { x: -88.0342, y: 42.1103 };

        let forward = Reprojector::new(Crs::WGS84, Crs(6455)).unwrap();
        let projected = forward.transform(palatine).unwrap();

        // Cook County lies roughly within x 0.99e6..1.22e6, y 1.74e6..2.01e6 ftUS
        assert!((950_000.0..1_250_000.0).contains(&projected.x), "{:?}", projected);
        assert!((1_700_000.0..2_050_000.0).contains(&projected.y), "{:?}", projected);

        let back = Reprojector::new(Crs(6455), Crs::WGS84)
            .unwrap()
            .transform(projected)
            .unwrap();
        assert!((back.x - palatine.x).abs() < 1e-7, "{:?}", back);
        assert!((back.y - palatine.y).abs() < 1e-7, "{:?}", back);
    }

    #[test]
    fn reprojects_every_vertex() {
        let square: MultiPolygon<f64> = polygon![
            (x: -88.1, y: 42.0),
            (x: -88.0, y: 42.0),
            (x: -88.0, y: 42.1),
            (x: -88.1, y: 42.1),
        ]
        .into();

        let projected = reproject(&square, Crs::WGS84, Crs(6454)).unwrap();
        let exterior = projected.0[0].exterior();
        assert_eq!(exterior.0.len(), square.0[0].exterior().0.len());

        // metres; 0.1° of longitude at 42°N is a little over 8 km
        let width = exterior.0[1].x - exterior.0[0].x;
        assert!((8_000.0..8_500.0).contains(&width), "{}", width);
    }
}
