//! Municipality boundaries and their lookup by name.

use geo::{MapCoords, MultiPolygon};
use geojson::{Feature, FeatureCollection, GeoJson};
use serde_json::json;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

use crate::bounding_box::BoundingBox;
use crate::crs::{Crs, Reprojector};
use crate::error::Error;

/// Property holding the municipality name in Cook County's boundary file.
pub const DEFAULT_NAME_FIELD: &str = "MUNICIPALITY";

/// A named area of interest with its boundary.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl Region {
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        BoundingBox::of(&self.geometry)
    }

    /// This region with its geometry expressed in `crs`.
    pub fn reproject(self, crs: Crs) -> Result<Region, Error> {
        if self.crs == crs {
            return Ok(self);
        }

        let geometry = Reprojector::new(self.crs, crs)?.reproject(&self.geometry)?;

        Ok(Region {
            name: self.name,
            geometry,
            crs,
        })
    }
}

/// A collection of region boundaries.
///
/// Sources are read synchronously; async callers move them onto the
/// blocking pool, as [`run`](crate::run) does.
pub trait BoundarySource {
    /// Every region in the source, in source order.
    fn load_all(&self) -> Result<Vec<Region>, Error>;

    /// Reprojects the entire source into `crs` in place.
    ///
    /// Returns `false` without touching anything if the source already is in
    /// `crs`.
    fn rewrite_crs(&mut self, crs: Crs) -> Result<bool, Error>;
}

/// Regions held in memory.
impl BoundarySource for Vec<Region> {
    fn load_all(&self) -> Result<Vec<Region>, Error> {
        Ok(self.clone())
    }

    fn rewrite_crs(&mut self, crs: Crs) -> Result<bool, Error> {
        if self.iter().all(|region| region.crs == crs) {
            return Ok(false);
        }

        for region in self.iter_mut() {
            *region = region.clone().reproject(crs)?;
        }

        Ok(true)
    }
}

/// Looks up `name` in `source` and returns its boundary in `target`.
///
/// The name must match the stored attribute exactly; no case folding is
/// applied. The first matching record wins.
pub fn resolve<S>(name: &str, source: &S, target: Crs) -> Result<Region, Error>
where
    S: BoundarySource + ?Sized,
{
    if name.is_empty() {
        return Err(Error::InvalidParameter(
            "region name must not be empty".to_owned(),
        ));
    }

    let region = source
        .load_all()?
        .into_iter()
        .find(|region| region.name == name)
        .ok_or_else(|| Error::RegionNotFound {
            name: name.to_owned(),
        })?;

    info!(region = %region.name, crs = %region.crs, "found boundary");

    if region.crs != target {
        debug!(from = %region.crs, to = %target, "reprojecting boundary");
    }

    region.reproject(target)
}

/// A GeoJSON feature collection with one feature per region.
///
/// The CRS is read from the collection's legacy `crs` member and defaults to
/// WGS84 when absent.
#[derive(Clone, Debug)]
pub struct GeoJsonBoundary {
    path: PathBuf,
    name_field: String,
}

impl GeoJsonBoundary {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            name_field: DEFAULT_NAME_FIELD.to_owned(),
        }
    }

    pub fn with_name_field<S: Into<String>>(mut self, name_field: S) -> Self {
        self.name_field = name_field.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse_error<R: ToString>(&self, reason: R) -> Error {
        Error::BoundaryParse {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }

    fn read(&self) -> Result<FeatureCollection, Error> {
        let text = fs::read_to_string(&self.path).map_err(|source| Error::BoundaryRead {
            path: self.path.clone(),
            source,
        })?;

        match text.parse::<GeoJson>().map_err(|e| self.parse_error(e))? {
            GeoJson::FeatureCollection(collection) => Ok(collection),
            GeoJson::Feature(feature) => Ok(FeatureCollection {
                bbox: None,
                features: vec![feature],
                foreign_members: None,
            }),
            GeoJson::Geometry(_) => Err(self.parse_error("expected features, found a bare geometry")),
        }
    }

    fn crs_of(&self, collection: &FeatureCollection) -> Result<Crs, Error> {
        let name = collection
            .foreign_members
            .as_ref()
            .and_then(|members| members.get("crs"))
            .and_then(|crs| crs.pointer("/properties/name"));

        match name {
            None => Ok(Crs::WGS84),
            Some(name) => name
                .as_str()
                .ok_or_else(|| self.parse_error("crs name is not a string"))?
                .parse()
                .map_err(|e| self.parse_error(e)),
        }
    }

    fn region_of(&self, feature: &Feature, crs: Crs) -> Option<Region> {
        let name = feature
            .property(&self.name_field)
            .and_then(|value| value.as_str());

        let name = match name {
            Some(name) => name.to_owned(),
            None => {
                warn!(field = %self.name_field, "skipping feature without a name");
                return None;
            }
        };

        let geometry = feature
            .geometry
            .as_ref()
            .and_then(|g| geo::Geometry::<f64>::try_from(g.value.clone()).ok());

        let geometry = match geometry {
            Some(geo::Geometry::Polygon(polygon)) => MultiPolygon::from(polygon),
            Some(geo::Geometry::MultiPolygon(multi)) => multi,
            _ => {
                warn!(%name, "skipping feature without an areal geometry");
                return None;
            }
        };

        Some(Region {
            name,
            geometry,
            crs,
        })
    }
}

impl BoundarySource for GeoJsonBoundary {
    fn load_all(&self) -> Result<Vec<Region>, Error> {
        let collection = self.read()?;
        let crs = self.crs_of(&collection)?;

        debug!(
            path = %self.path.display(),
            features = collection.features.len(),
            %crs,
            "loaded boundary file"
        );

        Ok(collection
            .features
            .iter()
            .filter_map(|feature| self.region_of(feature, crs))
            .collect())
    }

    fn rewrite_crs(&mut self, crs: Crs) -> Result<bool, Error> {
        let mut collection = self.read()?;
        let current = self.crs_of(&collection)?;

        if current == crs {
            info!(%crs, "boundary file already in target CRS, not reprojecting");
            return Ok(false);
        }

        info!(from = %current, to = %crs, path = %self.path.display(), "reprojecting boundary file");

        let reprojector = Reprojector::new(current, crs)?;

        for feature in collection.features.iter_mut() {
            feature.bbox = None;

            let geometry = match feature.geometry.as_mut() {
                Some(geometry) => geometry,
                None => continue,
            };

            let shape = geo::Geometry::<f64>::try_from(geometry.value.clone())
                .map_err(|e| self.parse_error(e))?;
            let shape = shape.try_map_coords(|coord| reprojector.transform(coord))?;

            geometry.value = geojson::Value::from(&shape);
            geometry.bbox = None;
        }

        collection.bbox = None;
        collection.foreign_members.get_or_insert_with(Default::default).insert(
            "crs".to_owned(),
            json!({
                "type": "name",
                "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", crs.code()) },
            }),
        );

        fs::write(&self.path, GeoJson::FeatureCollection(collection).to_string()).map_err(
            |source| Error::BoundaryWrite {
                path: self.path.clone(),
                source,
            },
        )?;

        Ok(true)
    }
}
