use anyhow::{bail, Context, Result};
use std::{fmt::Write as _, fs, io, path::Path, path::PathBuf, time::Duration};
use tracing::{info, warn};

use crate::crs::Crs;
use crate::naming::DEFAULT_NAMING;
use crate::partition::{Partition, PartitionMode, DEFAULT_TILE_PIXELS};
use crate::region::DEFAULT_NAME_FIELD;
use crate::request::{RenderingOptions, DEFAULT_SERVICE_URL};

/// Tile download configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Name of the municipality, exactly as stored in the boundary file.
    pub municipality: String,

    /// GeoJSON file with one feature per municipality.
    pub boundary_file: PathBuf,

    /// Feature property holding the municipality name.
    pub name_field: String,

    /// Projected CRS the boundary is partitioned and requested in.
    pub target_crs: Crs,

    /// CRS of the returned images (`imageSR`).
    pub image_crs: Crs,

    /// The image service's `exportImage` endpoint.
    pub url: String,

    /// How the municipality's bounding box is split into tiles.
    pub mode: PartitionMode,

    /// Pixel size of a full tile's side.
    pub tile_pixels: u32,

    /// The folder to output the tiles to.
    pub output_folder: PathBuf,

    /// File name template, see [`NamingPolicy`](crate::NamingPolicy).
    pub naming: String,

    /// Image format requested from the service.
    pub format: String,

    /// Timeout for fetching a single tile.
    ///
    /// Pass the zero duration to disable the timeout.
    pub timeout: Duration,

    /// Whether to rewrite the boundary file in the target CRS before
    /// looking up the municipality.
    pub reproject_source: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            municipality: "Palatine".to_owned(),
            boundary_file: PathBuf::from("Municipality.geojson"),
            name_field: DEFAULT_NAME_FIELD.to_owned(),
            target_crs: Crs(6455),
            image_crs: Crs(6455),
            url: DEFAULT_SERVICE_URL.to_owned(),
            mode: PartitionMode::default(),
            tile_pixels: DEFAULT_TILE_PIXELS,
            output_folder: PathBuf::from("tiles"),
            naming: DEFAULT_NAMING.to_owned(),
            format: "png".to_owned(),
            timeout: Duration::from_secs(30),
            reproject_source: true,
        }
    }
}

const MUNICIPALITY_KEY: &str = "Municipality";
const BBOX_SIZE_KEY: &str = "BBox Size";
const TILE_COUNT_KEY: &str = "Tile Count";
const SETTINGS_FILE_KEY: &str = "Settings File";
const GEOJSON_FILE_KEY: &str = "GeoJSON File";
const NAME_FIELD_KEY: &str = "Name Field";
const CRS_KEY: &str = "CRS";
const IMAGE_CRS_KEY: &str = "Image CRS";
const URL_KEY: &str = "URL";
const OUTPUT_FOLDER_KEY: &str = "Output Folder";
const TILE_PIXELS_KEY: &str = "Tile Pixels";
const FORMAT_KEY: &str = "Format";
const NAMING_KEY: &str = "Naming";
const TIMEOUT_KEY: &str = "Timeout";
const REPROJECT_SOURCE_KEY: &str = "Reproject Source";

impl Config {
    pub fn partition(&self) -> Partition {
        Partition::new(self.mode, self.target_crs).with_tile_pixels(self.tile_pixels)
    }

    pub fn rendering_options(&self) -> RenderingOptions {
        let mut options = RenderingOptions::new(self.url.clone(), self.image_crs);
        options.format = self.format.clone();
        options
    }

    /// Reads a settings file of `Key: value` lines on top of the defaults.
    ///
    /// A missing file yields the defaults. Reads synchronously; settings are
    /// loaded once, before any download starts.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text)
                .with_context(|| format!("failed reading settings file {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "settings file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed opening {}", path.display())),
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut cfg = Self::default();
        let mut bbox_size = None;
        let mut tile_count = None;

        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = match line.split_once(": ") {
                Some((key, value)) => (key.trim(), value.trim()),
                None => match line.strip_suffix(':') {
                    Some(key) => (key.trim(), ""),
                    None => bail!("line {}: expected `Key: value`, got `{}`", i + 1, line),
                },
            };

            let invalid = || format!("line {}: invalid value `{}` for {}", i + 1, value, key);

            match key {
                MUNICIPALITY_KEY => cfg.municipality = value.to_owned(),
                BBOX_SIZE_KEY => bbox_size = Some(value.parse::<f64>().with_context(invalid)?),
                TILE_COUNT_KEY => tile_count = Some(value.parse::<u32>().with_context(invalid)?),
                SETTINGS_FILE_KEY => {}
                GEOJSON_FILE_KEY => cfg.boundary_file = PathBuf::from(value),
                NAME_FIELD_KEY => cfg.name_field = value.to_owned(),
                CRS_KEY => cfg.target_crs = value.parse().with_context(invalid)?,
                IMAGE_CRS_KEY => cfg.image_crs = value.parse().with_context(invalid)?,
                URL_KEY => cfg.url = value.to_owned(),
                OUTPUT_FOLDER_KEY => cfg.output_folder = PathBuf::from(value),
                TILE_PIXELS_KEY => cfg.tile_pixels = value.parse().with_context(invalid)?,
                FORMAT_KEY => cfg.format = value.to_owned(),
                NAMING_KEY => cfg.naming = value.to_owned(),
                TIMEOUT_KEY => {
                    cfg.timeout = Duration::from_secs(value.parse().with_context(invalid)?)
                }
                REPROJECT_SOURCE_KEY => {
                    cfg.reproject_source = value.parse().with_context(invalid)?
                }
                other => warn!(key = other, line = i + 1, "ignoring unknown setting"),
            }
        }

        cfg.mode = match (tile_count, bbox_size) {
            (Some(count), _) => PartitionMode::TileCount(count),
            (None, Some(edge)) => PartitionMode::EdgeLength(edge),
            (None, None) => cfg.mode,
        };

        Ok(cfg)
    }

    /// Renders the configuration in the settings file format.
    pub fn to_settings(&self) -> String {
        let mut out = String::new();
        let mut line = |key: &str, value: &dyn std::fmt::Display| {
            // writing to a String cannot fail
            let _ = writeln!(out, "{}: {}", key, value);
        };

        line(MUNICIPALITY_KEY, &self.municipality);
        match self.mode {
            PartitionMode::EdgeLength(edge) => line(BBOX_SIZE_KEY, &edge),
            PartitionMode::TileCount(count) => line(TILE_COUNT_KEY, &count),
        }
        line(GEOJSON_FILE_KEY, &self.boundary_file.display());
        line(NAME_FIELD_KEY, &self.name_field);
        line(CRS_KEY, &self.target_crs);
        line(IMAGE_CRS_KEY, &self.image_crs);
        line(URL_KEY, &self.url);
        line(OUTPUT_FOLDER_KEY, &self.output_folder.display());
        line(TILE_PIXELS_KEY, &self.tile_pixels);
        line(FORMAT_KEY, &self.format);
        line(NAMING_KEY, &self.naming);
        line(TIMEOUT_KEY, &self.timeout.as_secs());
        line(REPROJECT_SOURCE_KEY, &self.reproject_source);

        out
    }

    /// Writes the configuration to a settings file, replacing it.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_settings())
            .with_context(|| format!("failed writing settings file {}", path.display()))?;

        info!(path = %path.display(), "saved settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path().join("settings")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.mode, PartitionMode::EdgeLength(5280.0));
    }

    #[test]
    fn reads_legacy_settings() {
        let cfg = Config::parse(
            "Municipality: Arlington Heights\n\
             BBox Size: 2640\n\
             Settings File: settings\n\
             GeoJSON File: data/Municipality.geojson\n\
             CRS: EPSG:3435\n\
             URL: https://example.com/ImageServer/exportImage\n",
        )
        .unwrap();

        assert_eq!(cfg.municipality, "Arlington Heights");
        assert_eq!(cfg.mode, PartitionMode::EdgeLength(2640.0));
        assert_eq!(cfg.boundary_file, PathBuf::from("data/Municipality.geojson"));
        assert_eq!(cfg.target_crs, Crs(3435));
        assert_eq!(cfg.url, "https://example.com/ImageServer/exportImage");
        // untouched keys keep their defaults
        assert_eq!(cfg.image_crs, Crs(6455));
        assert_eq!(cfg.tile_pixels, 1024);
    }

    #[test]
    fn tile_count_selects_grid_mode() {
        let cfg = Config::parse("BBox Size: 1000\nTile Count: 4\n").unwrap();
        assert_eq!(cfg.mode, PartitionMode::TileCount(4));
    }

    #[test]
    fn rejects_malformed_lines() {
        let err = Config::parse("Municipality: Palatine\nBBox Size: one mile\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"), "{:#}", err);

        let err = Config::parse("Municipality Palatine\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"), "{:#}", err);

        assert!(Config::parse("CRS: Illinois\n").is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let cfg = Config::parse("Favourite Colour: green\nMunicipality: Inverness\n").unwrap();
        assert_eq!(cfg.municipality, "Inverness");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings");

        let cfg = Config {
            municipality: "Rolling Meadows".to_owned(),
            mode: PartitionMode::TileCount(3),
            image_crs: Crs(3857),
            timeout: Duration::from_secs(0),
            reproject_source: false,
            naming: "{region}/{index}.{ext}".to_owned(),
            ..Config::default()
        };
        cfg.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Municipality: Rolling Meadows\nTile Count: 3\n"), "{}", text);
        assert!(text.contains("CRS: EPSG:6455\n"), "{}", text);

        assert_eq!(Config::load(&path).unwrap(), cfg);
    }

    #[test]
    fn fractional_edge_survives_save() {
        let cfg = Config {
            mode: PartitionMode::EdgeLength(1609.344),
            ..Config::default()
        };
        assert_eq!(Config::parse(&cfg.to_settings()).unwrap(), cfg);
    }
}
