use anyhow::{Context, Result};
use clap::{
    app_from_crate, crate_authors, crate_description, crate_name, crate_version,
    Arg, ArgMatches,
};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::validators::*;
use municipal_tile_downloader::{Config, Crs, PartitionMode};

const SETTINGS_ARG: &str = "settings";
const MUNICIPALITY_ARG: &str = "municipality";
const BOUNDARY_ARG: &str = "boundary";
const NAME_FIELD_ARG: &str = "name_field";
const CRS_ARG: &str = "crs";
const IMAGE_CRS_ARG: &str = "image_crs";
const URL_ARG: &str = "url";
const TILE_SIZE_ARG: &str = "tile_size";
const TILE_COUNT_ARG: &str = "tile_count";
const PIXELS_ARG: &str = "pixels";
const OUTPUT_DIR_ARG: &str = "output_dir";
const NAMING_ARG: &str = "naming";
const FORMAT_ARG: &str = "format";
const TIMEOUT_ARG: &str = "timeout";
const KEEP_SOURCE_ARG: &str = "keep_source";
const SAVE_ARG: &str = "save";
const DRY_RUN_ARG: &str = "dry_run";

pub struct Args {
    pub settings: PathBuf,
    pub municipality: Option<String>,
    pub boundary: Option<PathBuf>,
    pub name_field: Option<String>,
    pub crs: Option<Crs>,
    pub image_crs: Option<Crs>,
    pub url: Option<String>,
    pub mode: Option<PartitionMode>,
    pub pixels: Option<u32>,
    pub output_dir: Option<PathBuf>,
    pub naming: Option<String>,
    pub format: Option<String>,
    pub timeout: Option<Duration>,
    pub keep_source: bool,
    pub save: bool,
    pub dry_run: bool,
}

impl Args {
    pub fn parse() -> Result<Self> {
        let matches = get_matches();

        let mode = match (
            parsed::<f64>(&matches, TILE_SIZE_ARG)?,
            parsed::<u32>(&matches, TILE_COUNT_ARG)?,
        ) {
            (Some(edge), _) => Some(PartitionMode::EdgeLength(edge)),
            (None, Some(count)) => Some(PartitionMode::TileCount(count)),
            (None, None) => None,
        };

        Ok(Self {
            settings: PathBuf::from(matches.value_of(SETTINGS_ARG).unwrap_or("settings")),
            municipality: matches.value_of(MUNICIPALITY_ARG).map(str::to_owned),
            boundary: matches.value_of(BOUNDARY_ARG).map(PathBuf::from),
            name_field: matches.value_of(NAME_FIELD_ARG).map(str::to_owned),
            crs: parsed(&matches, CRS_ARG)?,
            image_crs: parsed(&matches, IMAGE_CRS_ARG)?,
            url: matches.value_of(URL_ARG).map(str::to_owned),
            mode,
            pixels: parsed(&matches, PIXELS_ARG)?,
            output_dir: matches.value_of(OUTPUT_DIR_ARG).map(PathBuf::from),
            naming: matches.value_of(NAMING_ARG).map(str::to_owned),
            format: matches.value_of(FORMAT_ARG).map(str::to_owned),
            timeout: parsed(&matches, TIMEOUT_ARG)?.map(Duration::from_secs),
            keep_source: matches.is_present(KEEP_SOURCE_ARG),
            save: matches.is_present(SAVE_ARG),
            dry_run: matches.is_present(DRY_RUN_ARG),
        })
    }

    /// Loads the settings file and applies the command line on top of it.
    /// The image CRS follows `--crs` unless given separately.
    pub fn config(&self) -> Result<Config> {
        let mut cfg = Config::load(&self.settings)?;

        if let Some(municipality) = &self.municipality {
            cfg.municipality = municipality.clone();
        }
        if let Some(boundary) = &self.boundary {
            cfg.boundary_file = boundary.clone();
        }
        if let Some(name_field) = &self.name_field {
            cfg.name_field = name_field.clone();
        }
        if let Some(crs) = self.crs {
            cfg.target_crs = crs;
            cfg.image_crs = crs;
        }
        if let Some(image_crs) = self.image_crs {
            cfg.image_crs = image_crs;
        }
        if let Some(url) = &self.url {
            cfg.url = url.clone();
        }
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(pixels) = self.pixels {
            cfg.tile_pixels = pixels;
        }
        if let Some(output_dir) = &self.output_dir {
            cfg.output_folder = output_dir.clone();
        }
        if let Some(naming) = &self.naming {
            cfg.naming = naming.clone();
        }
        if let Some(format) = &self.format {
            cfg.format = format.clone();
        }
        if let Some(timeout) = self.timeout {
            cfg.timeout = timeout;
        }
        if self.keep_source {
            cfg.reproject_source = false;
        }

        Ok(cfg)
    }
}

fn parsed<T>(matches: &ArgMatches<'static>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    matches
        .value_of(name)
        .map(|v| v.parse::<T>())
        .transpose()
        .with_context(|| format!("invalid value for --{}", name.replace('_', "-")))
}

fn get_matches() -> ArgMatches<'static> {
    app_from_crate!()
        .arg(
            Arg::with_name(SETTINGS_ARG)
                .help("Settings file (`Key: value` per line) providing the defaults for every other option")
                .default_value("settings")
                .takes_value(true)
                .long("settings"),
        )
        .arg(
            Arg::with_name(MUNICIPALITY_ARG)
                .help("Name of the municipality, exactly as spelled in the boundary file")
                .validator(is_non_empty)
                .takes_value(true)
                .short("m")
                .long("municipality"),
        )
        .arg(
            Arg::with_name(BOUNDARY_ARG)
                .help("GeoJSON file with one feature per municipality")
                .takes_value(true)
                .short("b")
                .long("boundary"),
        )
        .arg(
            Arg::with_name(NAME_FIELD_ARG)
                .help("Feature property holding the municipality name")
                .validator(is_non_empty)
                .takes_value(true)
                .long("name-field"),
        )
        .arg(
            Arg::with_name(CRS_ARG)
                .help("Projected CRS to partition and request tiles in (eg. EPSG:6455)")
                .validator(is_crs)
                .takes_value(true)
                .long("crs"),
        )
        .arg(
            Arg::with_name(IMAGE_CRS_ARG)
                .help("CRS of the returned images, if different from --crs")
                .validator(is_crs)
                .takes_value(true)
                .long("image-crs"),
        )
        .arg(
            Arg::with_name(URL_ARG)
                .help("The image service's exportImage endpoint")
                .takes_value(true)
                .short("u")
                .long("url"),
        )
        .arg(
            Arg::with_name(TILE_SIZE_ARG)
                .help("Maximum tile edge length in CRS units. Tiles are not clipped to the boundary.")
                .validator(is_positive_length)
                .conflicts_with(TILE_COUNT_ARG)
                .takes_value(true)
                .short("s")
                .long("tile-size"),
        )
        .arg(
            Arg::with_name(TILE_COUNT_ARG)
                .help("Split the boundary's extent into an N x N grid, clipped to the boundary")
                .validator(is_numeric_min(1))
                .takes_value(true)
                .short("c")
                .long("tile-count"),
        )
        .arg(
            Arg::with_name(PIXELS_ARG)
                .help("Pixel size of a full tile's side")
                .validator(is_numeric_min(1))
                .takes_value(true)
                .short("p")
                .long("pixels"),
        )
        .arg(
            Arg::with_name(OUTPUT_DIR_ARG)
                .help("The folder to output the tiles to")
                .takes_value(true)
                .short("o")
                .long("output"),
        )
        .arg(
            Arg::with_name(NAMING_ARG)
                .help("File name template with the format specifiers `{region}`, `{index}` and `{ext}`. May contain subfolders.")
                .takes_value(true)
                .long("naming"),
        )
        .arg(
            Arg::with_name(FORMAT_ARG)
                .help("Image format to request (eg. png, jpg, tiff)")
                .validator(is_non_empty)
                .takes_value(true)
                .short("f")
                .long("format"),
        )
        .arg(
            Arg::with_name(TIMEOUT_ARG)
                .help("The timeout (in seconds) for fetching a single tile. Pass 0 for no timeout.")
                .validator(is_numeric_min(0))
                .takes_value(true)
                .short("t")
                .long("timeout"),
        )
        .arg(
            Arg::with_name(KEEP_SOURCE_ARG)
                .help("Don't rewrite the boundary file in the target CRS; reproject the municipality in memory only")
                .required(false)
                .takes_value(false)
                .long("keep-source"),
        )
        .arg(
            Arg::with_name(SAVE_ARG)
                .help("Save the resulting settings back to the settings file")
                .required(false)
                .takes_value(false)
                .long("save"),
        )
        .arg(
            Arg::with_name(DRY_RUN_ARG)
                .help("Don't actually fetch anything, just determine how many tiles would be fetched.")
                .required(false)
                .takes_value(false)
                .long("dry-run"),
        )
        .get_matches()
}
