//! Download orthoimagery tiles covering a municipality from an ArcGIS image
//! service.
//!
//! The municipality's boundary is looked up by name in a GeoJSON file,
//! reprojected into a projected coordinate system, and its bounding box
//! split into tiles small enough for the service's `exportImage` limits.
//! Every tile is requested in turn and saved as an image file. Tiles that
//! fail are reported, the rest of the batch carries on.
//!
//! **Be considerate.** Image services are shared infrastructure; a small
//! tile edge over a large municipality means thousands of requests.
//!
//! # CLI Example
//!
//! ```bash
//! municipal-tile-downloader \
//!   --municipality Palatine \
//!   --boundary Municipality.geojson \
//!   --crs EPSG:6455 \
//!   --tile-size 5280 \
//!   --output ./tiles
//! ```
//!
//! # Library Example
//! ```rust,no_run
//! use municipal_tile_downloader::{run, Config, PartitionMode};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config {
//!     municipality: "Palatine".into(),
//!     boundary_file: "Municipality.geojson".into(),
//!     mode: PartitionMode::TileCount(4),
//!     output_folder: "./tiles".into(),
//!     ..Config::default()
//! };
//!
//! let summary = run(&config, &CancellationToken::new())
//!     .await
//!     .expect("failed fetching tiles");
//! println!("{}", summary);
//! # }
//! ```

mod bounding_box;
mod client;
mod config;
mod crs;
mod error;
mod fetch;
mod naming;
mod partition;
mod region;
mod request;
mod tile;

pub use bounding_box::BoundingBox;
pub use client::{HttpImageClient, ImageClient, ImageResponse};
pub use config::Config;
pub use crs::{reproject, Crs, Reprojector};
pub use error::Error;
pub use fetch::{download, plan, run, DownloadResult, FailureReason, Outcome, Plan, Summary};
pub use naming::{NamingPolicy, DEFAULT_NAMING};
pub use partition::{
    partition, Partition, PartitionMode, DEFAULT_EDGE_LENGTH, DEFAULT_TILE_PIXELS,
};
pub use region::{resolve, BoundarySource, GeoJsonBoundary, Region, DEFAULT_NAME_FIELD};
pub use request::{build_request, RenderingOptions, RequestDescriptor, DEFAULT_SERVICE_URL};
pub use tile::TileSpec;
