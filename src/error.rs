use std::{io, path::PathBuf};

use thiserror::Error;

use crate::crs::Crs;

/// Errors that abort an invocation before (or instead of) downloading.
///
/// Failures of individual tiles are never reported through this type; they
/// are collected as [`DownloadResult`](crate::DownloadResult)s instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no region named `{name}` in the boundary source")]
    RegionNotFound { name: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("unsupported coordinate reference system {0}")]
    UnsupportedCrs(Crs),

    #[error("failed reprojecting from {from} to {to}: {reason}")]
    Reprojection { from: Crs, to: Crs, reason: String },

    #[error("failed reading boundary file {}", path.display())]
    BoundaryRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed parsing boundary file {}: {reason}", path.display())]
    BoundaryParse { path: PathBuf, reason: String },

    #[error("failed writing boundary file {}", path.display())]
    BoundaryWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create output directory {}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
