use maplit::hashmap;
use std::{fmt, path::PathBuf};
use strfmt::strfmt;

use crate::error::Error;
use crate::tile::TileSpec;

pub const DEFAULT_NAMING: &str = "{region}_tile_{index}.{ext}";

/// Derives a tile's file name from a template with the replacement
/// specifiers `{region}`, `{index}` and `{ext}`.
///
/// The name only depends on the region and the tile's sequence index, so
/// re-running a batch overwrites the previous files.
#[derive(Clone, PartialEq)]
pub struct NamingPolicy {
    template: String,
    region: String,
    extension: String,
}

impl NamingPolicy {
    /// Creates a policy, checking that `template` only uses known
    /// specifiers and gives every tile its own name.
    pub fn new<T, R, E>(template: T, region: R, extension: E) -> Result<Self, Error>
    where
        T: Into<String>,
        R: Into<String>,
        E: Into<String>,
    {
        let policy = Self {
            template: template.into(),
            region: region.into(),
            extension: extension.into(),
        };

        let first = policy.render(0)?;
        if first.is_empty() {
            return Err(Error::InvalidParameter(
                "file name template renders to an empty name".to_owned(),
            ));
        }
        if policy.render(1)? == first {
            return Err(Error::InvalidParameter(format!(
                "file name template `{}` must contain `{{index}}`",
                policy.template
            )));
        }

        Ok(policy)
    }

    fn render(&self, index: usize) -> Result<String, Error> {
        let vars = hashmap! {
            "region".to_owned() => self.region.clone(),
            "index".to_owned() => index.to_string(),
            "ext".to_owned() => self.extension.clone(),
        };

        strfmt(&self.template, &vars).map_err(|e| {
            Error::InvalidParameter(format!(
                "invalid file name template `{}`: {}",
                self.template, e
            ))
        })
    }

    /// The file name for `tile`, relative to the output directory.
    pub fn file_name(&self, tile: &TileSpec) -> PathBuf {
        // `new` already rendered the template once, so this cannot fail
        self.render(tile.index)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(format!("tile_{}.{}", tile.index, self.extension)))
    }
}

impl fmt::Debug for NamingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamingPolicy")
            .field("template", &self.template)
            .field("region", &self.region)
            .finish()
    }
}
