use reqwest::Url;

use crate::bounding_box::BoundingBox;
use crate::crs::Crs;
use crate::error::Error;
use crate::tile::TileSpec;

/// Cook County's 2024 orthophoto image service.
pub const DEFAULT_SERVICE_URL: &str =
    "https://gis.cookcountyil.gov/imagery/rest/services/CookOrtho2024/ImageServer/exportImage";

/// Optional `exportImage` parameters sent empty unless overridden.
const PASSTHROUGH_PARAMS: &[&str] = &[
    "compression",
    "compressionQuality",
    "bandIds",
    "sliceId",
    "mosaicRule",
    "renderingRule",
    "lercVersion",
    "compressionTolerance",
    "validateExtent",
];

/// Rendering parameters shared by every tile of a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderingOptions {
    /// The `exportImage` endpoint.
    pub url: String,
    /// Spatial reference of the returned image.
    pub image_crs: Crs,
    pub format: String,
    pub pixel_type: String,
    pub no_data_interpretation: String,
    pub interpolation: String,
    pub adjust_aspect_ratio: bool,
    /// Optional parameters passed through verbatim, in order.
    pub passthrough: Vec<(String, String)>,
}

impl RenderingOptions {
    pub fn new<S: Into<String>>(url: S, image_crs: Crs) -> Self {
        Self {
            url: url.into(),
            image_crs,
            format: "png".to_owned(),
            pixel_type: "U8".to_owned(),
            no_data_interpretation: "esriNoDataMatchAny".to_owned(),
            interpolation: "RSP_BilinearInterpolation".to_owned(),
            adjust_aspect_ratio: true,
            passthrough: PASSTHROUGH_PARAMS
                .iter()
                .map(|key| (key.to_string(), String::new()))
                .collect(),
        }
    }

    /// File extension for images in [`format`](Self::format).
    pub fn extension(&self) -> &str {
        match self.format.as_str() {
            "png8" | "png24" | "png32" | "jpgpng" => "png",
            "jpg" | "jpeg" => "jpg",
            "tiff" => "tif",
            other => other,
        }
    }

    /// The parsed service endpoint, without a trailing `?`.
    pub fn endpoint(&self) -> Result<Url, Error> {
        let url = self.url.trim_end_matches('?');

        Url::parse(url)
            .map_err(|e| Error::InvalidParameter(format!("invalid service URL `{}`: {}", url, e)))
    }

    /// Sets a passthrough parameter, replacing an existing value.
    pub fn set_param<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let (key, value) = (key.into(), value.into());

        match self.passthrough.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.passthrough.push((key, value)),
        }
    }
}

/// A ready-to-send `exportImage` request: the endpoint plus its ordered
/// query parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub base_url: String,
    pub params: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The requested extent, parsed back from the `bbox` parameter.
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.param("bbox")?.parse().ok()
    }

    /// The percent-encoded request URL.
    pub fn url(&self) -> Result<Url, Error> {
        Url::parse_with_params(&self.base_url, &self.params).map_err(|e| {
            Error::InvalidParameter(format!("invalid service URL `{}`: {}", self.base_url, e))
        })
    }
}

/// Maps a tile onto an `exportImage` request. Coordinates are written at
/// full precision.
pub fn build_request(tile: &TileSpec, options: &RenderingOptions) -> RequestDescriptor {
    let mut params = vec![
        ("bbox", tile.bbox.to_string()),
        ("bboxSR", tile.crs.code().to_string()),
        ("size", tile.size()),
        ("imageSR", options.image_crs.code().to_string()),
        ("time", String::new()),
        ("format", options.format.clone()),
        ("pixelType", options.pixel_type.clone()),
        ("noData", String::new()),
        ("noDataInterpretation", options.no_data_interpretation.clone()),
        ("interpolation", options.interpolation.clone()),
        ("adjustAspectRatio", options.adjust_aspect_ratio.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v))
    .collect::<Vec<_>>();

    params.extend(options.passthrough.iter().cloned());
    params.push(("f".to_owned(), "image".to_owned()));

    RequestDescriptor {
        // a trailing `?` would leave an empty pair in front of our parameters
        base_url: options.url.trim_end_matches('?').to_owned(),
        params,
    }
}
