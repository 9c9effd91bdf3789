use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::{
    fmt,
    path::{Path, PathBuf},
};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{HttpImageClient, ImageClient};
use crate::config::Config;
use crate::error::Error;
use crate::naming::NamingPolicy;
use crate::region::{self, BoundarySource, GeoJsonBoundary, Region};
use crate::request::{build_request, RenderingOptions};
use crate::tile::TileSpec;

/// Why a tile was not saved.
#[derive(Clone, Debug, PartialEq)]
pub enum FailureReason {
    /// No response: connection error, timeout, unreadable body.
    Transport(String),
    /// The service answered with a non-2xx status.
    RemoteService { status: u16, body: String },
    /// The payload could not be written to disk.
    Io(String),
    /// The batch was cancelled before this tile was requested.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Transport(reason) => write!(f, "transport failure: {}", reason),
            FailureReason::RemoteService { status, body } if body.is_empty() => {
                write!(f, "service returned status {}", status)
            }
            FailureReason::RemoteService { status, body } => {
                write!(f, "service returned status {}: {}", status, body)
            }
            FailureReason::Io(reason) => write!(f, "write failed: {}", reason),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Saved { path: PathBuf, bytes: usize },
    Failed(FailureReason),
}

/// What happened to one tile.
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadResult {
    pub tile: TileSpec,
    pub outcome: Outcome,
}

impl DownloadResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Saved { .. })
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match &self.outcome {
            Outcome::Failed(reason) => Some(reason),
            Outcome::Saved { .. } => None,
        }
    }
}

/// Success and failure counts of a batch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub region: String,
    pub succeeded: usize,
    /// Sequence index and reason of every tile that was not saved.
    pub failed: Vec<(usize, FailureReason)>,
}

impl Summary {
    pub fn new<S: Into<String>>(region: S, results: &[DownloadResult]) -> Self {
        Self {
            region: region.into(),
            succeeded: results.iter().filter(|r| r.is_success()).count(),
            failed: results
                .iter()
                .filter_map(|r| r.failure().map(|reason| (r.tile.index, reason.clone())))
                .collect(),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} of {} tiles saved, {} failed",
            self.region,
            self.succeeded,
            self.total(),
            self.failed.len()
        )?;

        for (index, reason) in &self.failed {
            write!(f, "\n  tile {}: {}", index, reason)?;
        }

        Ok(())
    }
}

/// Downloads `tiles` one after another and saves each successful response
/// to `output_dir`, named by `naming`.
///
/// Creates `output_dir` recursively and overwrites existing files. A tile
/// that fails is recorded and the batch moves on; only an unparsable service
/// URL or an unusable output directory fails the whole call. Once `cancel` fires, the remaining tiles
/// are recorded as cancelled without being requested.
///
/// # Example
/// ```rust,no_run
/// use municipal_tile_downloader::{
///     download, partition, BoundingBox, Crs, HttpImageClient, NamingPolicy, PartitionMode,
///     RenderingOptions, DEFAULT_SERVICE_URL,
/// };
/// use std::{path::Path, time::Duration};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let bbox = BoundingBox::new(1_054_000.0, 1_960_000.0, 1_090_000.0, 1_995_000.0);
/// let tiles = partition(&bbox, &geo::MultiPolygon::new(vec![]), PartitionMode::EdgeLength(5280.0), Crs(6455))?;
///
/// let results = download(
///     &tiles,
///     &RenderingOptions::new(DEFAULT_SERVICE_URL, Crs(6455)),
///     &HttpImageClient::new(Duration::from_secs(30))?,
///     Path::new("./tiles"),
///     &NamingPolicy::new("{region}_tile_{index}.{ext}", "Palatine", "png")?,
///     &CancellationToken::new(),
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn download<C: ImageClient>(
    tiles: &[TileSpec],
    options: &RenderingOptions,
    client: &C,
    output_dir: &Path,
    naming: &NamingPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<DownloadResult>, Error> {
    let endpoint = options.endpoint()?;
    debug!(%endpoint, tiles = tiles.len(), "starting download");

    fs::create_dir_all(output_dir)
        .await
        .map_err(|source| Error::OutputDirectory {
            path: output_dir.to_owned(),
            source,
        })?;

    let pb = ProgressBar::new(tiles.len() as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:60.cyan/blue} {pos:>7}/{len:7} ETA: {eta} {msg}",
    ) {
        pb.set_style(style.progress_chars("##-"));
    }

    let mut results = Vec::with_capacity(tiles.len());

    for tile in tiles {
        if cancel.is_cancelled() {
            results.push(DownloadResult {
                tile: *tile,
                outcome: Outcome::Failed(FailureReason::Cancelled),
            });
            pb.inc(1);
            continue;
        }

        let outcome = fetch_tile(tile, options, client, output_dir, naming).await;

        match &outcome {
            Outcome::Saved { path, bytes } => {
                debug!(index = tile.index, path = %path.display(), bytes, "saved tile")
            }
            Outcome::Failed(reason) => warn!(index = tile.index, %reason, "failed fetching tile"),
        }

        results.push(DownloadResult {
            tile: *tile,
            outcome,
        });
        pb.inc(1);
    }

    pb.finish_and_clear();

    if cancel.is_cancelled() {
        warn!("download cancelled");
    }

    Ok(results)
}

async fn fetch_tile<C: ImageClient>(
    tile: &TileSpec,
    options: &RenderingOptions,
    client: &C,
    output_dir: &Path,
    naming: &NamingPolicy,
) -> Outcome {
    let request = build_request(tile, options);
    if let Ok(url) = request.url() {
        debug!(index = tile.index, %url, "requesting tile");
    }

    let response = match client.get(&request).await {
        Ok(response) => response,
        Err(e) => return Outcome::Failed(FailureReason::Transport(format!("{:#}", e))),
    };

    if !response.is_success() {
        return Outcome::Failed(FailureReason::RemoteService {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).trim().to_owned(),
        });
    }

    let path = output_dir.join(naming.file_name(tile));
    match write_file(&path, &response.body).await {
        Ok(()) => Outcome::Saved {
            path,
            bytes: response.body.len(),
        },
        Err(e) => Outcome::Failed(FailureReason::Io(format!("{:#}", e))),
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed creating directory {}", parent.display()))?;
    }

    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("failed creating {}", path.display()))?;
    file.write_all(contents)
        .await
        .with_context(|| format!("failed writing {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("failed flushing {}", path.display()))?;

    Ok(())
}

/// A resolved region and the tiles covering it.
#[derive(Clone, Debug)]
pub struct Plan {
    pub region: Region,
    pub tiles: Vec<TileSpec>,
}

/// Resolves the configured municipality and partitions it, without
/// downloading anything.
pub fn plan(cfg: &Config) -> Result<Plan> {
    cfg.partition().validate()?;

    let source = GeoJsonBoundary::new(&cfg.boundary_file).with_name_field(&cfg.name_field);
    plan_from(cfg, &source)
}

fn plan_from<S: BoundarySource + ?Sized>(cfg: &Config, source: &S) -> Result<Plan> {
    let region = region::resolve(&cfg.municipality, source, cfg.target_crs)?;

    let tiles = match region.bounding_box() {
        Some(bbox) => {
            info!(region = %region.name, ?bbox, mode = %cfg.mode, "partitioning");
            cfg.partition().tiles(&bbox, &region.geometry)?
        }
        None => Vec::new(),
    };

    info!(region = %region.name, tiles = tiles.len(), "tiles to be downloaded");

    Ok(Plan { region, tiles })
}

/// Fetches the tiles covering the municipality in `cfg` and saves them to
/// the file system.
///
/// If [`Config::reproject_source`] is set, the boundary file is first
/// rewritten in the target CRS. Reading, rewriting and partitioning the
/// boundary runs on the blocking thread pool.
pub async fn run(cfg: &Config, cancel: &CancellationToken) -> Result<Summary> {
    cfg.partition().validate()?;

    let preflight = cfg.clone();
    let Plan { region, tiles } = tokio::task::spawn_blocking(move || {
        let cfg = preflight;
        let mut source =
            GeoJsonBoundary::new(&cfg.boundary_file).with_name_field(&cfg.name_field);
        if cfg.reproject_source {
            source
                .rewrite_crs(cfg.target_crs)
                .context("failed reprojecting boundary file")?;
        }

        plan_from(&cfg, &source)
    })
    .await
    .context("boundary task failed")??;

    let options = cfg.rendering_options();
    let naming = NamingPolicy::new(&cfg.naming, &region.name, options.extension())?;
    let client = HttpImageClient::new(cfg.timeout)?;

    let results = download(
        &tiles,
        &options,
        &client,
        &cfg.output_folder,
        &naming,
        cancel,
    )
    .await?;

    Ok(Summary::new(region.name, &results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ImageResponse;
    use crate::{BoundingBox, Crs, DEFAULT_SERVICE_URL};
    use anyhow::anyhow;
    use geo::polygon;
    use std::sync::Mutex;

    /// Answers requests with canned responses, in order.
    struct ScriptedClient {
        responses: Mutex<Vec<Result<ImageResponse>>>,
        requested: Mutex<Vec<Option<BoundingBox>>>,
    }

    impl ScriptedClient {
        fn new(mut responses: Vec<Result<ImageResponse>>) -> Self {
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
                requested: Mutex::new(Vec::new()),
            }
        }

        fn requested(&self) -> Vec<Option<BoundingBox>> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl ImageClient for ScriptedClient {
        async fn get(&self, request: &crate::RequestDescriptor) -> Result<ImageResponse> {
            self.requested.lock().unwrap().push(request.bbox());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow!("no response scripted")))
        }
    }

    fn status(status: u16, body: &[u8]) -> Result<ImageResponse> {
        Ok(ImageResponse {
            status,
            body: body.to_vec(),
        })
    }

    fn tiles(n: usize) -> Vec<TileSpec> {
        (0..n)
            .map(|i| TileSpec {
                index: i,
                bbox: BoundingBox::new(i as f64 * 10.0, 0.0, i as f64 * 10.0 + 10.0, 10.0),
                width: 1024,
                height: 1024,
                crs: Crs(6455),
            })
            .collect()
    }

    fn naming() -> NamingPolicy {
        NamingPolicy::new("{region}_tile_{index}.{ext}", "Palatine", "png").unwrap()
    }

    fn options() -> RenderingOptions {
        RenderingOptions::new(DEFAULT_SERVICE_URL, Crs(6455))
    }

    #[tokio::test]
    async fn keeps_going_past_failed_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tiles");
        let client = ScriptedClient::new(vec![
            status(200, b"first"),
            status(404, b"{\"error\":{\"code\":404,\"message\":\"Not Found\"}}\n"),
            status(200, b"third"),
        ]);
        let tiles = tiles(3);

        let results = download(&tiles, &options(), &client, &out, &naming(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(
            results[1].outcome,
            Outcome::Failed(FailureReason::RemoteService {
                status: 404,
                body: "{\"error\":{\"code\":404,\"message\":\"Not Found\"}}".to_owned(),
            })
        );
        assert!(results[2].is_success());

        assert_eq!(std::fs::read(out.join("Palatine_tile_0.png")).unwrap(), b"first");
        assert!(!out.join("Palatine_tile_1.png").exists());
        assert_eq!(std::fs::read(out.join("Palatine_tile_2.png")).unwrap(), b"third");

        assert_eq!(
            results[2].outcome,
            Outcome::Saved {
                path: out.join("Palatine_tile_2.png"),
                bytes: 5
            }
        );

        // requests go out in partition order
        let requested: Vec<_> = client.requested().into_iter().map(|b| b.unwrap()).collect();
        assert_eq!(requested, tiles.iter().map(|t| t.bbox).collect::<Vec<_>>());

        let summary = Summary::new("Palatine", &results);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, 1);
        assert!(!summary.is_complete());
        assert!(summary.to_string().starts_with("Palatine: 2 of 3 tiles saved, 1 failed"));
    }

    #[tokio::test]
    async fn rerun_overwrites_files() {
        let dir = tempfile::tempdir().unwrap();
        let tiles = tiles(1);

        for body in [&b"old"[..], &b"new"[..]] {
            let client = ScriptedClient::new(vec![status(200, body)]);
            download(&tiles, &options(), &client, dir.path(), &naming(), &CancellationToken::new())
                .await
                .unwrap();
        }

        assert_eq!(std::fs::read(dir.path().join("Palatine_tile_0.png")).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn records_transport_failures() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![
            Err(anyhow!("operation timed out")),
            status(200, b"ok"),
        ]);

        let results = download(&tiles(2), &options(), &client, dir.path(), &naming(), &CancellationToken::new())
            .await
            .unwrap();

        match results[0].failure() {
            Some(FailureReason::Transport(reason)) => assert!(reason.contains("timed out")),
            other => panic!("expected transport failure, got {:?}", other),
        }
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn records_write_failures() {
        let dir = tempfile::tempdir().unwrap();
        // a directory squatting on the first tile's file name
        std::fs::create_dir(dir.path().join("Palatine_tile_0.png")).unwrap();
        let client = ScriptedClient::new(vec![status(200, b"a"), status(200, b"b")]);

        let results = download(&tiles(2), &options(), &client, dir.path(), &naming(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(results[0].failure(), Some(FailureReason::Io(_))));
        assert!(results[1].is_success());
    }

    #[tokio::test]
    async fn unusable_output_directory_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-directory");
        std::fs::write(&file, b"").unwrap();
        let client = ScriptedClient::new(vec![status(200, b"a")]);

        let result = download(&tiles(1), &options(), &client, &file, &naming(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::OutputDirectory { .. })));
        assert!(client.requested().is_empty());
    }

    #[tokio::test]
    async fn unparsable_service_url_fails_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("tiles");
        let client = ScriptedClient::new(vec![status(200, b"a"), status(200, b"b")]);
        let options = RenderingOptions::new("cookcounty/ImageServer/exportImage", Crs(6455));

        let result = download(&tiles(2), &options, &client, &out, &naming(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::InvalidParameter(_))));
        assert!(client.requested().is_empty());
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn cancelled_batch_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![status(200, b"a"), status(200, b"b")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = download(&tiles(2), &options(), &client, dir.path(), &naming(), &cancel)
            .await
            .unwrap();

        assert!(client.requested().is_empty());
        assert!(results
            .iter()
            .all(|r| r.failure() == Some(&FailureReason::Cancelled)));
    }

    #[tokio::test]
    async fn nested_names_create_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new(vec![status(200, b"a")]);
        let naming = NamingPolicy::new("{region}/{index}.{ext}", "Palatine", "png").unwrap();

        download(&tiles(1), &options(), &client, dir.path(), &naming, &CancellationToken::new())
            .await
            .unwrap();

        assert!(dir.path().join("Palatine").join("0.png").is_file());
    }

    #[tokio::test]
    async fn run_stops_at_a_missing_boundary_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            boundary_file: dir.path().join("Municipality.geojson"),
            output_folder: dir.path().join("tiles"),
            ..Config::default()
        };

        let err = run(&cfg, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::BoundaryRead { .. })
        ));
        assert!(!cfg.output_folder.exists());
    }

    #[test]
    fn plan_resolves_and_partitions() {
        let regions = vec![Region {
            name: "Square".to_owned(),
            geometry: polygon![
                (x: 0.0, y: 0.0),
                (x: 1000.0, y: 0.0),
                (x: 1000.0, y: 1000.0),
                (x: 0.0, y: 1000.0),
            ]
            .into(),
            crs: Crs(6455),
        }];

        let mut cfg = Config::default();
        cfg.municipality = "Square".to_owned();
        cfg.mode = crate::PartitionMode::EdgeLength(600.0);

        let plan = plan_from(&cfg, &regions).unwrap();
        assert_eq!(plan.region.name, "Square");
        assert_eq!(plan.tiles.len(), 4);

        cfg.municipality = "Circle".to_owned();
        let err = plan_from(&cfg, &regions).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::RegionNotFound { .. })
        ));
    }
}
