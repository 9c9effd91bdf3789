mod args;
mod validators;

use anyhow::{bail, Result};
use args::Args;
use municipal_tile_downloader::{plan, run};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse()?;
    let config = args.config()?;

    if args.save {
        config.save(&args.settings)?;
    }

    if args.dry_run {
        let plan = plan(&config)?;
        let pixels: u64 = plan
            .tiles
            .iter()
            .map(|tile| tile.width as u64 * tile.height as u64)
            .sum();

        eprintln!(
            "would download {} tiles for {} (at most {}, assuming uncompressed RGB)",
            plan.tiles.len(),
            plan.region.name,
            pretty_bytes::converter::convert(pixels as f64 * 3f64)
        );

        return Ok(());
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after the current tile");
            interrupt.cancel();
        }
    });

    let summary = run(&config, &cancel).await?;
    eprintln!("{}", summary);

    if !summary.is_complete() {
        bail!(
            "{} of {} tiles were not saved",
            summary.failed.len(),
            summary.total()
        );
    }

    Ok(())
}
