//! `resolver`, the Canon resolution worker binary.
//!
//! Reads `canon.toml` (or the path given with `--config`) plus `CANON_*`
//! environment variables, opens the SQLite store, and drains the resolution
//! queue until Ctrl-C. Serves the JSON API as well when `listen` is set.
//!
//! For an external scheduler, `--once` runs one reconciliation sweep and one
//! tick, then prints the tick summary as JSON.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use canon_store_sqlite::SqliteStore;
use canon_worker::{Worker, WorkerConfig};
use clap::Parser;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Canon customer identity resolver")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "canon.toml")]
  config: PathBuf,

  /// Run one reconcile-and-tick pass, print the summary, and exit.
  #[arg(long)]
  once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("CANON"))
    .build()
    .context("failed to read config file")?;

  let worker_cfg: WorkerConfig = settings
    .try_deserialize()
    .context("failed to deserialise WorkerConfig")?;

  let store_path = expand_tilde(&worker_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  let store = Arc::new(store);

  let listen = worker_cfg.listen.clone();
  let worker = Worker::new(store.clone(), worker_cfg);

  if cli.once {
    worker.reconcile().await.context("reconciliation failed")?;
    let summary = worker.tick().await.context("resolution tick failed")?;
    println!("{}", serde_json::to_string(&summary)?);
    return Ok(());
  }

  let (stop_tx, stop_rx) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      tracing::info!("shutdown requested");
    }
    let _ = stop_tx.send(true);
  });

  let server = match listen {
    Some(address) => {
      let app = canon_api::api_router(store.clone(), Some(worker.signal()))
        .layer(TraceLayer::new_for_http());
      let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
      tracing::info!("Listening on http://{address}");

      let stop = stopped(stop_rx.clone());
      Some(tokio::spawn(async move {
        axum::serve(listener, app).with_graceful_shutdown(stop).await
      }))
    }
    None => None,
  };

  worker.run(stopped(stop_rx)).await;

  if let Some(server) = server {
    server
      .await
      .context("server task panicked")?
      .context("server error")?;
  }

  Ok(())
}

/// Resolves once the shutdown flag flips (or its sender is gone).
async fn stopped(mut rx: watch::Receiver<bool>) {
  let _ = rx.wait_for(|stop| *stop).await;
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
