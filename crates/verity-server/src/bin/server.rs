//! verity server binary.
//!
//! Reads `config.toml` (or the path given with `--config`), loads the schema
//! registry, opens the SQLite store and serves the JSON API over HTTP.
//!
//! ```
//! cargo run -p verity-server --bin server -- --config config/config.toml
//! ```

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use verity_server::{ServerConfig, expand_tilde, load_registry, truth_layer};
use verity_store_sqlite::SqliteStore;

#[derive(Parser)]
#[command(author, version, about = "Verity truth layer server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,
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
  let server_cfg = ServerConfig::load(&cli.config)?;

  let registry_path = expand_tilde(&server_cfg.registry_path);
  let registry = load_registry(&registry_path)?;
  tracing::info!(
    path = %registry_path.display(),
    entity_types = registry.entity_types().len(),
    "registry loaded"
  );

  let store_path = expand_tilde(&server_cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let layer = Arc::new(truth_layer(store, registry, &server_cfg));
  let app = verity_server::router(layer);
  let address = server_cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}
