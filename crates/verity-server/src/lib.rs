//! Server assembly for Verity.
//!
//! Loads [`ServerConfig`] and the schema registry, then mounts the JSON API
//! under `/api` next to a `/health` check.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use axum::{Router, routing::get};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use verity_core::{
  TruthLayer, gate::GateConfig, schema::SchemaRegistry, store::TruthStore,
};

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `VERITY_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
  pub host:              String,
  pub port:              u16,
  pub store_path:        PathBuf,
  pub registry_path:     PathBuf,
  /// Recorded on sources whose submission names no tenant.
  pub tenant_id:         Option<String>,
  pub gate_max_attempts: u32,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      host:              "127.0.0.1".to_string(),
      port:              7420,
      store_path:        PathBuf::from("~/.local/share/verity/verity.db"),
      registry_path:     PathBuf::from("registry.toml"),
      tenant_id:         None,
      gate_max_attempts: GateConfig::default().max_attempts,
    }
  }
}

impl ServerConfig {
  /// Layer `path` (optional) and the environment over the defaults.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("VERITY"))
      .build()
      .context("failed to read config file")?
      .try_deserialize()
      .context("failed to deserialise ServerConfig")
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Read and parse the schema registry file.
pub fn load_registry(path: &Path) -> anyhow::Result<SchemaRegistry> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read registry {}", path.display()))?;
  SchemaRegistry::from_toml_str(&raw)
    .with_context(|| format!("failed to parse registry {}", path.display()))
}

/// Build the truth layer over `store` with the gate and tenant settings of
/// `config`.
pub fn truth_layer<S: TruthStore>(
  store: S,
  registry: SchemaRegistry,
  config: &ServerConfig,
) -> TruthLayer<S> {
  let layer = TruthLayer::new(store, registry)
    .with_gate(GateConfig { max_attempts: config.gate_max_attempts });
  match &config.tenant_id {
    Some(tenant) => layer.with_tenant(tenant.clone()),
    None => layer,
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

pub fn router<S>(layer: Arc<TruthLayer<S>>) -> Router
where
  S: TruthStore + 'static,
{
  Router::new()
    .route("/health", get(health))
    .nest("/api", verity_api::api_router(layer))
    .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str { "ok" }

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use tower::ServiceExt as _;
  use verity_core::memory::MemoryStore;

  use super::*;

  fn shipped_registry() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/registry.toml")
  }

  async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
  }

  #[test]
  fn missing_config_file_falls_back_to_defaults() {
    let cfg = ServerConfig::load(Path::new("/nonexistent/verity.toml")).unwrap();
    assert_eq!(cfg.gate_max_attempts, 3);
    assert!(cfg.registry_path.ends_with("registry.toml"));
  }

  #[test]
  fn tilde_expands_to_home() {
    let Ok(home) = std::env::var("HOME") else { return };
    let expanded = expand_tilde(Path::new("~/data/verity.db"));
    assert_eq!(expanded, PathBuf::from(home).join("data/verity.db"));
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }

  #[test]
  fn shipped_registry_parses() {
    let registry = load_registry(&shipped_registry()).unwrap();
    for entity_type in ["company", "person", "invoice", "event"] {
      assert!(registry.active(entity_type).is_ok(), "{entity_type} missing");
    }
  }

  #[tokio::test]
  async fn health_and_api_are_mounted() {
    let registry = load_registry(&shipped_registry()).unwrap();
    let cfg = ServerConfig { tenant_id: Some("acme".into()), ..ServerConfig::default() };
    let layer = Arc::new(truth_layer(MemoryStore::new(), registry, &cfg));

    let (status, body) = get(router(layer.clone()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let (status, body) = get(router(layer), "/api/entities").await;
    assert_eq!(status, StatusCode::OK);
    let entities: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(entities, serde_json::json!([]));
  }
}
