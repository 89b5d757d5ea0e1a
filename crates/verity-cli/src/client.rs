//! Async HTTP client wrapping the verity JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, de::DeserializeOwned};
use verity_core::{
  Receipt, Submission,
  identity::EntityId,
  observation::{Observation, ObservationRef},
  service::ReplayReport,
  snapshot::EntitySnapshot,
};

/// Connection settings for the verity API.
#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
}

/// Async HTTP client for the verity JSON REST API.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

/// Error body returned by the server.
#[derive(Deserialize)]
struct ErrorBody {
  error: String,
  code:  String,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.config.base_url.trim_end_matches('/'), path)
  }

  async fn send<T: DeserializeOwned>(&self, label: &str, req: RequestBuilder) -> Result<T> {
    tracing::debug!(request = label, "sending");
    let resp = req.send().await.with_context(|| format!("{label} failed"))?;
    Self::decode(label, resp).await
  }

  async fn decode<T: DeserializeOwned>(label: &str, resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
      let body = resp.text().await.unwrap_or_default();
      return Err(match serde_json::from_str::<ErrorBody>(&body) {
        Ok(err) => anyhow!("{label} → {status}: {} ({})", err.error, err.code),
        Err(_) => anyhow!("{label} → {status}"),
      });
    }
    resp.json().await.with_context(|| format!("deserialising {label}"))
  }

  // ── Ingest ────────────────────────────────────────────────────────────────

  /// `POST /api/observations`
  pub async fn submit(&self, submission: &Submission) -> Result<Receipt> {
    let req = self.client.post(self.url("/observations")).json(submission);
    self.send("POST /observations", req).await
  }

  // ── Entities ──────────────────────────────────────────────────────────────

  /// `GET /api/entities/{id}/snapshot`
  pub async fn snapshot(&self, id: &EntityId) -> Result<EntitySnapshot> {
    let req = self.client.get(self.url(&format!("/entities/{id}/snapshot")));
    self.send("GET /entities/{id}/snapshot", req).await
  }

  /// `GET /api/entities/{id}/snapshots`
  pub async fn history(&self, id: &EntityId) -> Result<Vec<EntitySnapshot>> {
    let req = self.client.get(self.url(&format!("/entities/{id}/snapshots")));
    self.send("GET /entities/{id}/snapshots", req).await
  }

  /// `GET /api/entities/{id}/provenance/{field}`
  pub async fn provenance(&self, id: &EntityId, field: &str) -> Result<ObservationRef> {
    let req = self
      .client
      .get(self.url(&format!("/entities/{id}/provenance/{field}")));
    self.send("GET /entities/{id}/provenance/{field}", req).await
  }

  /// `GET /api/entities/{id}/observations[?field=<f>]`
  pub async fn observations(
    &self,
    id: &EntityId,
    field: Option<&str>,
  ) -> Result<Vec<Observation>> {
    let mut req = self
      .client
      .get(self.url(&format!("/entities/{id}/observations")));
    if let Some(field) = field {
      req = req.query(&[("field", field)]);
    }
    self.send("GET /entities/{id}/observations", req).await
  }

  /// `GET /api/entities/{id}/verify`
  pub async fn verify(&self, id: &EntityId) -> Result<ReplayReport> {
    let req = self.client.get(self.url(&format!("/entities/{id}/verify")));
    self.send("GET /entities/{id}/verify", req).await
  }
}
