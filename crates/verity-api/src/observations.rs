//! Handlers for `/observations` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `POST` | `/observations` | Body: [`Submission`]; 201 if new, 200 if deduplicated |
//! | `GET`  | `/observations/{id}` | 404 if not found |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
  response::IntoResponse,
};
use verity_core::{
  Submission, TruthLayer, identity::ObservationId, observation::Observation,
  store::TruthStore,
};

use crate::error::ApiError;

// ─── Submit ───────────────────────────────────────────────────────────────────

/// `POST /observations`: returns the [`Receipt`](verity_core::Receipt).
pub async fn submit<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Json(body): Json<Submission>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TruthStore,
{
  let receipt = layer.submit(body).await?;
  let status = if receipt.deduplicated {
    StatusCode::OK
  } else {
    StatusCode::CREATED
  };
  Ok((status, Json(receipt)))
}

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /observations/{id}`
pub async fn get_one<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
) -> Result<Json<Observation>, ApiError>
where
  S: TruthStore,
{
  let id = ObservationId::parse(&id)?;
  let observation = layer
    .get_observation(id.clone())
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("observation {id} not found")))?;
  Ok(Json(observation))
}
