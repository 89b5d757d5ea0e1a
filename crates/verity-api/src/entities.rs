//! Handlers for `/entities` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/entities` | Optional `?entity_type=` |
//! | `GET`  | `/entities/{id}` | Entity metadata |
//! | `GET`  | `/entities/{id}/snapshot` | Latest snapshot |
//! | `GET`  | `/entities/{id}/snapshots` | Snapshot history, oldest first |
//! | `GET`  | `/entities/{id}/provenance/{field}` | Observation behind a field |
//! | `GET`  | `/entities/{id}/observations` | [`ObservationFilter`] as query params |
//! | `POST` | `/entities/{id}/recompute` | Body: `{"version":N}` (optional) |
//! | `GET`  | `/entities/{id}/verify` | Replay check |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use verity_core::{
  TruthLayer,
  identity::{EntityId, EntityMetadata},
  observation::{Observation, ObservationRef},
  service::ReplayReport,
  snapshot::EntitySnapshot,
  store::{ObservationFilter, TruthStore},
};

use crate::error::ApiError;

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub entity_type: Option<String>,
}

/// `GET /entities[?entity_type=<type>]`
pub async fn list<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<EntityMetadata>>, ApiError>
where
  S: TruthStore,
{
  Ok(Json(layer.list_entities(params.entity_type).await?))
}

// ─── Single entity ────────────────────────────────────────────────────────────

/// `GET /entities/{id}`
pub async fn get_one<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
) -> Result<Json<EntityMetadata>, ApiError>
where
  S: TruthStore,
{
  Ok(Json(layer.get_entity(EntityId::parse(&id)?).await?))
}

/// `GET /entities/{id}/snapshot`
pub async fn snapshot<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
) -> Result<Json<EntitySnapshot>, ApiError>
where
  S: TruthStore,
{
  Ok(Json(layer.get_snapshot(EntityId::parse(&id)?).await?))
}

/// `GET /entities/{id}/snapshots`
pub async fn history<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
) -> Result<Json<Vec<EntitySnapshot>>, ApiError>
where
  S: TruthStore,
{
  let id = EntityId::parse(&id)?;
  let history = layer.snapshot_history(id.clone()).await?;
  if history.is_empty() {
    return Err(ApiError::NotFound(format!("entity {id} not found")));
  }
  Ok(Json(history))
}

/// `GET /entities/{id}/provenance/{field}`
pub async fn provenance<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path((id, field)): Path<(String, String)>,
) -> Result<Json<ObservationRef>, ApiError>
where
  S: TruthStore,
{
  let id = EntityId::parse(&id)?;
  Ok(Json(layer.get_provenance(id, &field).await?))
}

/// `GET /entities/{id}/observations[?field=..&producer_id=..&min_priority=..]`
pub async fn observations<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
  Query(filter): Query<ObservationFilter>,
) -> Result<Json<Vec<Observation>>, ApiError>
where
  S: TruthStore,
{
  let id = EntityId::parse(&id)?;
  Ok(Json(layer.list_observations(id, &filter).await?))
}

// ─── Replay ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct RecomputeBody {
  /// Registry version to reduce under; the active version if omitted.
  #[serde(default)]
  pub version: Option<u32>,
}

/// `POST /entities/{id}/recompute`: appends a new snapshot.
pub async fn recompute<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
  Json(body): Json<RecomputeBody>,
) -> Result<Json<EntitySnapshot>, ApiError>
where
  S: TruthStore,
{
  let id = EntityId::parse(&id)?;
  Ok(Json(layer.recompute(id, body.version).await?))
}

/// `GET /entities/{id}/verify`
pub async fn verify<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(id): Path<String>,
) -> Result<Json<ReplayReport>, ApiError>
where
  S: TruthStore,
{
  let id = EntityId::parse(&id)?;
  Ok(Json(layer.verify_replay(id).await?))
}
