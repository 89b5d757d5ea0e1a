//! Handlers for `/schemas` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/schemas/{entity_type}` | Active version, or `?version=N` |
//! | `POST` | `/schemas/{entity_type}` | Body: [`EntitySchema`]; 201 if published, 200 if identical |
//! | `POST` | `/schemas/{entity_type}/activate` | Body: `{"version":N}` |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use verity_core::{TruthLayer, schema::EntitySchema, store::TruthStore};

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct VersionParams {
  pub version: Option<u32>,
}

/// `GET /schemas/{entity_type}[?version=N]`
pub async fn get_one<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(entity_type): Path<String>,
  Query(params): Query<VersionParams>,
) -> Result<Json<EntitySchema>, ApiError>
where
  S: TruthStore,
{
  let schema = layer.schema(&entity_type, params.version)?;
  Ok(Json(EntitySchema::clone(&schema)))
}

/// `POST /schemas/{entity_type}`: publish a new version.
pub async fn publish<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(entity_type): Path<String>,
  Json(schema): Json<EntitySchema>,
) -> Result<impl IntoResponse, ApiError>
where
  S: TruthStore,
{
  if schema.entity_type != entity_type {
    return Err(ApiError::BadRequest(format!(
      "path names {entity_type:?} but the body defines {:?}",
      schema.entity_type
    )));
  }
  let version = schema.version;
  let published = layer.publish_schema(schema)?;
  let status = if published { StatusCode::CREATED } else { StatusCode::OK };
  Ok((
    status,
    Json(json!({ "entity_type": entity_type, "version": version, "published": published })),
  ))
}

#[derive(Debug, Deserialize)]
pub struct ActivateBody {
  pub version: u32,
}

/// `POST /schemas/{entity_type}/activate`: roll back or forward.
pub async fn activate<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(entity_type): Path<String>,
  Json(body): Json<ActivateBody>,
) -> Result<Json<serde_json::Value>, ApiError>
where
  S: TruthStore,
{
  layer.activate_schema(&entity_type, body.version)?;
  Ok(Json(json!({ "entity_type": entity_type, "active_version": body.version })))
}
