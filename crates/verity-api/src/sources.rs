//! Handler for `GET /sources/{content_id}`.

use std::sync::Arc;

use axum::{
  Json,
  extract::{Path, State},
};
use verity_core::{TruthLayer, hash::ContentId, observation::Source, store::TruthStore};

use crate::error::ApiError;

/// `GET /sources/{content_id}`: the raw material behind an observation.
pub async fn get_one<S>(
  State(layer): State<Arc<TruthLayer<S>>>,
  Path(content_id): Path<String>,
) -> Result<Json<Source>, ApiError>
where
  S: TruthStore,
{
  let content_id = ContentId::parse(&content_id)?;
  let source = layer
    .get_source(content_id.clone())
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("source {content_id} not found")))?;
  Ok(Json(source))
}
