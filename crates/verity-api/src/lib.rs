//! JSON REST API for Verity.
//!
//! Exposes an axum [`Router`] backed by a [`TruthLayer`] over any
//! [`verity_core::store::TruthStore`]. Auth, TLS, and transport concerns are
//! the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", verity_api::api_router(layer.clone()))
//! ```

pub mod entities;
pub mod error;
pub mod observations;
pub mod schemas;
pub mod sources;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use verity_core::{TruthLayer, store::TruthStore};

pub use error::ApiError;

/// Build a fully-materialised API router for `layer`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(layer: Arc<TruthLayer<S>>) -> Router<()>
where
  S: TruthStore + 'static,
{
  Router::new()
    // Ingest
    .route("/observations", post(observations::submit::<S>))
    .route("/observations/{id}", get(observations::get_one::<S>))
    // Entities
    .route("/entities", get(entities::list::<S>))
    .route("/entities/{id}", get(entities::get_one::<S>))
    .route("/entities/{id}/snapshot", get(entities::snapshot::<S>))
    .route("/entities/{id}/snapshots", get(entities::history::<S>))
    .route("/entities/{id}/provenance/{field}", get(entities::provenance::<S>))
    .route("/entities/{id}/observations", get(entities::observations::<S>))
    .route("/entities/{id}/recompute", post(entities::recompute::<S>))
    .route("/entities/{id}/verify", get(entities::verify::<S>))
    // Sources
    .route("/sources/{content_id}", get(sources::get_one::<S>))
    // Schemas
    .route(
      "/schemas/{entity_type}",
      get(schemas::get_one::<S>).post(schemas::publish::<S>),
    )
    .route("/schemas/{entity_type}/activate", post(schemas::activate::<S>))
    .with_state(layer)
}
