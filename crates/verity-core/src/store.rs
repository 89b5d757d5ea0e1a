//! The `TruthStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `verity-store-sqlite`
//! and the in-process [`MemoryStore`](crate::memory::MemoryStore)). Higher
//! layers (`verity-api`, `verity-server`) depend on this abstraction, not on
//! any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error,
  hash::ContentId,
  identity::{EntityId, EntityMetadata, ObservationId},
  observation::{Observation, PendingCommit, Source},
  schema::PolicySet,
  snapshot::EntitySnapshot,
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Error type of a store backend.
///
/// Backends wrap [`Error`] for failures raised by the engine itself (e.g. a
/// reducer error inside a commit) and expose it through [`as_core`] so
/// callers can classify them.
///
/// [`as_core`]: StoreError::as_core
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn as_core(&self) -> Option<&Error> { None }
}

impl StoreError for Error {
  fn as_core(&self) -> Option<&Error> { Some(self) }
}

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`TruthStore::list_observations`]. All set filters must
/// match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationFilter {
  /// Only observations that carry this field.
  pub field:           Option<String>,
  pub producer_id:     Option<String>,
  pub min_priority:    Option<u16>,
  pub observed_after:  Option<DateTime<Utc>>,
  pub observed_before: Option<DateTime<Utc>>,
  pub schema_version:  Option<u32>,
  pub limit:           Option<usize>,
}

impl ObservationFilter {
  pub fn matches(&self, obs: &Observation) -> bool {
    self.field.as_ref().is_none_or(|f| obs.fields.contains_key(f))
      && self.producer_id.as_ref().is_none_or(|p| obs.producer_id == *p)
      && self.min_priority.is_none_or(|p| obs.source_priority >= p)
      && self.observed_after.is_none_or(|t| obs.observed_at > t)
      && self.observed_before.is_none_or(|t| obs.observed_at < t)
      && self.schema_version.is_none_or(|v| obs.schema_version == v)
  }
}

/// Result of [`TruthStore::commit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
  pub entity_id:      EntityId,
  pub observation_id: ObservationId,
  pub content_id:     ContentId,
  /// `true` when the content id already existed and nothing was written.
  pub deduplicated:   bool,
  /// The entity's latest snapshot after the commit.
  pub snapshot:       EntitySnapshot,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Verity store backend.
///
/// Sources, observations and snapshots are append-only: no method updates or
/// deletes a stored record. Listing methods return observations in recency
/// order (`observed_at DESC, observation_id ASC`) and snapshots oldest first.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait TruthStore: Send + Sync {
  type Error: StoreError;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Persist one ingestion atomically.
  ///
  /// If `pending.source.content_id` is already stored, nothing is written and
  /// the outcome reports the existing observation and the latest snapshot
  /// with `deduplicated = true`. Otherwise the source, the entity (if new)
  /// and the observation are inserted, the entity's full observation set is
  /// reduced under `policies`, and the resulting snapshot is appended. Any
  /// failure leaves the store unchanged.
  ///
  /// Callers must serialise commits per entity.
  fn commit(
    &self,
    pending: PendingCommit,
    policies: PolicySet,
  ) -> impl Future<Output = Result<CommitOutcome, Self::Error>> + Send + '_;

  /// Re-reduce an entity's observations under `policies` and append the
  /// resulting snapshot.
  fn recompute(
    &self,
    entity_id: EntityId,
    policies: PolicySet,
  ) -> impl Future<Output = Result<EntitySnapshot, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_source(
    &self,
    content_id: ContentId,
  ) -> impl Future<Output = Result<Option<Source>, Self::Error>> + Send + '_;

  fn get_entity(
    &self,
    entity_id: EntityId,
  ) -> impl Future<Output = Result<Option<EntityMetadata>, Self::Error>> + Send + '_;

  /// All known entities in id order, optionally of one type.
  fn list_entities(
    &self,
    entity_type: Option<String>,
  ) -> impl Future<Output = Result<Vec<EntityMetadata>, Self::Error>> + Send + '_;

  fn get_observation(
    &self,
    observation_id: ObservationId,
  ) -> impl Future<Output = Result<Option<Observation>, Self::Error>> + Send + '_;

  fn list_observations<'a>(
    &'a self,
    entity_id: EntityId,
    filter: &'a ObservationFilter,
  ) -> impl Future<Output = Result<Vec<Observation>, Self::Error>> + Send + 'a;

  /// The most recently appended snapshot, if any.
  fn get_snapshot(
    &self,
    entity_id: EntityId,
  ) -> impl Future<Output = Result<Option<EntitySnapshot>, Self::Error>> + Send + '_;

  /// Every snapshot ever appended for the entity, oldest first.
  fn snapshot_history(
    &self,
    entity_id: EntityId,
  ) -> impl Future<Output = Result<Vec<EntitySnapshot>, Self::Error>> + Send + '_;
}
