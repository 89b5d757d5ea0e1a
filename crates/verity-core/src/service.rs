//! `TruthLayer`: the ingest and query surface over a [`TruthStore`].
//!
//! Ingestion canonicalises raw input against the active schema, resolves the
//! entity id, derives the content id, and commits under a per-entity lock.
//! Commits to the same entity are strictly serialised; commits to different
//! entities run in parallel.

use std::{
  collections::HashMap,
  fmt,
  future::Future,
  sync::{Arc, Mutex, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::{
  Error,
  canonical::canonicalize_record,
  gate::{GateConfig, IdempotenceGate, StabilizeRequest, Stabilized},
  hash::ContentId,
  identity::{EntityId, EntityMetadata, ObservationId},
  observation::{Observation, ObservationDraft, ObservationRef, ProducerMetadata, Source},
  reducer::compute_snapshot,
  schema::{EntitySchema, PolicySet, SchemaRegistry},
  snapshot::EntitySnapshot,
  store::{CommitOutcome, ObservationFilter, StoreError, TruthStore},
};

/// Entries are pruned once the lock table grows past this size.
const LOCK_PRUNE_THRESHOLD: usize = 1024;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Either an engine error or a failure of the store backend.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError<E: StoreError> {
  #[error(transparent)]
  Core(#[from] Error),

  #[error("store error: {0}")]
  Store(#[source] E),
}

impl<E: StoreError> ServiceError<E> {
  /// The engine error behind this failure, if any.
  pub fn core(&self) -> Option<&Error> {
    match self {
      Self::Core(e) => Some(e),
      Self::Store(e) => e.as_core(),
    }
  }

  /// Stable snake_case error code; `"store"` for backend failures.
  pub fn code(&self) -> &'static str { self.core().map_or("store", Error::code) }
}

pub type ServiceResult<T, S> =
  std::result::Result<T, ServiceError<<S as TruthStore>::Error>>;

// ─── Requests and results ────────────────────────────────────────────────────

/// A raw submission from a producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
  pub entity_type:       String,
  /// Raw field values; `null` means "not observed".
  pub fields:            Map<String, Value>,
  pub producer:          ProducerMetadata,
  #[serde(default)]
  pub source_refs:       Vec<String>,
  /// Original material to content-address instead of the canonical fields.
  #[serde(default)]
  pub payload:           Option<Value>,
  #[serde(default)]
  pub observed_at:       Option<DateTime<Utc>>,
  #[serde(default)]
  pub specificity_score: u32,
  /// Defaults to the producer tier's priority.
  #[serde(default)]
  pub source_priority:   Option<u16>,
  #[serde(default)]
  pub tenant_id:         Option<String>,
}

pub type Receipt = CommitOutcome;

/// Result of [`TruthLayer::verify_replay`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
  pub entity_id:       EntityId,
  pub schema_version:  u32,
  pub stored_digest:   String,
  pub replayed_digest: String,
  pub matches:         bool,
}

// ─── Per-entity locks ────────────────────────────────────────────────────────

/// One async mutex per entity, created on first use.
#[derive(Debug, Clone, Default)]
pub struct EntityLocks {
  inner: Arc<Mutex<HashMap<EntityId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl EntityLocks {
  pub fn new() -> Self { Self::default() }

  /// Wait for exclusive access to `entity_id`.
  pub async fn acquire(&self, entity_id: &EntityId) -> OwnedMutexGuard<()> {
    let lock = {
      let mut table = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
      if table.len() > LOCK_PRUNE_THRESHOLD {
        // Only the table holds an unused lock.
        table.retain(|_, lock| Arc::strong_count(lock) > 1);
      }
      table.entry(entity_id.clone()).or_default().clone()
    };
    lock.lock_owned().await
  }

  pub fn len(&self) -> usize {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

// ─── TruthLayer ──────────────────────────────────────────────────────────────

pub struct TruthLayer<S> {
  store:     Arc<S>,
  registry:  Arc<RwLock<SchemaRegistry>>,
  locks:     EntityLocks,
  gate:      IdempotenceGate,
  tenant_id: Option<String>,
}

impl<S> fmt::Debug for TruthLayer<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TruthLayer")
      .field("tenant_id", &self.tenant_id)
      .field("gate", &self.gate)
      .finish_non_exhaustive()
  }
}

impl<S: TruthStore> TruthLayer<S> {
  pub fn new(store: S, registry: SchemaRegistry) -> Self {
    Self {
      store:     Arc::new(store),
      registry:  Arc::new(RwLock::new(registry)),
      locks:     EntityLocks::new(),
      gate:      IdempotenceGate::default(),
      tenant_id: None,
    }
  }

  pub fn with_gate(mut self, config: GateConfig) -> Self {
    self.gate = IdempotenceGate::new(config);
    self
  }

  /// Tenant recorded on sources whose submission does not name one.
  pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
    self.tenant_id = Some(tenant_id.into());
    self
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  // ── Ingest ────────────────────────────────────────────────────────────

  /// Canonicalise, resolve and commit one submission. Resubmitting the
  /// same content is a no-op that returns the original ids.
  pub async fn submit(&self, submission: Submission) -> ServiceResult<Receipt, S> {
    let schema = self.active_schema(&submission.entity_type)?;
    let record = canonicalize_record(&schema, &submission.fields)?;

    let observed_at = submission
      .observed_at
      .or(submission.producer.produced_at)
      .unwrap_or_else(Utc::now);
    let source_priority = submission
      .source_priority
      .unwrap_or_else(|| submission.producer.tier.priority());

    let draft = ObservationDraft {
      entity_type: schema.entity_type.clone(),
      schema_version: schema.version,
      identity_value: record.identity_value,
      fields: record.fields,
      producer: submission.producer,
      source_refs: submission.source_refs,
      payload: submission.payload,
      observed_at,
      specificity_score: submission.specificity_score,
      source_priority,
      tenant_id: submission.tenant_id.or_else(|| self.tenant_id.clone()),
    };
    self.commit_draft(draft, schema.policy_set()).await
  }

  /// Run a stochastic producer through the idempotence gate against the
  /// active schema of `request.entity_type`. Nothing is committed.
  pub async fn stabilize<F, Fut, E>(
    &self,
    request: StabilizeRequest,
    producer: F,
  ) -> ServiceResult<Stabilized, S>
  where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<String, E>>,
    E: fmt::Display,
  {
    let schema = self.active_schema(&request.entity_type)?;
    Ok(self.gate.stabilize(&schema, request, producer).await?)
  }

  /// Commit gate output.
  pub async fn submit_stabilized(&self, stabilized: Stabilized) -> ServiceResult<Receipt, S> {
    let schema = self.active_schema(&stabilized.observation.entity_type)?;
    let mut draft = stabilized.into_draft(Utc::now());
    if draft.tenant_id.is_none() {
      draft.tenant_id = self.tenant_id.clone();
    }
    self.commit_draft(draft, schema.policy_set()).await
  }

  async fn commit_draft(
    &self,
    draft: ObservationDraft,
    policies: PolicySet,
  ) -> ServiceResult<Receipt, S> {
    let pending = draft.into_pending(Utc::now())?;
    let entity_id = pending.entity.entity_id.clone();

    let _guard = self.locks.acquire(&entity_id).await;
    debug!(entity_id = %entity_id, "acquired entity lock");

    let outcome = self
      .store
      .commit(pending, policies)
      .await
      .map_err(ServiceError::Store)?;

    info!(
      entity_id = %outcome.entity_id,
      observation_id = %outcome.observation_id,
      content_id = %outcome.content_id,
      deduplicated = outcome.deduplicated,
      "observation committed"
    );
    Ok(outcome)
  }

  /// Re-reduce an entity under `version` (or the active version) and append
  /// the result. Passing an older version is how a policy rollback is
  /// applied to existing entities.
  pub async fn recompute(
    &self,
    entity_id: EntityId,
    version: Option<u32>,
  ) -> ServiceResult<EntitySnapshot, S> {
    let meta = self.get_entity(entity_id.clone()).await?;
    let policies = {
      let registry = self.read_registry();
      let version = match version {
        Some(v) => v,
        None => registry.active_version(&meta.entity_type)?,
      };
      registry.policy_set(&meta.entity_type, version)?
    };

    let _guard = self.locks.acquire(&entity_id).await;
    let snapshot = self
      .store
      .recompute(entity_id, policies)
      .await
      .map_err(ServiceError::Store)?;
    info!(
      entity_id = %snapshot.entity_id,
      schema_version = snapshot.schema_version,
      "snapshot recomputed"
    );
    Ok(snapshot)
  }

  // ── Queries ───────────────────────────────────────────────────────────

  pub async fn get_snapshot(&self, entity_id: EntityId) -> ServiceResult<EntitySnapshot, S> {
    self
      .store
      .get_snapshot(entity_id.clone())
      .await
      .map_err(ServiceError::Store)?
      .ok_or_else(|| Error::EntityNotFound(entity_id).into())
  }

  /// The observation that supplied `field` in the latest snapshot.
  pub async fn get_provenance(
    &self,
    entity_id: EntityId,
    field: &str,
  ) -> ServiceResult<ObservationRef, S> {
    let snapshot = self.get_snapshot(entity_id.clone()).await?;
    let not_resolved = || Error::FieldNotResolved {
      entity_id: entity_id.clone(),
      field:     field.to_owned(),
    };
    let (Some(entry), Some(resolved_value)) =
      (snapshot.provenance_for(field), snapshot.fields.get(field))
    else {
      return Err(not_resolved().into());
    };

    let observation = self
      .store
      .get_observation(entry.observation_id.clone())
      .await
      .map_err(ServiceError::Store)?
      .ok_or_else(not_resolved)?;
    let value = observation.get(field).cloned().ok_or_else(not_resolved)?;

    Ok(ObservationRef {
      entity_id,
      field: field.to_owned(),
      observation_id: observation.observation_id,
      source_id: observation.source_id,
      producer_id: observation.producer_id,
      value,
      resolved_value: resolved_value.clone(),
      contributors: entry.contributors.clone(),
      source_priority: observation.source_priority,
      specificity_score: observation.specificity_score,
      observed_at: observation.observed_at,
    })
  }

  pub async fn list_observations(
    &self,
    entity_id: EntityId,
    filter: &ObservationFilter,
  ) -> ServiceResult<Vec<Observation>, S> {
    self
      .store
      .list_observations(entity_id, filter)
      .await
      .map_err(ServiceError::Store)
  }

  pub async fn get_observation(
    &self,
    observation_id: ObservationId,
  ) -> ServiceResult<Option<Observation>, S> {
    self
      .store
      .get_observation(observation_id)
      .await
      .map_err(ServiceError::Store)
  }

  pub async fn snapshot_history(
    &self,
    entity_id: EntityId,
  ) -> ServiceResult<Vec<EntitySnapshot>, S> {
    self
      .store
      .snapshot_history(entity_id)
      .await
      .map_err(ServiceError::Store)
  }

  pub async fn get_entity(&self, entity_id: EntityId) -> ServiceResult<EntityMetadata, S> {
    self
      .store
      .get_entity(entity_id.clone())
      .await
      .map_err(ServiceError::Store)?
      .ok_or_else(|| Error::EntityNotFound(entity_id).into())
  }

  pub async fn list_entities(
    &self,
    entity_type: Option<String>,
  ) -> ServiceResult<Vec<EntityMetadata>, S> {
    self
      .store
      .list_entities(entity_type)
      .await
      .map_err(ServiceError::Store)
  }

  pub async fn get_source(&self, content_id: ContentId) -> ServiceResult<Option<Source>, S> {
    self
      .store
      .get_source(content_id)
      .await
      .map_err(ServiceError::Store)
  }

  /// Recompute the latest snapshot from the stored observations without
  /// persisting anything, and compare digests.
  pub async fn verify_replay(&self, entity_id: EntityId) -> ServiceResult<ReplayReport, S> {
    // Both reads must see the same commit.
    let _guard = self.locks.acquire(&entity_id).await;
    let stored = self.get_snapshot(entity_id.clone()).await?;
    let observations = self
      .list_observations(entity_id.clone(), &ObservationFilter::default())
      .await?;
    let policies = self
      .read_registry()
      .policy_set(&stored.entity_type, stored.schema_version)?;

    let replayed = compute_snapshot(&entity_id, &observations, &policies)?;
    let stored_digest = stored.digest()?;
    let replayed_digest = replayed.digest()?;
    Ok(ReplayReport {
      entity_id,
      schema_version: stored.schema_version,
      matches: stored_digest == replayed_digest,
      stored_digest,
      replayed_digest,
    })
  }

  // ── Registry ──────────────────────────────────────────────────────────

  /// Publish a schema version. Returns `false` if the identical version was
  /// already published.
  pub fn publish_schema(&self, schema: EntitySchema) -> crate::Result<bool> {
    let (entity_type, version) = (schema.entity_type.clone(), schema.version);
    let published = self.write_registry().publish(schema)?;
    if published {
      info!(entity_type, version, "schema published");
    }
    Ok(published)
  }

  /// Point `entity_type` at `version`. Existing snapshots are untouched
  /// until recomputed.
  pub fn activate_schema(&self, entity_type: &str, version: u32) -> crate::Result<()> {
    self.write_registry().activate(entity_type, version)?;
    info!(entity_type, version, "schema activated");
    Ok(())
  }

  pub fn schema(
    &self,
    entity_type: &str,
    version: Option<u32>,
  ) -> crate::Result<Arc<EntitySchema>> {
    let registry = self.read_registry();
    match version {
      Some(v) => registry.get(entity_type, v),
      None => registry.active(entity_type),
    }
  }

  pub fn entity_types(&self) -> Vec<String> { self.read_registry().entity_types() }

  fn active_schema(&self, entity_type: &str) -> crate::Result<Arc<EntitySchema>> {
    self.read_registry().active(entity_type)
  }

  fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, SchemaRegistry> {
    self.registry.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, SchemaRegistry> {
    self.registry.write().unwrap_or_else(PoisonError::into_inner)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use chrono::TimeZone as _;
  use serde_json::json;

  use super::*;
  use crate::{
    canonical::CanonicalValue,
    memory::MemoryStore,
    observation::SourceTier,
    schema::{FieldSpec, FieldType, MergeStrategy},
  };

  fn invoice_v1() -> EntitySchema {
    EntitySchema::new("invoice", 1, "number")
      .with_field(
        "number",
        FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins).case_insensitive(),
      )
      .with_field(
        "amount",
        FieldSpec::new(FieldType::Decimal, MergeStrategy::HighestPriority),
      )
      .with_field(
        "status",
        FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins).case_insensitive(),
      )
  }

  fn layer() -> TruthLayer<MemoryStore> {
    let mut registry = SchemaRegistry::new();
    registry.publish(invoice_v1()).unwrap();
    TruthLayer::new(MemoryStore::new(), registry)
  }

  fn submission(fields: Value, priority: u16, observed: i64) -> Submission {
    Submission {
      entity_type:       "invoice".into(),
      fields:            fields.as_object().cloned().unwrap(),
      producer:          ProducerMetadata::new("erp", "1.0", SourceTier::Integration),
      source_refs:       vec![],
      payload:           None,
      observed_at:       Some(Utc.timestamp_opt(observed, 0).unwrap()),
      specificity_score: 0,
      source_priority:   Some(priority),
      tenant_id:         None,
    }
  }

  fn amount(s: &str) -> CanonicalValue { CanonicalValue::Decimal(s.parse().unwrap()) }

  #[tokio::test]
  async fn resubmission_is_a_noop() {
    let layer = layer();
    let sub = submission(json!({"number": "INV-1", "amount": "100"}), 5, 100);
    let first = layer.submit(sub.clone()).await.unwrap();
    let second = layer.submit(sub).await.unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(first.observation_id, second.observation_id);
    assert_eq!(layer.snapshot_history(first.entity_id).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn identity_converges_across_formatting() {
    let layer = layer();
    let a = layer
      .submit(submission(json!({"number": "INV-1", "amount": 1}), 1, 100))
      .await
      .unwrap();
    let b = layer
      .submit(submission(json!({"number": "  inv-1 ", "status": "PAID"}), 1, 200))
      .await
      .unwrap();
    assert_eq!(a.entity_id, b.entity_id);
    assert_eq!(b.snapshot.observation_count, 2);
    assert_eq!(b.snapshot.fields["status"], CanonicalValue::Text("paid".into()));
    assert_eq!(layer.list_entities(None).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn higher_priority_correction_wins_with_provenance() {
    let layer = layer();
    layer
      .submit(submission(json!({"number": "INV-1", "amount": "100.00"}), 1, 100))
      .await
      .unwrap();
    let fix = layer
      .submit(submission(json!({"number": "INV-1", "amount": "150"}), 5, 200))
      .await
      .unwrap();

    let snapshot = layer.get_snapshot(fix.entity_id.clone()).await.unwrap();
    assert_eq!(snapshot.fields["amount"], amount("150.00"));

    let prov = layer.get_provenance(fix.entity_id.clone(), "amount").await.unwrap();
    assert_eq!(prov.observation_id, fix.observation_id);
    assert_eq!(prov.source_priority, 5);

    let err = layer.get_provenance(fix.entity_id, "status").await.unwrap_err();
    assert_eq!(err.code(), "field_not_resolved");
  }

  #[tokio::test]
  async fn malformed_input_is_rejected_before_commit() {
    let layer = layer();
    let err = layer
      .submit(submission(json!({"number": "INV-1", "amount": "a lot"}), 1, 100))
      .await
      .unwrap_err();
    assert_eq!(err.code(), "malformed_value");

    let err = layer
      .submit(submission(json!({"number": "INV-1", "colour": "red"}), 1, 100))
      .await
      .unwrap_err();
    assert_eq!(err.code(), "unknown_field_policy");
    assert!(layer.list_entities(None).await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn rollback_recomputes_under_older_policies() {
    let layer = layer();
    let v2 = EntitySchema {
      version: 2,
      ..invoice_v1()
    }
    .with_field(
      "amount",
      FieldSpec::new(FieldType::Decimal, MergeStrategy::LastWriteWins),
    )
    .with_field(
      "currency",
      FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins),
    );
    assert!(layer.publish_schema(v2).unwrap());

    layer
      .submit(submission(json!({"number": "INV-1", "amount": "100"}), 9, 100))
      .await
      .unwrap();
    let late = layer
      .submit(submission(
        json!({"number": "INV-1", "amount": "80", "currency": "EUR"}),
        1,
        200,
      ))
      .await
      .unwrap();
    assert_eq!(late.snapshot.schema_version, 2);
    assert_eq!(late.snapshot.fields["amount"], amount("80.00"));

    layer.activate_schema("invoice", 1).unwrap();
    let rolled_back = layer.recompute(late.entity_id.clone(), None).await.unwrap();
    assert_eq!(rolled_back.schema_version, 1);
    assert_eq!(rolled_back.fields["amount"], amount("100.00"));
    assert!(!rolled_back.fields.contains_key("currency"));

    let history = layer.snapshot_history(late.entity_id.clone()).await.unwrap();
    assert_eq!(history.len(), 3);

    let report = layer.verify_replay(late.entity_id).await.unwrap();
    assert!(report.matches);
  }

  #[tokio::test]
  async fn stabilized_output_commits_at_lowest_priority() {
    let layer = layer();
    let request = StabilizeRequest {
      entity_type:       "invoice".into(),
      producer:          ProducerMetadata::new("extractor", "m-1", SourceTier::AiUnverified),
      source_refs:       vec!["doc://invoices/1.pdf".into()],
      observed_at:       Some(Utc.timestamp_opt(100, 0).unwrap()),
      specificity_score: 0,
      previous_hash:     None,
      tenant_id:         None,
    };
    let stabilized = layer
      .stabilize(request, |_| async { Ok::<_, String>(r#"{"number": "INV-9"}"#.into()) })
      .await
      .unwrap();
    let receipt = layer.submit_stabilized(stabilized).await.unwrap();
    let obs = layer
      .get_observation(receipt.observation_id)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(obs.source_priority, 0);
  }

  #[tokio::test]
  async fn concurrent_commits_to_one_entity_are_serialised() {
    let layer = Arc::new(layer());
    let mut handles = Vec::new();
    for i in 0..16 {
      let layer = Arc::clone(&layer);
      handles.push(tokio::spawn(async move {
        let sub = submission(json!({"number": "INV-1", "amount": i}), 1, 100 + i);
        layer.submit(sub).await.unwrap()
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    let entity_id = crate::identity::resolve_entity_id("invoice", "inv-1");
    let history = layer.snapshot_history(entity_id.clone()).await.unwrap();
    let counts: Vec<u64> = history.iter().map(|s| s.observation_count).collect();
    assert_eq!(counts, (1..=16).collect::<Vec<_>>());
    assert!(layer.verify_replay(entity_id).await.unwrap().matches);
  }

  #[tokio::test]
  async fn replay_checks_agree_with_concurrent_writers() {
    let layer = Arc::new(layer());
    let first = layer
      .submit(submission(json!({"number": "INV-1", "amount": 0}), 1, 100))
      .await
      .unwrap();

    let mut writers = Vec::new();
    for i in 1..12 {
      let layer = Arc::clone(&layer);
      writers.push(tokio::spawn(async move {
        let sub = submission(json!({"number": "INV-1", "amount": i}), 1, 100 + i);
        layer.submit(sub).await.unwrap();
      }));
    }
    let mut checks = Vec::new();
    for _ in 0..12 {
      let layer = Arc::clone(&layer);
      let entity_id = first.entity_id.clone();
      checks.push(tokio::spawn(async move {
        layer.verify_replay(entity_id).await.unwrap().matches
      }));
    }

    for writer in writers {
      writer.await.unwrap();
    }
    for check in checks {
      assert!(check.await.unwrap());
    }
  }

  #[tokio::test]
  async fn one_payload_yields_observations_for_several_entities() {
    let layer = layer();
    let shared = |number: &str| Submission {
      payload:     Some(json!({ "file": "batch-7.pdf" })),
      source_refs: vec!["doc://batches/7.pdf".into()],
      ..submission(json!({ "number": number, "amount": "10" }), 1, 100)
    };

    let one = layer.submit(shared("INV-1")).await.unwrap();
    let two = layer.submit(shared("INV-2")).await.unwrap();

    assert!(!one.deduplicated && !two.deduplicated);
    assert_eq!(one.content_id, two.content_id);
    assert_eq!(one.entity_id, crate::identity::resolve_entity_id("invoice", "inv-1"));
    assert_eq!(two.entity_id, crate::identity::resolve_entity_id("invoice", "inv-2"));
    assert_eq!(layer.list_entities(None).await.unwrap().len(), 2);
    assert!(layer.get_source(one.content_id).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn entity_locks_exclude_per_entity() {
    let locks = EntityLocks::new();
    let a = crate::identity::resolve_entity_id("invoice", "a");
    let b = crate::identity::resolve_entity_id("invoice", "b");

    let held = locks.acquire(&a).await;
    // A different entity is not blocked.
    let _other = locks.acquire(&b).await;
    let blocked = tokio::time::timeout(Duration::from_millis(20), locks.acquire(&a)).await;
    assert!(blocked.is_err());
    drop(held);
    assert!(tokio::time::timeout(Duration::from_millis(20), locks.acquire(&a)).await.is_ok());
    assert_eq!(locks.len(), 2);
  }
}
