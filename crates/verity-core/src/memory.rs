//! In-process [`TruthStore`] backed by `tokio::sync::RwLock`-guarded maps.
//!
//! Same semantics as the SQLite backend, without durability. Useful for
//! tests and for embedding the engine in short-lived processes.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;
use tracing::info;

use crate::{
  Error, Result,
  hash::ContentId,
  identity::{EntityId, EntityIndex, EntityMetadata, ObservationId},
  observation::{Observation, PendingCommit, Source},
  reducer::compute_snapshot,
  schema::PolicySet,
  snapshot::EntitySnapshot,
  store::{CommitOutcome, ObservationFilter, TruthStore},
};

#[derive(Debug, Default)]
struct State {
  /// Shared by every observation derived from the same material.
  sources:      HashMap<ContentId, Source>,
  entities:     EntityIndex,
  observations: HashMap<ObservationId, Observation>,
  by_entity:    HashMap<EntityId, Vec<ObservationId>>,
  snapshots:    BTreeMap<EntityId, Vec<EntitySnapshot>>,
}

impl State {
  fn entity_observations(&self, entity_id: &EntityId) -> Vec<Observation> {
    let mut out: Vec<Observation> = self
      .by_entity
      .get(entity_id)
      .into_iter()
      .flatten()
      .filter_map(|id| self.observations.get(id).cloned())
      .collect();
    out.sort_by(|a, b| {
      b.observed_at
        .cmp(&a.observed_at)
        .then_with(|| a.observation_id.cmp(&b.observation_id))
    });
    out
  }

  fn latest_snapshot(&self, entity_id: &EntityId) -> Option<&EntitySnapshot> {
    self.snapshots.get(entity_id).and_then(|h| h.last())
  }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
  state: RwLock<State>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }
}

impl TruthStore for MemoryStore {
  type Error = Error;

  async fn commit(
    &self,
    pending: PendingCommit,
    policies: PolicySet,
  ) -> Result<CommitOutcome> {
    let mut state = self.state.write().await;
    let content_id = pending.source.content_id.clone();

    let observation_id = pending.observation.observation_id.clone();
    if let Some(existing) = state.observations.get(&observation_id) {
      let entity_id = existing.entity_id.clone();
      let snapshot = state
        .latest_snapshot(&entity_id)
        .cloned()
        .ok_or_else(|| Error::EntityNotFound(entity_id.clone()))?;
      return Ok(CommitOutcome {
        entity_id,
        observation_id,
        content_id,
        deduplicated: true,
        snapshot,
      });
    }

    // Reduce before touching the maps so a failure leaves them unchanged.
    let observation = pending.observation;
    let entity_id = observation.entity_id.clone();
    let mut set = state.entity_observations(&entity_id);
    set.push(observation.clone());
    let snapshot = compute_snapshot(&entity_id, &set, &policies)?;

    state.sources.entry(content_id.clone()).or_insert(pending.source);
    state.entities.observe(pending.entity);
    state
      .by_entity
      .entry(entity_id.clone())
      .or_default()
      .push(observation_id.clone());
    state
      .observations
      .insert(observation_id.clone(), observation);
    state
      .snapshots
      .entry(entity_id.clone())
      .or_default()
      .push(snapshot.clone());

    info!(
      entity_id = %entity_id,
      observation_id = %observation_id,
      observations = snapshot.observation_count,
      "committed observation"
    );

    Ok(CommitOutcome {
      entity_id,
      observation_id,
      content_id,
      deduplicated: false,
      snapshot,
    })
  }

  async fn recompute(
    &self,
    entity_id: EntityId,
    policies: PolicySet,
  ) -> Result<EntitySnapshot> {
    let mut state = self.state.write().await;
    if !state.entities.contains(&entity_id) {
      return Err(Error::EntityNotFound(entity_id));
    }
    let set = state.entity_observations(&entity_id);
    let snapshot = compute_snapshot(&entity_id, &set, &policies)?;
    state
      .snapshots
      .entry(entity_id)
      .or_default()
      .push(snapshot.clone());
    Ok(snapshot)
  }

  async fn get_source(&self, content_id: ContentId) -> Result<Option<Source>> {
    Ok(self.state.read().await.sources.get(&content_id).cloned())
  }

  async fn get_entity(&self, entity_id: EntityId) -> Result<Option<EntityMetadata>> {
    Ok(self.state.read().await.entities.get(&entity_id).cloned())
  }

  async fn list_entities(
    &self,
    entity_type: Option<String>,
  ) -> Result<Vec<EntityMetadata>> {
    Ok(self.state.read().await.entities.list(entity_type.as_deref()))
  }

  async fn get_observation(
    &self,
    observation_id: ObservationId,
  ) -> Result<Option<Observation>> {
    Ok(
      self
        .state
        .read()
        .await
        .observations
        .get(&observation_id)
        .cloned(),
    )
  }

  async fn list_observations<'a>(
    &'a self,
    entity_id: EntityId,
    filter: &'a ObservationFilter,
  ) -> Result<Vec<Observation>> {
    let state = self.state.read().await;
    let matching = state
      .entity_observations(&entity_id)
      .into_iter()
      .filter(|o| filter.matches(o));
    Ok(match filter.limit {
      Some(n) => matching.take(n).collect(),
      None => matching.collect(),
    })
  }

  async fn get_snapshot(&self, entity_id: EntityId) -> Result<Option<EntitySnapshot>> {
    Ok(self.state.read().await.latest_snapshot(&entity_id).cloned())
  }

  async fn snapshot_history(&self, entity_id: EntityId) -> Result<Vec<EntitySnapshot>> {
    Ok(
      self
        .state
        .read()
        .await
        .snapshots
        .get(&entity_id)
        .cloned()
        .unwrap_or_default(),
    )
  }
}

#[cfg(test)]
mod tests {
  use chrono::{DateTime, TimeZone as _, Utc};

  use super::*;
  use crate::{
    canonical::CanonicalValue,
    observation::{FieldMap, ObservationDraft, ProducerMetadata, SourceTier},
    schema::{EntitySchema, FieldSpec, FieldType, MergeStrategy},
  };

  fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

  fn policies() -> PolicySet {
    EntitySchema::new("person", 1, "email")
      .with_field("email", FieldSpec::new(FieldType::Email, MergeStrategy::LastWriteWins))
      .with_field("title", FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins))
      .policy_set()
  }

  fn pending(producer: &str, observed: i64, extra: &[(&str, &str)]) -> PendingCommit {
    let mut fields = FieldMap::from([(
      "email".to_owned(),
      CanonicalValue::Text("ada@example.com".into()),
    )]);
    for (k, v) in extra {
      fields.insert((*k).to_owned(), CanonicalValue::Text((*v).into()));
    }
    ObservationDraft {
      entity_type:       "person".into(),
      schema_version:    1,
      identity_value:    "ada@example.com".into(),
      fields,
      producer:          ProducerMetadata::new(producer, "1", SourceTier::Human),
      source_refs:       vec![],
      payload:           None,
      observed_at:       at(observed),
      specificity_score: 0,
      source_priority:   20,
      tenant_id:         None,
    }
    .into_pending(at(1_000))
    .unwrap()
  }

  #[tokio::test]
  async fn duplicate_commit_is_a_no_op() {
    let store = MemoryStore::new();
    let first = store.commit(pending("hr", 10, &[]), policies()).await.unwrap();
    let again = store.commit(pending("hr", 10, &[]), policies()).await.unwrap();

    assert!(again.deduplicated);
    assert_eq!(again.observation_id, first.observation_id);
    assert_eq!(store.snapshot_history(first.entity_id).await.unwrap().len(), 1);
  }

  /// One contact sheet naming `email`, shared by every caller.
  fn from_sheet(email: &str) -> PendingCommit {
    ObservationDraft {
      entity_type:       "person".into(),
      schema_version:    1,
      identity_value:    email.into(),
      fields:            FieldMap::from([(
        "email".to_owned(),
        CanonicalValue::Text(email.into()),
      )]),
      producer:          ProducerMetadata::new("ocr", "1", SourceTier::Integration),
      source_refs:       vec!["s3://sheets/7.pdf".into()],
      payload:           Some(serde_json::json!({ "pages": 1, "file": "7.pdf" })),
      observed_at:       at(10),
      specificity_score: 0,
      source_priority:   10,
      tenant_id:         None,
    }
    .into_pending(at(1_000))
    .unwrap()
  }

  #[tokio::test]
  async fn one_source_feeds_many_entities() {
    let store = MemoryStore::new();
    let ada = from_sheet("ada@example.com");
    let grace = from_sheet("grace@example.com");
    assert_eq!(ada.source.content_id, grace.source.content_id);

    let first = store.commit(ada.clone(), policies()).await.unwrap();
    let second = store.commit(grace.clone(), policies()).await.unwrap();

    assert!(!first.deduplicated);
    assert!(!second.deduplicated);
    assert_eq!(first.entity_id, ada.entity.entity_id);
    assert_eq!(second.entity_id, grace.entity.entity_id);
    assert_ne!(first.observation_id, second.observation_id);
    assert_eq!(first.content_id, second.content_id);
    assert_eq!(store.list_entities(None).await.unwrap().len(), 2);
    assert_eq!(store.state.read().await.sources.len(), 1);

    let replay = store.commit(grace, policies()).await.unwrap();
    assert!(replay.deduplicated);
    assert_eq!(replay.entity_id, second.entity_id);
    assert_eq!(replay.observation_id, second.observation_id);
  }

  #[tokio::test]
  async fn failed_reduction_changes_nothing() {
    let store = MemoryStore::new();
    let first = store.commit(pending("hr", 10, &[]), policies()).await.unwrap();

    let bad = pending("hr", 20, &[("nickname", "countess")]);
    let bad_source = bad.source.content_id.clone();
    let err = store.commit(bad, policies()).await.unwrap_err();
    assert!(matches!(err, Error::UnknownFieldPolicy { .. }), "{err}");

    assert!(store.get_source(bad_source).await.unwrap().is_none());
    let all = store
      .list_observations(first.entity_id.clone(), &ObservationFilter::default())
      .await
      .unwrap();
    assert_eq!(all.len(), 1);
  }

  #[tokio::test]
  async fn listing_is_recent_first_and_limited() {
    let store = MemoryStore::new();
    store.commit(pending("a", 10, &[("title", "analyst")]), policies()).await.unwrap();
    let out = store
      .commit(pending("b", 30, &[("title", "countess")]), policies())
      .await
      .unwrap();
    store.commit(pending("c", 20, &[]), policies()).await.unwrap();

    let filter = ObservationFilter { limit: Some(2), ..Default::default() };
    let rows = store.list_observations(out.entity_id.clone(), &filter).await.unwrap();
    let producers: Vec<&str> = rows.iter().map(|o| o.producer_id.as_str()).collect();
    assert_eq!(producers, ["b", "c"]);

    let snap = store.get_snapshot(out.entity_id).await.unwrap().unwrap();
    assert_eq!(snap.fields["title"], CanonicalValue::Text("countess".into()));
    assert_eq!(snap.observation_count, 3);
  }

  #[tokio::test]
  async fn recompute_requires_a_known_entity() {
    let store = MemoryStore::new();
    let unknown = crate::identity::resolve_entity_id("person", "nobody@example.com");
    assert!(matches!(
      store.recompute(unknown, policies()).await,
      Err(Error::EntityNotFound(_))
    ));
  }
}
