//! The reducer: a pure function from an observation set and a policy set to
//! an [`EntitySnapshot`].
//!
//! Given the same observations and the same policies, the output is
//! byte-identical regardless of input order, host, or wall clock. No clock
//! is read; `computed_at` is the latest `observed_at` among the inputs.

use std::{cmp::Ordering, collections::BTreeSet};

use tracing::{debug, warn};

use crate::{
  Error, Result,
  canonical::CanonicalValue,
  identity::{EntityId, ObservationId},
  observation::{FieldMap, Observation},
  schema::{MergePolicy, MergeStrategy, PolicySet, TieBreaker},
  snapshot::{EntitySnapshot, Provenance, ProvenanceEntry},
};

/// Reduce `observations` of `entity_id` under `policies`.
pub fn compute_snapshot(
  entity_id: &EntityId,
  observations: &[Observation],
  policies: &PolicySet,
) -> Result<EntitySnapshot> {
  if observations.is_empty() {
    return Err(Error::EmptyObservationSet(entity_id.clone()));
  }
  for obs in observations {
    if obs.entity_id != *entity_id || obs.entity_type != policies.entity_type {
      return Err(Error::EntityMismatch {
        expected:       entity_id.clone(),
        observation_id: obs.observation_id.clone(),
      });
    }
  }

  let mut ordered: Vec<&Observation> = observations.iter().collect();
  ordered.sort_by(|a, b| recency(a, b));

  let field_names: BTreeSet<&str> = ordered
    .iter()
    .flat_map(|o| o.fields.keys().map(String::as_str))
    .collect();

  let mut fields = FieldMap::new();
  let mut provenance = Provenance::new();

  for name in field_names {
    let candidates: Vec<&Observation> = ordered
      .iter()
      .copied()
      .filter(|o| o.fields.contains_key(name))
      .collect();

    let Some(policy) = policies.get(name) else {
      // Fields introduced by a schema version newer than the one being
      // replayed are dropped; anything else is a configuration error.
      if candidates
        .iter()
        .all(|o| o.schema_version > policies.schema_version)
      {
        warn!(
          entity_id = %entity_id,
          field = name,
          schema_version = policies.schema_version,
          "skipping field from a newer schema version"
        );
        continue;
      }
      return Err(Error::UnknownFieldPolicy {
        entity_type:    policies.entity_type.clone(),
        field:          name.to_owned(),
        schema_version: policies.schema_version,
      });
    };

    let (value, entry) = resolve_field(name, &candidates, policy);
    fields.insert(name.to_owned(), value);
    provenance.insert(name.to_owned(), entry);
  }

  // `ordered` is non-empty, so the head is the latest observation.
  let computed_at = ordered[0].observed_at;

  debug!(
    entity_id = %entity_id,
    observations = observations.len(),
    fields = fields.len(),
    schema_version = policies.schema_version,
    "reduced snapshot"
  );

  Ok(EntitySnapshot {
    entity_id: entity_id.clone(),
    entity_type: policies.entity_type.clone(),
    schema_version: policies.schema_version,
    fields,
    provenance,
    computed_at,
    observation_count: observations.len() as u64,
  })
}

/// `candidates` is non-empty and already in recency order.
fn resolve_field(
  name: &str,
  candidates: &[&Observation],
  policy: &MergePolicy,
) -> (CanonicalValue, ProvenanceEntry) {
  if policy.strategy == MergeStrategy::MergeArray {
    return merge_array(name, candidates);
  }

  let winner = candidates
    .iter()
    .copied()
    .min_by(|a, b| rank(policy, a, b))
    .unwrap_or(candidates[0]);

  let value = winner.fields[name].clone();
  (value, ProvenanceEntry {
    observation_id: winner.observation_id.clone(),
    contributors:   Vec::new(),
  })
}

fn merge_array(
  name: &str,
  candidates: &[&Observation],
) -> (CanonicalValue, ProvenanceEntry) {
  let mut items = BTreeSet::new();
  for obs in candidates {
    match &obs.fields[name] {
      CanonicalValue::List(values) => items.extend(values.iter().cloned()),
      other => {
        items.insert(other.clone());
      }
    }
  }

  let mut contributors: Vec<ObservationId> =
    candidates.iter().map(|o| o.observation_id.clone()).collect();
  contributors.sort();
  contributors.dedup();

  (CanonicalValue::List(items.into_iter().collect()), ProvenanceEntry {
    observation_id: candidates[0].observation_id.clone(),
    contributors,
  })
}

/// Total order where `Less` means "preferred".
fn rank(policy: &MergePolicy, a: &Observation, b: &Observation) -> Ordering {
  let primary = match policy.strategy {
    MergeStrategy::HighestPriority => b.source_priority.cmp(&a.source_priority),
    MergeStrategy::MostSpecific => b.specificity_score.cmp(&a.specificity_score),
    MergeStrategy::LastWriteWins | MergeStrategy::MergeArray => Ordering::Equal,
  };
  let tie_breaker = match policy.tie_breaker {
    Some(TieBreaker::SourcePriority) => b.source_priority.cmp(&a.source_priority),
    Some(TieBreaker::Specificity) => b.specificity_score.cmp(&a.specificity_score),
    None => Ordering::Equal,
  };
  primary.then(tie_breaker).then_with(|| recency(a, b))
}

/// `observed_at DESC, observation_id ASC`.
fn recency(a: &Observation, b: &Observation) -> Ordering {
  b.observed_at
    .cmp(&a.observed_at)
    .then_with(|| a.observation_id.cmp(&b.observation_id))
}
