//! Sources and observations, the append-only input side of the engine.
//!
//! A [`Source`] is an immutable unit of ingested material addressed by its
//! [`ContentId`]. An [`Observation`] is one granular, provenance-tagged fact
//! derived from a source. Neither is ever updated: corrections arrive as new
//! observations with a higher `source_priority`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
  Result,
  canonical::CanonicalValue,
  hash::{self, ContentId},
  identity::{EntityId, EntityMetadata, ObservationId, derive_observation_id},
};

/// Canonical field values keyed by field name.
pub type FieldMap = BTreeMap<String, CanonicalValue>;

// ─── Producers ───────────────────────────────────────────────────────────────

/// Trust tier of a producer. Ordered from least to most trusted.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
  /// Stochastic output (e.g. an AI extractor) that nobody has checked.
  #[default]
  AiUnverified,
  /// An automated integration with an external system of record.
  Integration,
  /// Entered or reviewed by a person.
  Human,
  /// Confirmed against an authoritative document.
  Verified,
}

impl SourceTier {
  /// Default `source_priority` for observations from this tier.
  pub fn priority(self) -> u16 {
    match self {
      Self::AiUnverified => 0,
      Self::Integration => 10,
      Self::Human => 20,
      Self::Verified => 30,
    }
  }
}

/// Who produced a unit of source material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerMetadata {
  pub producer_id:      String,
  pub producer_version: String,
  #[serde(default)]
  pub tier:             SourceTier,
  /// When the producer generated its output, if it says so. Not part of
  /// the content id.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub produced_at:      Option<DateTime<Utc>>,
}

impl ProducerMetadata {
  pub fn new(
    producer_id: impl Into<String>,
    producer_version: impl Into<String>,
    tier: SourceTier,
  ) -> Self {
    Self {
      producer_id: producer_id.into(),
      producer_version: producer_version.into(),
      tier,
      produced_at: None,
    }
  }
}

// ─── Source ──────────────────────────────────────────────────────────────────

/// An immutable unit of ingested material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
  pub content_id:  ContentId,
  pub payload:     Value,
  pub producer:    ProducerMetadata,
  pub source_refs: Vec<String>,
  pub ingested_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tenant_id:   Option<String>,
}

// ─── Observation ─────────────────────────────────────────────────────────────

/// An immutable, source-specific fact about one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
  pub observation_id:    ObservationId,
  pub entity_id:         EntityId,
  pub entity_type:       String,
  pub schema_version:    u32,
  pub source_id:         ContentId,
  pub producer_id:       String,
  pub producer_version:  String,
  pub fields:            FieldMap,
  /// How precise this fact is; higher wins under `most_specific`.
  pub specificity_score: u32,
  /// Trust of the producer; higher wins under `highest_priority`.
  pub source_priority:   u16,
  pub observed_at:       DateTime<Utc>,
}

impl Observation {
  pub fn get(&self, field: &str) -> Option<&CanonicalValue> { self.fields.get(field) }
}

/// A pointer from a resolved snapshot field back to its observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRef {
  pub entity_id:         EntityId,
  pub field:             String,
  pub observation_id:    ObservationId,
  pub source_id:         ContentId,
  pub producer_id:       String,
  /// The value this observation holds for the field.
  pub value:             CanonicalValue,
  /// The resolved snapshot value; differs from `value` for `merge_array`.
  pub resolved_value:    CanonicalValue,
  /// Every observation that contributed to a `merge_array` value.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub contributors:      Vec<ObservationId>,
  pub source_priority:   u16,
  pub specificity_score: u32,
  pub observed_at:       DateTime<Utc>,
}

// ─── Drafts and commits ──────────────────────────────────────────────────────

/// A fully canonicalised observation that has not been assigned ids yet.
#[derive(Debug, Clone)]
pub struct ObservationDraft {
  pub entity_type:       String,
  pub schema_version:    u32,
  /// Canonical rendering of the identity field.
  pub identity_value:    String,
  pub fields:            FieldMap,
  pub producer:          ProducerMetadata,
  pub source_refs:       Vec<String>,
  /// Raw material to hash instead of the canonical fields.
  pub payload:           Option<Value>,
  pub observed_at:       DateTime<Utc>,
  pub specificity_score: u32,
  pub source_priority:   u16,
  pub tenant_id:         Option<String>,
}

impl ObservationDraft {
  /// Derive every content-addressed id and build the records to commit.
  ///
  /// Without an explicit payload the content id covers the entity type and
  /// the canonical fields, so differently formatted but equivalent input
  /// deduplicates.
  pub fn into_pending(self, ingested_at: DateTime<Utc>) -> Result<PendingCommit> {
    let entity =
      EntityMetadata::new(&self.entity_type, &self.identity_value, self.observed_at);
    let canonical_field_hash = hash::field_hash(&self.fields)?;

    let payload = match self.payload {
      Some(p) => p,
      None => json!({
        "entity_type": self.entity_type,
        "fields":      serde_json::to_value(&self.fields)?,
      }),
    };
    let source_refs = hash::normalize_source_refs(&self.source_refs);
    let content_id = hash::compute_content_id(&self.producer, &payload, &source_refs)?;
    let observation_id = derive_observation_id(
      &entity.entity_id,
      &content_id,
      &self.producer.producer_version,
      &canonical_field_hash,
    );

    let observation = Observation {
      observation_id,
      entity_id: entity.entity_id.clone(),
      entity_type: self.entity_type,
      schema_version: self.schema_version,
      source_id: content_id.clone(),
      producer_id: self.producer.producer_id.clone(),
      producer_version: self.producer.producer_version.clone(),
      fields: self.fields,
      specificity_score: self.specificity_score,
      source_priority: self.source_priority,
      observed_at: self.observed_at,
    };

    let source = Source {
      content_id,
      payload,
      producer: self.producer,
      source_refs,
      ingested_at,
      tenant_id: self.tenant_id,
    };

    Ok(PendingCommit { source, entity, observation })
  }
}

/// Everything a store writes for one ingestion, in one transaction.
#[derive(Debug, Clone)]
pub struct PendingCommit {
  pub source:      Source,
  /// Metadata inserted only if the entity has never been observed.
  pub entity:      EntityMetadata,
  pub observation: Observation,
}
