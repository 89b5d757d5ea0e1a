//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as fixed-width RFC 3339 UTC strings. Canonical
//! field maps, provenance and payloads are stored as compact JSON.
//! Identifiers are stored in their rendered, prefixed form.

use chrono::{DateTime, SecondsFormat, Utc};
use verity_core::{
  hash::ContentId,
  identity::{EntityId, EntityMetadata, ObservationId},
  observation::{FieldMap, Observation, ProducerMetadata, Source, SourceTier},
  snapshot::{EntitySnapshot, Provenance},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── SourceTier ──────────────────────────────────────────────────────────────

pub fn encode_tier(tier: SourceTier) -> &'static str {
  match tier {
    SourceTier::AiUnverified => "ai_unverified",
    SourceTier::Integration => "integration",
    SourceTier::Human => "human",
    SourceTier::Verified => "verified",
  }
}

pub fn decode_tier(s: &str) -> Result<SourceTier> {
  match s {
    "ai_unverified" => Ok(SourceTier::AiUnverified),
    "integration" => Ok(SourceTier::Integration),
    "human" => Ok(SourceTier::Human),
    "verified" => Ok(SourceTier::Verified),
    other => Err(Error::Corrupt(format!("unknown source tier: {other:?}"))),
  }
}

// ─── Integers ────────────────────────────────────────────────────────────────

fn decode_int<T: TryFrom<i64>>(column: &str, v: i64) -> Result<T> {
  T::try_from(v).map_err(|_| Error::Corrupt(format!("{column} out of range: {v}")))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `sources` row.
pub struct RawSource {
  pub content_id:       String,
  pub payload:          String,
  pub producer_id:      String,
  pub producer_version: String,
  pub producer_tier:    String,
  pub produced_at:      Option<String>,
  pub source_refs:      String,
  pub ingested_at:      String,
  pub tenant_id:        Option<String>,
}

impl RawSource {
  pub const COLUMNS: &'static str = "content_id, payload, producer_id, producer_version, \
     producer_tier, produced_at, source_refs, ingested_at, tenant_id";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      content_id:       row.get(0)?,
      payload:          row.get(1)?,
      producer_id:      row.get(2)?,
      producer_version: row.get(3)?,
      producer_tier:    row.get(4)?,
      produced_at:      row.get(5)?,
      source_refs:      row.get(6)?,
      ingested_at:      row.get(7)?,
      tenant_id:        row.get(8)?,
    })
  }

  pub fn into_source(self) -> Result<Source> {
    Ok(Source {
      content_id:  ContentId::parse(&self.content_id)?,
      payload:     serde_json::from_str(&self.payload)?,
      producer:    ProducerMetadata {
        producer_id:      self.producer_id,
        producer_version: self.producer_version,
        tier:             decode_tier(&self.producer_tier)?,
        produced_at:      self.produced_at.as_deref().map(decode_dt).transpose()?,
      },
      source_refs: serde_json::from_str(&self.source_refs)?,
      ingested_at: decode_dt(&self.ingested_at)?,
      tenant_id:   self.tenant_id,
    })
  }
}

/// Raw strings read directly from an `entities` row.
pub struct RawEntity {
  pub entity_id:         String,
  pub entity_type:       String,
  pub identity_value:    String,
  pub first_observed_at: String,
}

impl RawEntity {
  pub const COLUMNS: &'static str =
    "entity_id, entity_type, identity_value, first_observed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_id:         row.get(0)?,
      entity_type:       row.get(1)?,
      identity_value:    row.get(2)?,
      first_observed_at: row.get(3)?,
    })
  }

  pub fn into_entity(self) -> Result<EntityMetadata> {
    Ok(EntityMetadata {
      entity_id:         EntityId::parse(&self.entity_id)?,
      entity_type:       self.entity_type,
      identity_value:    self.identity_value,
      first_observed_at: decode_dt(&self.first_observed_at)?,
    })
  }
}

/// Raw values read directly from an `observations` row.
pub struct RawObservation {
  pub observation_id:    String,
  pub entity_id:         String,
  pub entity_type:       String,
  pub schema_version:    i64,
  pub source_id:         String,
  pub producer_id:       String,
  pub producer_version:  String,
  pub fields:            String,
  pub specificity_score: i64,
  pub source_priority:   i64,
  pub observed_at:       String,
}

impl RawObservation {
  pub const COLUMNS: &'static str = "observation_id, entity_id, entity_type, \
     schema_version, source_id, producer_id, producer_version, fields, \
     specificity_score, source_priority, observed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      observation_id:    row.get(0)?,
      entity_id:         row.get(1)?,
      entity_type:       row.get(2)?,
      schema_version:    row.get(3)?,
      source_id:         row.get(4)?,
      producer_id:       row.get(5)?,
      producer_version:  row.get(6)?,
      fields:            row.get(7)?,
      specificity_score: row.get(8)?,
      source_priority:   row.get(9)?,
      observed_at:       row.get(10)?,
    })
  }

  pub fn into_observation(self) -> Result<Observation> {
    let fields: FieldMap = serde_json::from_str(&self.fields)?;
    Ok(Observation {
      observation_id: ObservationId::parse(&self.observation_id)?,
      entity_id: EntityId::parse(&self.entity_id)?,
      entity_type: self.entity_type,
      schema_version: decode_int("schema_version", self.schema_version)?,
      source_id: ContentId::parse(&self.source_id)?,
      producer_id: self.producer_id,
      producer_version: self.producer_version,
      fields,
      specificity_score: decode_int("specificity_score", self.specificity_score)?,
      source_priority: decode_int("source_priority", self.source_priority)?,
      observed_at: decode_dt(&self.observed_at)?,
    })
  }
}

/// Raw values read directly from a `snapshots` row.
pub struct RawSnapshot {
  pub entity_id:         String,
  pub entity_type:       String,
  pub schema_version:    i64,
  pub computed_at:       String,
  pub observation_count: i64,
  pub fields:            String,
  pub provenance:        String,
}

impl RawSnapshot {
  pub const COLUMNS: &'static str = "entity_id, entity_type, schema_version, \
     computed_at, observation_count, fields, provenance";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entity_id:         row.get(0)?,
      entity_type:       row.get(1)?,
      schema_version:    row.get(2)?,
      computed_at:       row.get(3)?,
      observation_count: row.get(4)?,
      fields:            row.get(5)?,
      provenance:        row.get(6)?,
    })
  }

  pub fn into_snapshot(self) -> Result<EntitySnapshot> {
    let fields: FieldMap = serde_json::from_str(&self.fields)?;
    let provenance: Provenance = serde_json::from_str(&self.provenance)?;
    Ok(EntitySnapshot {
      entity_id: EntityId::parse(&self.entity_id)?,
      entity_type: self.entity_type,
      schema_version: decode_int("schema_version", self.schema_version)?,
      fields,
      provenance,
      computed_at: decode_dt(&self.computed_at)?,
      observation_count: decode_int("observation_count", self.observation_count)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone as _;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let early = Utc.timestamp_opt(1_700_000_000, 5).unwrap();
    let late = Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap();
    assert!(encode_dt(early) < encode_dt(late));
    assert_eq!(decode_dt(&encode_dt(early)).unwrap(), early);
  }

  #[test]
  fn unknown_tier_is_corrupt() {
    assert!(matches!(decode_tier("oracle"), Err(Error::Corrupt(_))));
    assert_eq!(decode_tier(encode_tier(SourceTier::Human)).unwrap(), SourceTier::Human);
  }
}
