//! Entity snapshots: the reduced, read-side state of an entity.
//!
//! A snapshot is never edited. Every recomputation appends a new record to
//! the entity's history; older records remain.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Result,
  hash::{canonical_json_bytes, sha256_hex},
  identity::{EntityId, ObservationId},
  observation::FieldMap,
};

/// Which observation(s) supplied a resolved field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
  /// The observation that supplied the value. For `merge_array`, the most
  /// recent contributor.
  pub observation_id: ObservationId,
  /// All contributing observations, sorted by id. Only set for
  /// `merge_array` fields.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub contributors:   Vec<ObservationId>,
}

/// Field name → provenance.
pub type Provenance = BTreeMap<String, ProvenanceEntry>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
  pub entity_id:         EntityId,
  pub entity_type:       String,
  /// Registry version whose policies produced this snapshot.
  pub schema_version:    u32,
  pub fields:            FieldMap,
  pub provenance:        Provenance,
  /// Latest `observed_at` among the reduced observations.
  pub computed_at:       DateTime<Utc>,
  pub observation_count: u64,
}

impl EntitySnapshot {
  /// `sha256:<hex>` over the canonical JSON of the whole snapshot. Equal
  /// digests mean byte-identical snapshots.
  pub fn digest(&self) -> Result<String> {
    let value = serde_json::to_value(self)?;
    Ok(format!("sha256:{}", sha256_hex(&canonical_json_bytes(&value)?)))
  }

  pub fn provenance_for(&self, field: &str) -> Option<&ProvenanceEntry> {
    self.provenance.get(field)
  }
}
