//! Content-addressed identity for entities and observations.
//!
//! Identifiers are pure functions of normalised content: two unrelated
//! ingestions that name the same `(entity_type, canonical_value)` converge on
//! the same [`EntityId`] with no lookup table, counter, or coordination.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{Error, Result, hash::ContentId};

/// Bytes of the SHA-256 digest kept in entity and observation identifiers.
const ID_BYTES: usize = 16;

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Stable identifier of a logical entity: `ent_<32 hex>`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(String);

/// Stable identifier of an observation: `obs_<32 hex>`.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ObservationId(String);

macro_rules! prefixed_id {
  ($ty:ident, $prefix:literal) => {
    impl $ty {
      pub const PREFIX: &'static str = $prefix;

      pub fn as_str(&self) -> &str { &self.0 }

      /// Parse and validate a rendered identifier.
      pub fn parse(s: &str) -> Result<Self> {
        let hex_part = s
          .strip_prefix(Self::PREFIX)
          .ok_or_else(|| Error::InvalidId(s.to_owned()))?;
        let well_formed = hex_part.len() == ID_BYTES * 2
          && hex_part
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !well_formed {
          return Err(Error::InvalidId(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
      }

      fn from_digest(digest: &[u8]) -> Self {
        Self(format!("{}{}", Self::PREFIX, hex::encode(&digest[..ID_BYTES])))
      }
    }

    impl fmt::Display for $ty {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
      }
    }

    impl FromStr for $ty {
      type Err = Error;

      fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
    }
  };
}

prefixed_id!(EntityId, "ent_");
prefixed_id!(ObservationId, "obs_");

// ─── Derivation ──────────────────────────────────────────────────────────────

/// `hash(entity_type || ":" || canonical_value)`, truncated to 128 bits.
///
/// `canonical_value` must already be canonicalised; this function does not
/// normalise its input.
pub fn resolve_entity_id(entity_type: &str, canonical_value: &str) -> EntityId {
  let mut hasher = Sha256::new();
  hasher.update(entity_type.as_bytes());
  hasher.update(b":");
  hasher.update(canonical_value.as_bytes());
  EntityId::from_digest(&hasher.finalize())
}

/// `hash(entity_id + source_id + producer_version + canonical_field_hash)`.
///
/// Components are newline-separated so that no two distinct tuples share a
/// pre-image.
pub fn derive_observation_id(
  entity_id: &EntityId,
  source_id: &ContentId,
  producer_version: &str,
  canonical_field_hash: &str,
) -> ObservationId {
  let mut hasher = Sha256::new();
  for part in [
    entity_id.as_str(),
    source_id.as_str(),
    producer_version,
    canonical_field_hash,
  ] {
    hasher.update(part.as_bytes());
    hasher.update(b"\n");
  }
  ObservationId::from_digest(&hasher.finalize())
}

// ─── Entity index ────────────────────────────────────────────────────────────

/// Metadata recorded the first time an observation references an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
  pub entity_id:         EntityId,
  pub entity_type:       String,
  /// The canonical identity value the id was derived from.
  pub identity_value:    String,
  pub first_observed_at: DateTime<Utc>,
}

impl EntityMetadata {
  pub fn new(
    entity_type: impl Into<String>,
    identity_value: impl Into<String>,
    first_observed_at: DateTime<Utc>,
  ) -> Self {
    let entity_type = entity_type.into();
    let identity_value = identity_value.into();
    Self {
      entity_id: resolve_entity_id(&entity_type, &identity_value),
      entity_type,
      identity_value,
      first_observed_at,
    }
  }
}

/// Lazily populated `EntityId -> EntityMetadata` arena.
///
/// Entities are never created explicitly. An entry appears the first time an
/// observation references its id and is never replaced afterwards.
#[derive(Debug, Clone, Default)]
pub struct EntityIndex {
  entries: BTreeMap<EntityId, EntityMetadata>,
}

impl EntityIndex {
  pub fn new() -> Self { Self::default() }

  /// Register `meta` unless its id is already known. Returns the stored
  /// metadata and whether this call created it.
  pub fn observe(&mut self, meta: EntityMetadata) -> (&EntityMetadata, bool) {
    use std::collections::btree_map::Entry;
    match self.entries.entry(meta.entity_id.clone()) {
      Entry::Occupied(e) => (e.into_mut(), false),
      Entry::Vacant(e) => (e.insert(meta), true),
    }
  }

  pub fn get(&self, id: &EntityId) -> Option<&EntityMetadata> {
    self.entries.get(id)
  }

  pub fn contains(&self, id: &EntityId) -> bool { self.entries.contains_key(id) }

  /// All entities, optionally restricted to one type, in id order.
  pub fn list(&self, entity_type: Option<&str>) -> Vec<EntityMetadata> {
    self
      .entries
      .values()
      .filter(|m| entity_type.is_none_or(|t| m.entity_type == t))
      .cloned()
      .collect()
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn entity_id_is_pure_and_type_scoped() {
    let a = resolve_entity_id("company", "acme");
    let b = resolve_entity_id("company", "acme");
    let c = resolve_entity_id("person", "acme");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.as_str().starts_with("ent_"));
    assert_eq!(a.as_str().len(), 4 + 32);
  }

  #[test]
  fn parse_roundtrips_and_rejects_garbage() {
    let id = resolve_entity_id("invoice", "inv-001");
    assert_eq!(EntityId::parse(id.as_str()).unwrap(), id);
    assert!(EntityId::parse("ent_xyz").is_err());
    assert!(EntityId::parse(&id.as_str().replace("ent_", "obs_")).is_err());
    assert!(ObservationId::parse(id.as_str()).is_err());
  }

  #[test]
  fn index_keeps_first_metadata() {
    let t0 = Utc.timestamp_opt(100, 0).unwrap();
    let t1 = Utc.timestamp_opt(200, 0).unwrap();
    let mut index = EntityIndex::new();

    let (_, created) = index.observe(EntityMetadata::new("company", "acme", t0));
    assert!(created);
    let (meta, created) =
      index.observe(EntityMetadata::new("company", "acme", t1));
    assert!(!created);
    assert_eq!(meta.first_observed_at, t0);

    index.observe(EntityMetadata::new("person", "ada lovelace", t1));
    assert_eq!(index.len(), 2);
    assert_eq!(index.list(Some("person")).len(), 1);
  }
}
