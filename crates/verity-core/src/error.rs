//! Error types for `verity-core`.
//!
//! Every variant maps to a stable, snake_case error code via
//! [`Error::code`]. Codes are part of the public contract: ingestion callers
//! match on them, so existing codes are never renamed.

use thiserror::Error;

use crate::identity::{EntityId, ObservationId};

#[derive(Debug, Error)]
pub enum Error {
  /// A raw value could not be typed or normalised per its field definition.
  #[error("malformed value for {entity_type}.{field}: {reason}")]
  MalformedValue {
    entity_type: String,
    field:       String,
    reason:      String,
  },

  /// No merge policy / field definition exists for a field at the requested
  /// schema version.
  #[error(
    "no policy for field {entity_type}.{field} at schema version {schema_version}"
  )]
  UnknownFieldPolicy {
    entity_type:    String,
    field:          String,
    schema_version: u32,
  },

  #[error("unknown schema: {entity_type}{}", version.map(|v| format!(" v{v}")).unwrap_or_default())]
  UnknownSchema {
    entity_type: String,
    version:     Option<u32>,
  },

  /// A snapshot was requested for an entity with no observations.
  #[error("refusing to compute a snapshot for {0}: no observations")]
  EmptyObservationSet(EntityId),

  /// The idempotence gate exhausted its attempts without a valid result.
  #[error(
    "producer output for {entity_type} failed validation after {attempts} attempt(s): {}",
    failures.join("; ")
  )]
  ProducerValidation {
    entity_type: String,
    attempts:    u32,
    failures:    Vec<String>,
  },

  #[error("observation {observation_id} does not belong to entity {expected}")]
  EntityMismatch {
    expected:       EntityId,
    observation_id: ObservationId,
  },

  #[error(
    "schema {entity_type} v{version} is already published with a different definition"
  )]
  SchemaConflict { entity_type: String, version: u32 },

  #[error("schema {entity_type} v{version} is incompatible: {reason}")]
  IncompatibleSchema {
    entity_type: String,
    version:     u32,
    reason:      String,
  },

  #[error("invalid schema definition: {0}")]
  InvalidSchema(String),

  #[error("entity not found: {0}")]
  EntityNotFound(EntityId),

  #[error("field {field} is not resolved in the snapshot of {entity_id}")]
  FieldNotResolved { entity_id: EntityId, field: String },

  #[error("invalid identifier: {0:?}")]
  InvalidId(String),

  #[error("registry parse error: {0}")]
  Registry(#[from] toml::de::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// The stable error code surfaced to ingestion callers.
  pub fn code(&self) -> &'static str {
    match self {
      Self::MalformedValue { .. } => "malformed_value",
      Self::UnknownFieldPolicy { .. } => "unknown_field_policy",
      Self::UnknownSchema { .. } => "unknown_schema",
      Self::EmptyObservationSet(_) => "empty_observation_set",
      Self::ProducerValidation { .. } => "producer_validation",
      Self::EntityMismatch { .. } => "entity_mismatch",
      Self::SchemaConflict { .. } => "schema_conflict",
      Self::IncompatibleSchema { .. } => "incompatible_schema",
      Self::InvalidSchema(_) => "invalid_schema",
      Self::EntityNotFound(_) => "entity_not_found",
      Self::FieldNotResolved { .. } => "field_not_resolved",
      Self::InvalidId(_) => "invalid_id",
      Self::Registry(_) => "registry_parse",
      Self::Serialization(_) => "serialization",
    }
  }

  pub(crate) fn malformed(
    entity_type: &str,
    field: &str,
    reason: impl Into<String>,
  ) -> Self {
    Self::MalformedValue {
      entity_type: entity_type.to_owned(),
      field:       field.to_owned(),
      reason:      reason.into(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
