//! The idempotence gate: turns stochastic producer output into a stable,
//! canonical observation.
//!
//! A producer (typically a language model) is invoked with identical input up
//! to [`GateConfig::max_attempts`] times. Each output is parsed, validated
//! against the active schema and canonicalised; the first valid result is
//! accepted. Its content id is computed over the canonical fields, so two
//! differently worded but equivalent outputs commit as one observation.
//!
//! The gate holds no entity lock and keeps no state between calls.

use std::{fmt, future::Future};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
  Error, Result,
  canonical::canonicalize_record,
  hash::field_hash,
  identity::{EntityId, resolve_entity_id},
  observation::{FieldMap, ObservationDraft, ProducerMetadata, SourceTier},
  schema::EntitySchema,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateConfig {
  pub max_attempts: u32,
}

impl Default for GateConfig {
  fn default() -> Self { Self { max_attempts: 3 } }
}

/// Everything about a producer run except its output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizeRequest {
  pub entity_type:       String,
  pub producer:          ProducerMetadata,
  #[serde(default)]
  pub source_refs:       Vec<String>,
  #[serde(default)]
  pub observed_at:       Option<DateTime<Utc>>,
  #[serde(default)]
  pub specificity_score: u32,
  /// `canonical_field_hash` of an earlier accepted result for the same
  /// input, used to report convergence.
  #[serde(default)]
  pub previous_hash:     Option<String>,
  #[serde(default)]
  pub tenant_id:         Option<String>,
}

/// One validated, canonicalised producer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalObservation {
  pub entity_type:    String,
  pub schema_version: u32,
  pub entity_id:      EntityId,
  pub identity_value: String,
  pub fields:         FieldMap,
  pub field_hash:     String,
}

/// The gate's accepted result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stabilized {
  pub observation: CanonicalObservation,
  pub attempts:    u32,
  /// `true` when the result matches `previous_hash`.
  pub converged:   bool,
  /// Reasons earlier attempts were rejected.
  pub failures:    Vec<String>,
  pub request:     StabilizeRequest,
}

impl Stabilized {
  /// Build the draft to commit. Gate output always carries the lowest
  /// source priority, and its content id covers only the canonical fields.
  pub fn into_draft(self, ingested_at: DateTime<Utc>) -> ObservationDraft {
    let StabilizeRequest {
      producer,
      source_refs,
      observed_at,
      specificity_score,
      tenant_id,
      ..
    } = self.request;
    let observed_at = observed_at.or(producer.produced_at).unwrap_or(ingested_at);

    ObservationDraft {
      entity_type: self.observation.entity_type,
      schema_version: self.observation.schema_version,
      identity_value: self.observation.identity_value,
      fields: self.observation.fields,
      producer,
      source_refs,
      payload: None,
      observed_at,
      specificity_score,
      source_priority: SourceTier::AiUnverified.priority(),
      tenant_id,
    }
  }
}

#[derive(Debug, Clone, Default)]
pub struct IdempotenceGate {
  config: GateConfig,
}

impl IdempotenceGate {
  pub fn new(config: GateConfig) -> Self { Self { config } }

  pub fn config(&self) -> GateConfig { self.config }

  /// Run `producer` until it yields an output that validates against
  /// `schema`, at most `max_attempts` times. `producer` receives the
  /// 1-based attempt number.
  pub async fn stabilize<F, Fut, E>(
    &self,
    schema: &EntitySchema,
    request: StabilizeRequest,
    mut producer: F,
  ) -> Result<Stabilized>
  where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<String, E>>,
    E: fmt::Display,
  {
    let max_attempts = self.config.max_attempts.max(1);
    let mut failures = Vec::new();

    for attempt in 1..=max_attempts {
      let outcome = match producer(attempt).await {
        Ok(raw) => Self::accept(schema, &raw).map_err(|e| e.to_string()),
        Err(e) => Err(format!("producer failed: {e}")),
      };

      match outcome {
        Ok(observation) => {
          let converged = request
            .previous_hash
            .as_deref()
            .is_some_and(|h| h == observation.field_hash);
          debug!(
            entity_type = %schema.entity_type,
            entity_id = %observation.entity_id,
            attempt,
            converged,
            "producer output accepted"
          );
          return Ok(Stabilized {
            observation,
            attempts: attempt,
            converged,
            failures,
            request,
          });
        }
        Err(reason) => {
          warn!(
            entity_type = %schema.entity_type,
            attempt,
            max_attempts,
            reason = %reason,
            "producer output rejected"
          );
          failures.push(format!("attempt {attempt}: {reason}"));
        }
      }
    }

    Err(Error::ProducerValidation {
      entity_type: schema.entity_type.clone(),
      attempts: max_attempts,
      failures,
    })
  }

  /// Parse, validate and canonicalise one raw producer output.
  pub fn accept(schema: &EntitySchema, raw: &str) -> Result<CanonicalObservation> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    let Value::Object(map) = value else {
      return Err(Error::malformed(
        &schema.entity_type,
        "$",
        "producer output is not a JSON object",
      ));
    };

    let record = canonicalize_record(schema, &map)?;
    let field_hash = field_hash(&record.fields)?;

    Ok(CanonicalObservation {
      entity_type: schema.entity_type.clone(),
      schema_version: schema.version,
      entity_id: resolve_entity_id(&schema.entity_type, &record.identity_value),
      identity_value: record.identity_value,
      fields: record.fields,
      field_hash,
    })
  }
}

/// Strip a surrounding Markdown code fence (e.g. "```json ... ```").
fn strip_code_fence(raw: &str) -> &str {
  let trimmed = raw.trim();
  let Some(rest) = trimmed.strip_prefix("```") else {
    return trimmed;
  };
  let body = rest.split_once('\n').map_or("", |(_, body)| body);
  body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
