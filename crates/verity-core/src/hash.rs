//! Canonical serialisation and content addressing.
//!
//! A [`ContentId`] is the SHA-256 of a canonical JSON rendering of the
//! payload together with the producer identity and its source references.
//! It is the only deduplication key in the system.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization as _;

use crate::{Error, Result, observation::{FieldMap, ProducerMetadata}};

const CONTENT_PREFIX: &str = "sha256:";

// ─── ContentId ───────────────────────────────────────────────────────────────

/// `sha256:<64 hex>` content identifier of a source.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ContentId(String);

impl ContentId {
  pub fn as_str(&self) -> &str { &self.0 }

  pub fn parse(s: &str) -> Result<Self> {
    let well_formed = s.strip_prefix(CONTENT_PREFIX).is_some_and(|hex_part| {
      hex_part.len() == 64
        && hex_part
          .bytes()
          .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    });
    if !well_formed {
      return Err(Error::InvalidId(s.to_owned()));
    }
    Ok(Self(s.to_owned()))
  }

  fn from_bytes(bytes: &[u8]) -> Self {
    Self(format!("{CONTENT_PREFIX}{}", sha256_hex(bytes)))
  }
}

impl fmt::Display for ContentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for ContentId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

// ─── Hashing ─────────────────────────────────────────────────────────────────

pub fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// Compute the content id of a unit of source material.
///
/// Source references are sorted and deduplicated first, so submission order
/// and repeated references never change the id.
pub fn compute_content_id(
  producer: &ProducerMetadata,
  normalized_payload: &Value,
  source_refs: &[String],
) -> Result<ContentId> {
  let envelope = json!({
    "payload":          normalized_payload,
    "producer_id":      producer.producer_id,
    "producer_version": producer.producer_version,
    "source_refs":      normalize_source_refs(source_refs),
  });
  Ok(ContentId::from_bytes(&canonical_json_bytes(&envelope)?))
}

/// Hash of a canonical field map, hex encoded. Used as the
/// `canonical_field_hash` component of observation ids.
pub fn field_hash(fields: &FieldMap) -> Result<String> {
  let value = serde_json::to_value(fields)?;
  Ok(sha256_hex(&canonical_json_bytes(&value)?))
}

/// Trimmed, sorted, deduplicated source references with empties removed.
pub fn normalize_source_refs(source_refs: &[String]) -> Vec<String> {
  let mut refs: Vec<String> = source_refs
    .iter()
    .map(|r| r.trim().to_owned())
    .filter(|r| !r.is_empty())
    .collect();
  refs.sort();
  refs.dedup();
  refs
}

// ─── Canonical JSON ──────────────────────────────────────────────────────────

/// Render `value` as canonical JSON bytes.
///
/// - object keys sorted, no insignificant whitespace
/// - string values NFC-normalised, trimmed, whitespace runs collapsed
/// - integral floats printed as integers; other floats in shortest
///   round-trip decimal form
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>> {
  let mut out = String::new();
  write_canonical_json(value, &mut out)?;
  Ok(out.into_bytes())
}

fn write_canonical_json(value: &Value, out: &mut String) -> Result<()> {
  match value {
    Value::Null => out.push_str("null"),
    Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
    Value::Number(n) => out.push_str(&canonical_number(n)),
    Value::String(s) => {
      out.push_str(&serde_json::to_string(&normalize_whitespace(s))?);
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical_json(item, out)?;
      }
      out.push(']');
    }
    Value::Object(map) => {
      let mut entries: Vec<(String, &Value)> = map
        .iter()
        .map(|(k, v)| (k.nfc().collect::<String>(), v))
        .collect();
      entries.sort_by(|a, b| a.0.cmp(&b.0));

      out.push('{');
      for (i, (key, item)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&serde_json::to_string(&key)?);
        out.push(':');
        write_canonical_json(item, out)?;
      }
      out.push('}');
    }
  }
  Ok(())
}

fn canonical_number(n: &serde_json::Number) -> String {
  if n.is_i64() || n.is_u64() {
    return n.to_string();
  }
  match n.as_f64() {
    // Integral values within the exactly-representable range print as ints,
    // so `1.0` and `1` hash identically.
    Some(f) if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 => {
      format!("{}", f as i64)
    }
    Some(f) => format!("{f}"),
    None => n.to_string(),
  }
}

fn normalize_whitespace(s: &str) -> String {
  let nfc: String = s.nfc().collect();
  nfc.split_whitespace().collect::<Vec<_>>().join(" ")
}
