//! Canonicalisation of raw field values.
//!
//! Rules run in a fixed order:
//!
//! 1. Unicode NFKC normalisation, trim, whitespace collapse
//! 2. case folding where the field is case-insensitive
//! 3. suffix / alias stripping from type-specific rule tables
//! 4. numeric rounding to the field's fixed scale
//! 5. dates and times normalised to one absolute representation
//!
//! Semantically identical input always yields an identical
//! [`CanonicalValue`], and canonicalising the plain JSON form of a canonical
//! value returns it unchanged.

use std::{fmt, str::FromStr};

use chrono::{
  DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, SubsecRound as _,
  TimeZone as _, Utc,
};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization as _;

use crate::{
  Error, Result,
  observation::FieldMap,
  schema::{EntitySchema, FieldSpec, FieldType, MergeStrategy, SchemaRegistry},
};

// ─── Rule tables ─────────────────────────────────────────────────────────────

/// Legal-entity suffixes, compared case-insensitively with dots removed.
const LEGAL_SUFFIXES: &[&str] = &[
  "ab", "ag", "bv", "co", "company", "corp", "corporation", "gmbh", "inc",
  "incorporated", "limited", "llc", "llp", "lp", "ltd", "nv", "oy", "plc",
  "pty", "sa", "sarl", "srl",
];

/// Country names and informal codes mapped to ISO 3166-1 alpha-2. Keys are
/// lower case with dots removed.
const COUNTRY_ALIASES: &[(&str, &str)] = &[
  ("america", "US"),
  ("australia", "AU"),
  ("austria", "AT"),
  ("belgium", "BE"),
  ("brazil", "BR"),
  ("canada", "CA"),
  ("china", "CN"),
  ("denmark", "DK"),
  ("deutschland", "DE"),
  ("finland", "FI"),
  ("france", "FR"),
  ("germany", "DE"),
  ("great britain", "GB"),
  ("india", "IN"),
  ("ireland", "IE"),
  ("italy", "IT"),
  ("japan", "JP"),
  ("mexico", "MX"),
  ("netherlands", "NL"),
  ("new zealand", "NZ"),
  ("norway", "NO"),
  ("poland", "PL"),
  ("portugal", "PT"),
  ("singapore", "SG"),
  ("south korea", "KR"),
  ("spain", "ES"),
  ("sweden", "SE"),
  ("switzerland", "CH"),
  ("the netherlands", "NL"),
  ("uk", "GB"),
  ("united kingdom", "GB"),
  ("united states", "US"),
  ("united states of america", "US"),
  ("us", "US"),
  ("usa", "US"),
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%Y%m%d"];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M",
];

// ─── CanonicalValue ──────────────────────────────────────────────────────────

/// A normalised field value. The derived ordering is total and stable, and
/// serves as the sort key for `merge_array` resolution.
#[derive(
  Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CanonicalValue {
  Boolean(bool),
  Integer(i64),
  Decimal(Decimal),
  Text(String),
  Date(NaiveDate),
  Timestamp(DateTime<Utc>),
  /// Sorted, deduplicated elements.
  List(Vec<CanonicalValue>),
}

impl CanonicalValue {
  /// The untagged JSON form, as a producer would submit it.
  pub fn to_plain_json(&self) -> Value {
    match self {
      Self::Boolean(b) => Value::Bool(*b),
      Self::Integer(n) => Value::from(*n),
      Self::List(items) => {
        Value::Array(items.iter().map(Self::to_plain_json).collect())
      }
      other => Value::String(other.to_string()),
    }
  }

  /// Whether `other` is this value or, for lists, one of its elements.
  pub fn contains(&self, other: &CanonicalValue) -> bool {
    match self {
      Self::List(items) => items.contains(other),
      v => v == other,
    }
  }
}

impl fmt::Display for CanonicalValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Boolean(b) => write!(f, "{b}"),
      Self::Integer(n) => write!(f, "{n}"),
      Self::Decimal(d) => write!(f, "{d}"),
      Self::Text(s) => f.write_str(s),
      Self::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
      Self::Timestamp(t) => {
        f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
      }
      Self::List(items) => {
        f.write_str("[")?;
        for (i, item) in items.iter().enumerate() {
          if i > 0 {
            f.write_str(", ")?;
          }
          write!(f, "{item}")?;
        }
        f.write_str("]")
      }
    }
  }
}

// ─── Canonicalizer ───────────────────────────────────────────────────────────

/// Canonicalises raw values against the active schema of a registry.
pub struct Canonicalizer<'r> {
  registry: &'r SchemaRegistry,
}

impl<'r> Canonicalizer<'r> {
  pub fn new(registry: &'r SchemaRegistry) -> Self { Self { registry } }

  /// Canonicalise one raw value under the entity type's active schema.
  pub fn canonicalize(
    &self,
    entity_type: &str,
    field_name: &str,
    raw_value: &Value,
  ) -> Result<CanonicalValue> {
    let schema = self.registry.active(entity_type)?;
    canonicalize_field(&schema, field_name, raw_value)
  }
}

/// Canonicalise one raw value of `schema`'s field `field_name`.
pub fn canonicalize_field(
  schema: &EntitySchema,
  field_name: &str,
  raw_value: &Value,
) -> Result<CanonicalValue> {
  let spec = schema.field(field_name).ok_or_else(|| Error::UnknownFieldPolicy {
    entity_type:    schema.entity_type.clone(),
    field:          field_name.to_owned(),
    schema_version: schema.version,
  })?;
  canonicalize_value(&schema.entity_type, field_name, spec, raw_value)
}

/// Canonicalise a whole raw record. JSON `null` means "not observed" and is
/// skipped.
pub fn canonicalize_fields(
  schema: &EntitySchema,
  raw: &serde_json::Map<String, Value>,
) -> Result<FieldMap> {
  raw
    .iter()
    .filter(|(_, v)| !v.is_null())
    .map(|(name, v)| Ok((name.clone(), canonicalize_field(schema, name, v)?)))
    .collect()
}

/// A validated record: canonical fields plus the rendered identity value.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
  pub fields:         FieldMap,
  pub identity_value: String,
}

/// Canonicalise a raw record and check that every required field, the
/// identity field included, is present.
pub fn canonicalize_record(
  schema: &EntitySchema,
  raw: &serde_json::Map<String, Value>,
) -> Result<CanonicalRecord> {
  let fields = canonicalize_fields(schema, raw)?;

  for (name, spec) in &schema.fields {
    if spec.required && !fields.contains_key(name) {
      return Err(Error::malformed(
        &schema.entity_type,
        name,
        "required field is missing",
      ));
    }
  }
  let identity_value = fields
    .get(&schema.identity_field)
    .map(ToString::to_string)
    .ok_or_else(|| {
      Error::malformed(
        &schema.entity_type,
        &schema.identity_field,
        "identity field is missing",
      )
    })?;

  Ok(CanonicalRecord { fields, identity_value })
}

/// Canonicalise `raw` according to `spec`.
pub fn canonicalize_value(
  entity_type: &str,
  field: &str,
  spec: &FieldSpec,
  raw: &Value,
) -> Result<CanonicalValue> {
  let rules = Rules { entity_type, field, spec };

  let value = match raw {
    Value::Array(items) => {
      if spec.merge.strategy != MergeStrategy::MergeArray {
        return Err(rules.malformed("arrays are only accepted by merge_array fields"));
      }
      let mut out = Vec::with_capacity(items.len());
      for item in items.iter().filter(|v| !v.is_null()) {
        if item.is_array() {
          return Err(rules.malformed("nested arrays are not supported"));
        }
        out.push(rules.scalar(item)?);
      }
      out.sort();
      out.dedup();
      if out.is_empty() {
        return Err(rules.malformed("empty array"));
      }
      CanonicalValue::List(out)
    }
    other => rules.scalar(other)?,
  };

  rules.validate(&value)?;
  Ok(value)
}

/// NFKC, trim, and collapse internal whitespace runs to one space.
pub fn normalize_text(s: &str) -> String {
  let nfkc: String = s.nfkc().collect();
  nfkc.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ─── Rules ───────────────────────────────────────────────────────────────────

struct Rules<'a> {
  entity_type: &'a str,
  field:       &'a str,
  spec:        &'a FieldSpec,
}

impl Rules<'_> {
  fn malformed(&self, reason: impl Into<String>) -> Error {
    Error::malformed(self.entity_type, self.field, reason)
  }

  fn scalar(&self, raw: &Value) -> Result<CanonicalValue> {
    if raw.is_null() {
      return Err(self.malformed("null value"));
    }
    match self.spec.field_type {
      FieldType::Text => self.text(raw).map(CanonicalValue::Text),
      FieldType::LegalName => self.legal_name(raw).map(CanonicalValue::Text),
      FieldType::Email => self.email(raw).map(CanonicalValue::Text),
      FieldType::CountryCode => self.country(raw).map(CanonicalValue::Text),
      FieldType::Integer => self.integer(raw).map(CanonicalValue::Integer),
      FieldType::Decimal => self.decimal(raw).map(CanonicalValue::Decimal),
      FieldType::Boolean => self.boolean(raw).map(CanonicalValue::Boolean),
      FieldType::Date => self.date(raw).map(CanonicalValue::Date),
      FieldType::Timestamp => self.timestamp(raw).map(CanonicalValue::Timestamp),
    }
  }

  /// Rule 1 (and rule 2 when configured) for any stringy input.
  fn folded_text(&self, raw: &Value) -> Result<String> {
    let s = match raw {
      Value::String(s) => normalize_text(s),
      Value::Number(n) => n.to_string(),
      Value::Bool(b) => b.to_string(),
      _ => return Err(self.malformed("expected a string")),
    };
    if s.is_empty() {
      return Err(self.malformed("empty value"));
    }
    Ok(if self.spec.case_insensitive { s.to_lowercase() } else { s })
  }

  fn text(&self, raw: &Value) -> Result<String> { self.folded_text(raw) }

  fn legal_name(&self, raw: &Value) -> Result<String> {
    let folded = self.folded_text(raw)?;
    let mut tokens: Vec<&str> = folded.split(' ').collect();

    while tokens.len() > 1 {
      let key = suffix_key(tokens[tokens.len() - 1]);
      if key.is_empty() || LEGAL_SUFFIXES.contains(&key.as_str()) {
        tokens.pop();
      } else {
        break;
      }
    }

    let stripped = tokens
      .join(" ")
      .trim_end_matches([',', '.', '&', '-', ' '])
      .to_owned();
    if stripped.is_empty() {
      return Err(self.malformed("name is empty after suffix stripping"));
    }
    Ok(stripped)
  }

  fn email(&self, raw: &Value) -> Result<String> {
    let s = self.folded_text(raw)?.to_lowercase();
    let mut parts = s.split('@');
    let (Some(local), Some(domain), None) = (parts.next(), parts.next(), parts.next())
    else {
      return Err(self.malformed("expected exactly one '@'"));
    };
    if local.is_empty() || domain.is_empty() || s.contains(' ') {
      return Err(self.malformed("not an email address"));
    }
    Ok(s)
  }

  fn country(&self, raw: &Value) -> Result<String> {
    let s = self.folded_text(raw)?;
    let key = s.to_lowercase().replace('.', "");
    if let Some((_, code)) = COUNTRY_ALIASES.iter().find(|(alias, _)| *alias == key) {
      return Ok((*code).to_owned());
    }
    if key.len() == 2 && key.bytes().all(|b| b.is_ascii_alphabetic()) {
      return Ok(key.to_ascii_uppercase());
    }
    Err(self.malformed(format!("unknown country {s:?}")))
  }

  fn integer(&self, raw: &Value) -> Result<i64> {
    match raw {
      Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          return Ok(i);
        }
        match n.as_f64() {
          Some(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Ok(f as i64),
          _ => Err(self.malformed(format!("{n} is not an integer"))),
        }
      }
      Value::String(s) => {
        let cleaned: String =
          normalize_text(s).chars().filter(|c| !matches!(c, ',' | '_')).collect();
        cleaned
          .parse()
          .map_err(|_| self.malformed(format!("{s:?} is not an integer")))
      }
      _ => Err(self.malformed("expected an integer")),
    }
  }

  fn decimal(&self, raw: &Value) -> Result<Decimal> {
    let text = match raw {
      Value::Number(n) => n.to_string(),
      Value::String(s) => {
        normalize_text(s).chars().filter(|c| !matches!(c, ',' | '_')).collect()
      }
      _ => return Err(self.malformed("expected a decimal number")),
    };
    let parsed = if text.contains(['e', 'E']) {
      Decimal::from_scientific(&text)
    } else {
      Decimal::from_str(&text)
    }
    .map_err(|e| self.malformed(format!("{text:?} is not a decimal: {e}")))?;

    let scale = self.spec.scale.unwrap_or(0);
    let mut rounded =
      parsed.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    if rounded.is_zero() {
      rounded = Decimal::ZERO;
    }
    rounded.rescale(scale);
    Ok(rounded)
  }

  fn boolean(&self, raw: &Value) -> Result<bool> {
    match raw {
      Value::Bool(b) => Ok(*b),
      Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
      Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
      Value::String(s) => match normalize_text(s).to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        other => Err(self.malformed(format!("{other:?} is not a boolean"))),
      },
      _ => Err(self.malformed("expected a boolean")),
    }
  }

  fn date(&self, raw: &Value) -> Result<NaiveDate> {
    let Value::String(s) = raw else {
      return Err(self.malformed("expected a date string"));
    };
    let s = normalize_text(s);
    DATE_FORMATS
      .iter()
      .find_map(|fmt| NaiveDate::parse_from_str(&s, fmt).ok())
      .or_else(|| DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.date_naive()))
      .ok_or_else(|| self.malformed(format!("unparseable date {s:?}")))
  }

  fn timestamp(&self, raw: &Value) -> Result<DateTime<Utc>> {
    let utc = match raw {
      Value::Number(n) => n
        .as_i64()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| self.malformed(format!("{n} is not an epoch timestamp")))?,
      Value::String(s) => {
        let s = normalize_text(s);
        match DateTime::parse_from_rfc3339(&s) {
          Ok(dt) => dt.with_timezone(&Utc),
          Err(_) => self.naive_timestamp(&s)?,
        }
      }
      _ => return Err(self.malformed("expected a timestamp")),
    };
    Ok(utc.trunc_subsecs(6))
  }

  /// Interpret a zone-less timestamp in the field's default offset.
  fn naive_timestamp(&self, s: &str) -> Result<DateTime<Utc>> {
    let naive = NAIVE_DATETIME_FORMATS
      .iter()
      .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
      .or_else(|| {
        DATE_FORMATS
          .iter()
          .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
          .and_then(|d| d.and_hms_opt(0, 0, 0))
      })
      .ok_or_else(|| self.malformed(format!("unparseable timestamp {s:?}")))?;

    let offset = FixedOffset::east_opt(self.spec.default_offset_minutes * 60)
      .ok_or_else(|| self.malformed("invalid default offset"))?;
    offset
      .from_local_datetime(&naive)
      .earliest()
      .map(|dt| dt.with_timezone(&Utc))
      .ok_or_else(|| self.malformed(format!("timestamp {s:?} does not exist")))
  }

  fn validate(&self, value: &CanonicalValue) -> Result<()> {
    let v = &self.spec.validator;
    match value {
      CanonicalValue::List(items) => items.iter().try_for_each(|i| self.validate(i)),
      CanonicalValue::Text(s) => {
        let len = s.chars().count();
        if v.min_length.is_some_and(|min| len < min) {
          return Err(self.malformed(format!("shorter than {:?}", v.min_length)));
        }
        if v.max_length.is_some_and(|max| len > max) {
          return Err(self.malformed(format!("longer than {:?}", v.max_length)));
        }
        if !v.one_of.is_empty() && !v.one_of.iter().any(|allowed| allowed == s) {
          return Err(self.malformed(format!("{s:?} is not an allowed value")));
        }
        Ok(())
      }
      CanonicalValue::Integer(n) => self.check_range(Decimal::from(*n)),
      CanonicalValue::Decimal(d) => self.check_range(*d),
      _ => Ok(()),
    }
  }

  fn check_range(&self, n: Decimal) -> Result<()> {
    let v = &self.spec.validator;
    if v.min.is_some_and(|min| n < min) || v.max.is_some_and(|max| n > max) {
      return Err(self.malformed(format!("{n} is out of range")));
    }
    Ok(())
  }
}

/// Lower-cased suffix candidate with dots and commas removed.
fn suffix_key(token: &str) -> String {
  token
    .chars()
    .filter(|c| !matches!(c, '.' | ','))
    .flat_map(char::to_lowercase)
    .collect()
}

#[cfg(test)]
mod tests {
  use chrono::Timelike as _;
  use serde_json::json;

  use super::*;
  use crate::schema::Validator;

  fn spec(field_type: FieldType) -> FieldSpec {
    FieldSpec::new(field_type, MergeStrategy::LastWriteWins)
  }

  fn canon(spec: &FieldSpec, raw: Value) -> Result<CanonicalValue> {
    canonicalize_value("test", "field", spec, &raw)
  }

  fn text(s: &str) -> CanonicalValue { CanonicalValue::Text(s.into()) }

  #[test]
  fn legal_names_fold_and_strip_suffixes() {
    let name = spec(FieldType::LegalName).case_insensitive();
    for raw in ["Acme Corp", "ACME CORP.", "  Acme   Corporation ", "Acme, Inc.", "Acme Pty Ltd"] {
      assert_eq!(canon(&name, json!(raw)).unwrap(), text("acme"), "{raw}");
    }
    // A bare suffix word is still a name.
    assert_eq!(canon(&name, json!("Company")).unwrap(), text("company"));
  }

  #[test]
  fn proper_nouns_keep_case_unless_configured() {
    let name = spec(FieldType::LegalName);
    assert_eq!(canon(&name, json!("Acme GmbH")).unwrap(), text("Acme"));
    let plain = spec(FieldType::Text);
    assert_eq!(canon(&plain, json!("  Ada\tLovelace ")).unwrap(), text("Ada Lovelace"));
  }

  #[test]
  fn unicode_is_nfkc_normalised() {
    let plain = spec(FieldType::Text);
    // "ﬁ" ligature and a decomposed "é".
    assert_eq!(
      canon(&plain, json!("\u{FB01}ne cafe\u{301}")).unwrap(),
      text("fine café")
    );
  }

  #[test]
  fn country_codes_and_aliases() {
    let country = spec(FieldType::CountryCode);
    assert_eq!(canon(&country, json!("us")).unwrap(), text("US"));
    assert_eq!(canon(&country, json!("U.S.A.")).unwrap(), text("US"));
    assert_eq!(canon(&country, json!("United Kingdom")).unwrap(), text("GB"));
    assert!(canon(&country, json!("Atlantis")).is_err());
  }

  #[test]
  fn emails_are_lowercased_and_checked() {
    let email = spec(FieldType::Email);
    assert_eq!(
      canon(&email, json!(" Ada@Example.COM ")).unwrap(),
      text("ada@example.com")
    );
    assert!(canon(&email, json!("not-an-email")).is_err());
    assert!(canon(&email, json!("a@b@c")).is_err());
  }

  #[test]
  fn decimals_round_to_fixed_scale() {
    let amount = spec(FieldType::Decimal).scale(2);
    let v = canon(&amount, json!(100)).unwrap();
    assert_eq!(v.to_string(), "100.00");
    assert_eq!(canon(&amount, json!("1,234.565")).unwrap().to_string(), "1234.57");
    assert_eq!(canon(&amount, json!(-0.001)).unwrap().to_string(), "0.00");
    assert_eq!(canon(&amount, json!("1.5e2")).unwrap().to_string(), "150.00");
    assert_eq!(canon(&amount, json!(150)).unwrap(), canon(&amount, json!("150.0")).unwrap());
    assert!(canon(&amount, json!("twelve")).is_err());
  }

  #[test]
  fn integers_accept_numeric_strings() {
    let n = spec(FieldType::Integer);
    assert_eq!(canon(&n, json!("1_000")).unwrap(), CanonicalValue::Integer(1000));
    assert_eq!(canon(&n, json!(7.0)).unwrap(), CanonicalValue::Integer(7));
    assert!(canon(&n, json!(7.5)).is_err());
  }

  #[test]
  fn dates_accept_several_layouts() {
    let date = spec(FieldType::Date);
    let expected = CanonicalValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
    for raw in ["2024-03-09", "2024/03/09", "09.03.2024", "2024-03-09T23:00:00+02:00"] {
      assert_eq!(canon(&date, json!(raw)).unwrap(), expected, "{raw}");
    }
    let err = canon(&date, json!("next tuesday")).unwrap_err();
    assert_eq!(err.code(), "malformed_value");
  }

  #[test]
  fn timestamps_normalise_to_utc() {
    let ts = spec(FieldType::Timestamp);
    let a = canon(&ts, json!("2024-03-09T10:00:00+02:00")).unwrap();
    let b = canon(&ts, json!("2024-03-09T08:00:00Z")).unwrap();
    let c = canon(&ts, json!("2024-03-09 08:00:00")).unwrap();
    assert_eq!(a, b);
    assert_eq!(b, c);

    let eastern = spec(FieldType::Timestamp).offset_minutes(-5 * 60);
    let CanonicalValue::Timestamp(t) = canon(&eastern, json!("2024-03-09 03:00")).unwrap()
    else {
      panic!("expected a timestamp");
    };
    assert_eq!(t.hour(), 8);

    let CanonicalValue::Timestamp(t) =
      canon(&ts, json!("2024-03-09T08:00:00.123456789Z")).unwrap()
    else {
      panic!("expected a timestamp");
    };
    assert_eq!(t.nanosecond(), 123_456_000);
  }

  #[test]
  fn arrays_only_for_merge_array_fields() {
    let tags = FieldSpec::new(FieldType::Text, MergeStrategy::MergeArray).case_insensitive();
    assert_eq!(
      canon(&tags, json!(["b", "A", "a", null])).unwrap(),
      CanonicalValue::List(vec![text("a"), text("b")])
    );
    assert!(canon(&spec(FieldType::Text), json!(["a"])).is_err());
    assert!(canon(&tags, json!([["a"]])).is_err());
  }

  #[test]
  fn validators_apply_to_canonical_values() {
    let status = spec(FieldType::Text).case_insensitive().validator(Validator {
      one_of: vec!["open".into(), "paid".into()],
      ..Validator::default()
    });
    assert!(canon(&status, json!("PAID")).is_ok());
    assert!(canon(&status, json!("void")).is_err());

    let qty = spec(FieldType::Integer).validator(Validator {
      min: Some(Decimal::ZERO),
      ..Validator::default()
    });
    assert!(canon(&qty, json!(-1)).is_err());
  }

  #[test]
  fn canonicalisation_is_idempotent() {
    let cases = [
      (spec(FieldType::LegalName).case_insensitive(), json!("ACME CORP.")),
      (spec(FieldType::Decimal).scale(3), json!("12.34567")),
      (spec(FieldType::Timestamp), json!("2024-03-09T10:00:00+02:00")),
      (spec(FieldType::Date), json!("09.03.2024")),
      (spec(FieldType::CountryCode), json!("germany")),
      (spec(FieldType::Boolean), json!("yes")),
    ];
    for (spec, raw) in cases {
      let once = canon(&spec, raw).unwrap();
      let twice = canon(&spec, once.to_plain_json()).unwrap();
      assert_eq!(once, twice);
    }
  }

  #[test]
  fn records_need_required_and_identity_fields() {
    let schema = EntitySchema::new("company", 1, "name")
      .with_field("name", spec(FieldType::LegalName).case_insensitive())
      .with_field("country", spec(FieldType::CountryCode).required())
      .with_field("employees", spec(FieldType::Integer));

    let raw = json!({"name": "Acme Corp", "country": "usa", "employees": null});
    let record = canonicalize_record(&schema, raw.as_object().unwrap()).unwrap();
    assert_eq!(record.identity_value, "acme");
    assert_eq!(record.fields.len(), 2);

    let no_country = json!({"name": "Acme Corp"});
    assert!(canonicalize_record(&schema, no_country.as_object().unwrap()).is_err());
    let no_name = json!({"country": "US"});
    assert!(canonicalize_record(&schema, no_name.as_object().unwrap()).is_err());
  }

  #[test]
  fn canonicalizer_follows_the_active_version() {
    let v1 = EntitySchema::new("company", 1, "name")
      .with_field("name", spec(FieldType::LegalName).case_insensitive());
    let mut v2 = v1.clone().with_field("country", spec(FieldType::CountryCode));
    v2.version = 2;
    let mut registry = SchemaRegistry::new();
    registry.publish(v1).unwrap();
    registry.publish(v2).unwrap();

    let canonicalizer = Canonicalizer::new(&registry);
    assert_eq!(
      canonicalizer.canonicalize("company", "name", &json!(" ACME Corp. ")).unwrap(),
      text("acme")
    );
    assert_eq!(
      canonicalizer.canonicalize("company", "country", &json!("germany")).unwrap(),
      text("DE")
    );

    registry.activate("company", 1).unwrap();
    let canonicalizer = Canonicalizer::new(&registry);
    assert!(matches!(
      canonicalizer.canonicalize("company", "country", &json!("DE")),
      Err(Error::UnknownFieldPolicy { schema_version: 1, .. })
    ));
    assert!(matches!(
      canonicalizer.canonicalize("vessel", "name", &json!("Argo")),
      Err(Error::UnknownSchema { .. })
    ));
  }

  #[test]
  fn null_is_malformed() {
    assert!(canon(&spec(FieldType::Text), Value::Null).is_err());
  }
}
