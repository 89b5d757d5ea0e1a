//! Versioned, append-only schema and merge-policy registry.
//!
//! Schemas are keyed by `(entity_type, version)`. Publishing is additive: a
//! published version never changes, a newer version may only add fields or
//! change merge policies. Rollback points the registry at an older version;
//! nothing is ever removed.

use std::{collections::BTreeMap, sync::Arc};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Largest scale `rust_decimal` can represent.
const MAX_DECIMAL_SCALE: u32 = 28;

// ─── Merge policy ────────────────────────────────────────────────────────────

/// How multiple observations of one field resolve to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
  LastWriteWins,
  HighestPriority,
  MostSpecific,
  MergeArray,
}

/// Extra ordering key consulted before the mandatory
/// `observed_at DESC, observation_id ASC` chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
  SourcePriority,
  Specificity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
  pub strategy:    MergeStrategy,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub tie_breaker: Option<TieBreaker>,
}

impl MergePolicy {
  pub const fn new(strategy: MergeStrategy) -> Self {
    Self { strategy, tie_breaker: None }
  }

  pub const fn with_tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
    self.tie_breaker = Some(tie_breaker);
    self
  }
}

// ─── Field definitions ───────────────────────────────────────────────────────

/// The canonical type of a field; selects the canonicalisation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
  Text,
  /// Organisation name; legal-entity suffixes are stripped.
  LegalName,
  Email,
  /// ISO 3166-1 alpha-2, upper case. Common country names are accepted.
  CountryCode,
  Integer,
  /// Fixed-point decimal rounded to the field's `scale`.
  Decimal,
  Boolean,
  Date,
  Timestamp,
}

/// Constraints checked against the canonical value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Validator {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min_length: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_length: Option<usize>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub min:        Option<Decimal>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max:        Option<Decimal>,
  /// Allowed canonical values. Empty means unrestricted.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub one_of:     Vec<String>,
}

impl Validator {
  pub fn is_empty(&self) -> bool { *self == Self::default() }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
  #[serde(rename = "type")]
  pub field_type:             FieldType,
  /// Required in producer output accepted by the idempotence gate.
  #[serde(default)]
  pub required:               bool,
  /// Fold case during canonicalisation.
  #[serde(default)]
  pub case_insensitive:       bool,
  /// Decimal places kept by `decimal` fields.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub scale:                  Option<u32>,
  /// Offset applied to timestamps that carry no zone of their own.
  #[serde(default)]
  pub default_offset_minutes: i32,
  #[serde(default, skip_serializing_if = "Validator::is_empty")]
  pub validator:              Validator,
  pub merge:                  MergePolicy,
}

impl FieldSpec {
  pub fn new(field_type: FieldType, strategy: MergeStrategy) -> Self {
    Self {
      field_type,
      required: false,
      case_insensitive: false,
      scale: (field_type == FieldType::Decimal).then_some(2),
      default_offset_minutes: 0,
      validator: Validator::default(),
      merge: MergePolicy::new(strategy),
    }
  }

  /// Whether `other` turns the same raw input into the same canonical value.
  /// Merge policy, validator and `required` do not take part.
  pub fn canonicalizes_like(&self, other: &FieldSpec) -> bool {
    self.field_type == other.field_type
      && self.case_insensitive == other.case_insensitive
      && self.scale == other.scale
      && self.default_offset_minutes == other.default_offset_minutes
  }

  pub fn required(mut self) -> Self {
    self.required = true;
    self
  }

  pub fn case_insensitive(mut self) -> Self {
    self.case_insensitive = true;
    self
  }

  pub fn scale(mut self, scale: u32) -> Self {
    self.scale = Some(scale);
    self
  }

  pub fn offset_minutes(mut self, minutes: i32) -> Self {
    self.default_offset_minutes = minutes;
    self
  }

  pub fn validator(mut self, validator: Validator) -> Self {
    self.validator = validator;
    self
  }

  pub fn tie_breaker(mut self, tie_breaker: TieBreaker) -> Self {
    self.merge = self.merge.with_tie_breaker(tie_breaker);
    self
  }
}

// ─── Entity schema ───────────────────────────────────────────────────────────

/// One immutable version of an entity type's field definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
  pub entity_type:    String,
  pub version:        u32,
  /// Field whose canonical value determines the entity id.
  pub identity_field: String,
  pub fields:         BTreeMap<String, FieldSpec>,
}

impl EntitySchema {
  pub fn new(
    entity_type: impl Into<String>,
    version: u32,
    identity_field: impl Into<String>,
  ) -> Self {
    Self {
      entity_type: entity_type.into(),
      version,
      identity_field: identity_field.into(),
      fields: BTreeMap::new(),
    }
  }

  pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
    self.fields.insert(name.into(), spec);
    self
  }

  pub fn field(&self, name: &str) -> Option<&FieldSpec> { self.fields.get(name) }

  pub fn identity_spec(&self) -> Option<&FieldSpec> {
    self.fields.get(&self.identity_field)
  }

  /// The merge policies of this version, as consumed by the reducer.
  pub fn policy_set(&self) -> PolicySet {
    PolicySet {
      entity_type:    self.entity_type.clone(),
      schema_version: self.version,
      policies:       self
        .fields
        .iter()
        .map(|(name, spec)| (name.clone(), spec.merge))
        .collect(),
    }
  }

  /// Structural checks performed before a schema may be published.
  pub fn validate(&self) -> Result<()> {
    let invalid = |reason: String| {
      Err(Error::InvalidSchema(format!(
        "{} v{}: {reason}",
        self.entity_type, self.version
      )))
    };

    if !is_slug(&self.entity_type) {
      return invalid("entity_type must match [a-z0-9_]+".into());
    }
    if self.version == 0 {
      return invalid("versions start at 1".into());
    }
    let Some(identity) = self.identity_spec() else {
      return invalid(format!(
        "identity field {:?} is not declared",
        self.identity_field
      ));
    };
    if identity.merge.strategy == MergeStrategy::MergeArray {
      return invalid("the identity field cannot use merge_array".into());
    }

    for (name, spec) in &self.fields {
      if !is_slug(name) {
        return invalid(format!("field name {name:?} must match [a-z0-9_]+"));
      }
      if spec.field_type == FieldType::Decimal {
        match spec.scale {
          Some(s) if s <= MAX_DECIMAL_SCALE => {}
          _ => {
            return invalid(format!(
              "decimal field {name} needs a scale between 0 and {MAX_DECIMAL_SCALE}"
            ));
          }
        }
      }
      if spec.default_offset_minutes.abs() >= 24 * 60 {
        return invalid(format!("field {name} has an out-of-range offset"));
      }
    }
    Ok(())
  }
}

fn is_slug(s: &str) -> bool {
  !s.is_empty()
    && s
      .bytes()
      .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}

// ─── Policy set ──────────────────────────────────────────────────────────────

/// The per-field merge policies of a single schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
  pub entity_type:    String,
  pub schema_version: u32,
  pub policies:       BTreeMap<String, MergePolicy>,
}

impl PolicySet {
  pub fn get(&self, field: &str) -> Option<&MergePolicy> {
    self.policies.get(field)
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// On-disk shape of a registry file.
#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
  #[serde(default)]
  schemas: Vec<EntitySchema>,
  /// Optional active-version overrides, e.g. after a rollback.
  #[serde(default)]
  active:  BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
  schemas: BTreeMap<String, BTreeMap<u32, Arc<EntitySchema>>>,
  active:  BTreeMap<String, u32>,
}

impl SchemaRegistry {
  pub fn new() -> Self { Self::default() }

  /// Load a registry from TOML. Schemas are published in
  /// `(entity_type, version)` order, then `[active]` overrides are applied.
  pub fn from_toml_str(s: &str) -> Result<Self> {
    let mut file: RegistryFile = toml::from_str(s)?;
    file
      .schemas
      .sort_by(|a, b| (&a.entity_type, a.version).cmp(&(&b.entity_type, b.version)));

    let mut registry = Self::new();
    for schema in file.schemas {
      registry.publish(schema)?;
    }
    for (entity_type, version) in file.active {
      registry.activate(&entity_type, version)?;
    }
    Ok(registry)
  }

  /// Publish a schema version and make it active.
  ///
  /// Returns `false` when the identical version was already published (a
  /// no-op). Any other change to an existing version is a
  /// [`Error::SchemaConflict`].
  pub fn publish(&mut self, schema: EntitySchema) -> Result<bool> {
    schema.validate()?;

    if let Some(versions) = self.schemas.get(&schema.entity_type) {
      if let Some(existing) = versions.get(&schema.version) {
        if **existing == schema {
          return Ok(false);
        }
        return Err(Error::SchemaConflict {
          entity_type: schema.entity_type,
          version:     schema.version,
        });
      }
      if let Some((&latest_version, latest)) = versions.last_key_value() {
        check_compatible(latest, latest_version, &schema)?;
      }
    }

    let entity_type = schema.entity_type.clone();
    let version = schema.version;
    self
      .schemas
      .entry(entity_type.clone())
      .or_default()
      .insert(version, Arc::new(schema));
    self.active.insert(entity_type, version);
    Ok(true)
  }

  /// Point the registry at an already-published version.
  pub fn activate(&mut self, entity_type: &str, version: u32) -> Result<()> {
    self.get(entity_type, version)?;
    self.active.insert(entity_type.to_owned(), version);
    Ok(())
  }

  pub fn active_version(&self, entity_type: &str) -> Result<u32> {
    self.active.get(entity_type).copied().ok_or_else(|| {
      Error::UnknownSchema { entity_type: entity_type.to_owned(), version: None }
    })
  }

  pub fn active(&self, entity_type: &str) -> Result<Arc<EntitySchema>> {
    self.get(entity_type, self.active_version(entity_type)?)
  }

  pub fn get(&self, entity_type: &str, version: u32) -> Result<Arc<EntitySchema>> {
    self
      .schemas
      .get(entity_type)
      .and_then(|versions| versions.get(&version))
      .cloned()
      .ok_or_else(|| Error::UnknownSchema {
        entity_type: entity_type.to_owned(),
        version:     Some(version),
      })
  }

  pub fn versions(&self, entity_type: &str) -> Vec<u32> {
    self
      .schemas
      .get(entity_type)
      .map(|v| v.keys().copied().collect())
      .unwrap_or_default()
  }

  pub fn entity_types(&self) -> Vec<String> { self.schemas.keys().cloned().collect() }

  pub fn get_policy(
    &self,
    entity_type: &str,
    field_name: &str,
    schema_version: u32,
  ) -> Result<MergePolicy> {
    Ok(
      self
        .get_field_definition(entity_type, field_name, schema_version)?
        .merge,
    )
  }

  pub fn get_field_definition(
    &self,
    entity_type: &str,
    field_name: &str,
    schema_version: u32,
  ) -> Result<FieldSpec> {
    self
      .get(entity_type, schema_version)?
      .field(field_name)
      .cloned()
      .ok_or_else(|| Error::UnknownFieldPolicy {
        entity_type: entity_type.to_owned(),
        field: field_name.to_owned(),
        schema_version,
      })
  }

  pub fn policy_set(&self, entity_type: &str, schema_version: u32) -> Result<PolicySet> {
    Ok(self.get(entity_type, schema_version)?.policy_set())
  }
}

/// A newer version may add fields or change policies, nothing else. The
/// identity field keeps its canonicalisation so entity ids never move.
fn check_compatible(
  previous: &EntitySchema,
  previous_version: u32,
  next: &EntitySchema,
) -> Result<()> {
  let incompatible = |reason: String| {
    Err(Error::IncompatibleSchema {
      entity_type: next.entity_type.clone(),
      version: next.version,
      reason,
    })
  };

  if next.version < previous_version {
    return incompatible(format!(
      "versions must increase (latest is v{previous_version})"
    ));
  }
  if next.identity_field != previous.identity_field {
    return incompatible(format!(
      "identity field changed from {:?}",
      previous.identity_field
    ));
  }
  if let (Some(before), Some(after)) = (previous.identity_spec(), next.identity_spec())
    && !before.canonicalizes_like(after)
  {
    return incompatible(format!(
      "identity field {} changed how it canonicalises",
      next.identity_field
    ));
  }
  for (name, spec) in &previous.fields {
    match next.field(name) {
      None => return incompatible(format!("field {name} was removed")),
      Some(s) if s.field_type != spec.field_type => {
        return incompatible(format!("field {name} changed type"));
      }
      Some(_) => {}
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn company_v1() -> EntitySchema {
    EntitySchema::new("company", 1, "name")
      .with_field(
        "name",
        FieldSpec::new(FieldType::LegalName, MergeStrategy::HighestPriority)
          .case_insensitive()
          .required(),
      )
      .with_field(
        "country",
        FieldSpec::new(FieldType::CountryCode, MergeStrategy::MostSpecific),
      )
  }

  #[test]
  fn publish_activates_and_is_idempotent() {
    let mut reg = SchemaRegistry::new();
    assert!(reg.publish(company_v1()).unwrap());
    assert!(!reg.publish(company_v1()).unwrap());
    assert_eq!(reg.active_version("company").unwrap(), 1);
  }

  #[test]
  fn republishing_a_version_with_changes_conflicts() {
    let mut reg = SchemaRegistry::new();
    reg.publish(company_v1()).unwrap();
    let changed = company_v1().with_field(
      "website",
      FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins),
    );
    let err = reg.publish(changed).unwrap_err();
    assert!(matches!(err, Error::SchemaConflict { version: 1, .. }));
  }

  #[test]
  fn newer_versions_are_additive_only() {
    let mut reg = SchemaRegistry::new();
    reg.publish(company_v1()).unwrap();

    let mut removed = company_v1();
    removed.version = 2;
    removed.fields.remove("country");
    assert!(matches!(
      reg.publish(removed).unwrap_err(),
      Error::IncompatibleSchema { .. }
    ));

    let mut retyped = company_v1();
    retyped.version = 2;
    retyped
      .fields
      .insert("country".into(), FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins));
    assert!(matches!(
      reg.publish(retyped).unwrap_err(),
      Error::IncompatibleSchema { .. }
    ));

    let mut v2 = company_v1().with_field(
      "industries",
      FieldSpec::new(FieldType::Text, MergeStrategy::MergeArray).case_insensitive(),
    );
    v2.version = 2;
    v2.fields.get_mut("country").unwrap().merge =
      MergePolicy::new(MergeStrategy::LastWriteWins);
    assert!(reg.publish(v2).unwrap());
    assert_eq!(reg.active_version("company").unwrap(), 2);
    assert_eq!(reg.versions("company"), vec![1, 2]);
  }

  #[test]
  fn identity_canonicalisation_is_frozen() {
    let mut reg = SchemaRegistry::new();
    reg.publish(company_v1()).unwrap();

    let mut case_sensitive = company_v1();
    case_sensitive.version = 2;
    case_sensitive.fields.get_mut("name").unwrap().case_insensitive = false;
    let err = reg.publish(case_sensitive).unwrap_err();
    assert!(
      matches!(&err, Error::IncompatibleSchema { reason, .. } if reason.contains("name")),
      "{err}"
    );

    let mut offset = company_v1();
    offset.version = 2;
    offset.fields.get_mut("name").unwrap().default_offset_minutes = 60;
    assert!(matches!(
      reg.publish(offset).unwrap_err(),
      Error::IncompatibleSchema { .. }
    ));
    assert_eq!(reg.versions("company"), vec![1]);

    // Merge and validation changes on the identity field are fine.
    let mut relaxed = company_v1();
    relaxed.version = 2;
    let name = relaxed.fields.get_mut("name").unwrap();
    name.required = false;
    name.merge = MergePolicy::new(MergeStrategy::LastWriteWins);
    assert!(reg.publish(relaxed).unwrap());
  }

  #[test]
  fn rollback_keeps_newer_versions() {
    let mut reg = SchemaRegistry::new();
    reg.publish(company_v1()).unwrap();
    let mut v2 = company_v1();
    v2.version = 2;
    v2.fields.get_mut("name").unwrap().merge =
      MergePolicy::new(MergeStrategy::LastWriteWins);
    reg.publish(v2).unwrap();

    reg.activate("company", 1).unwrap();
    assert_eq!(reg.active_version("company").unwrap(), 1);
    assert_eq!(
      reg.get_policy("company", "name", 2).unwrap().strategy,
      MergeStrategy::LastWriteWins
    );
    assert_eq!(
      reg.get_policy("company", "name", 1).unwrap().strategy,
      MergeStrategy::HighestPriority
    );
    assert!(reg.activate("company", 7).is_err());
  }

  #[test]
  fn unknown_field_and_schema_lookups_fail() {
    let mut reg = SchemaRegistry::new();
    reg.publish(company_v1()).unwrap();
    assert!(matches!(
      reg.get_policy("company", "ticker", 1).unwrap_err(),
      Error::UnknownFieldPolicy { schema_version: 1, .. }
    ));
    assert!(matches!(
      reg.get_policy("company", "name", 9).unwrap_err(),
      Error::UnknownSchema { version: Some(9), .. }
    ));
    assert!(matches!(
      reg.active("vessel").unwrap_err(),
      Error::UnknownSchema { version: None, .. }
    ));
  }

  #[test]
  fn validate_rejects_bad_definitions() {
    let missing_identity = EntitySchema::new("company", 1, "name");
    assert!(missing_identity.validate().is_err());

    let bad_type = EntitySchema::new("Company", 1, "name").with_field(
      "name",
      FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins),
    );
    assert!(bad_type.validate().is_err());

    let array_identity = EntitySchema::new("tag", 1, "label").with_field(
      "label",
      FieldSpec::new(FieldType::Text, MergeStrategy::MergeArray),
    );
    assert!(array_identity.validate().is_err());

    let mut no_scale =
      FieldSpec::new(FieldType::Decimal, MergeStrategy::HighestPriority);
    no_scale.scale = None;
    let invoice = EntitySchema::new("invoice", 1, "number")
      .with_field(
        "number",
        FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins),
      )
      .with_field("amount", no_scale);
    assert!(invoice.validate().is_err());
  }

  #[test]
  fn entity_type_cannot_contain_the_id_separator() {
    // Entity ids hash `entity_type:value`, so a ':' in the type would let
    // ("company:x", "y") collide with ("company", "x:y").
    let colon = EntitySchema::new("company:x", 1, "name").with_field(
      "name",
      FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins),
    );
    assert!(matches!(colon.validate(), Err(Error::InvalidSchema(_))));
    assert!(SchemaRegistry::new().publish(colon).is_err());

    let plain = EntitySchema::new("company_x", 1, "name").with_field(
      "name",
      FieldSpec::new(FieldType::Text, MergeStrategy::LastWriteWins),
    );
    assert!(plain.validate().is_ok());
  }

  #[test]
  fn loads_from_toml() {
    let reg = SchemaRegistry::from_toml_str(
      r#"
        [active]
        company = 1

        [[schemas]]
        entity_type    = "company"
        version        = 2
        identity_field = "name"

        [schemas.fields.name]
        type             = "legal_name"
        case_insensitive = true
        merge            = { strategy = "last_write_wins" }

        [schemas.fields.founded]
        type  = "date"
        merge = { strategy = "most_specific", tie_breaker = "source_priority" }

        [[schemas]]
        entity_type    = "company"
        version        = 1
        identity_field = "name"

        [schemas.fields.name]
        type             = "legal_name"
        case_insensitive = true
        merge            = { strategy = "highest_priority" }
      "#,
    )
    .unwrap();

    assert_eq!(reg.versions("company"), vec![1, 2]);
    assert_eq!(reg.active_version("company").unwrap(), 1);
    let founded = reg.get_policy("company", "founded", 2).unwrap();
    assert_eq!(founded.strategy, MergeStrategy::MostSpecific);
    assert_eq!(founded.tie_breaker, Some(TieBreaker::SourcePriority));
  }
}
