//! SQL schema for the Verity SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// Timestamps are fixed-width RFC 3339 UTC strings with nanoseconds, so
/// lexical order is chronological order.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Every table is strictly append-only.
-- No UPDATE or DELETE is ever issued against any of them.
-- One source may feed many observations, across entities.

CREATE TABLE IF NOT EXISTS sources (
    content_id       TEXT PRIMARY KEY,  -- 'sha256:<hex>'
    payload          TEXT NOT NULL,     -- JSON
    producer_id      TEXT NOT NULL,
    producer_version TEXT NOT NULL,
    producer_tier    TEXT NOT NULL,
    produced_at      TEXT,
    source_refs      TEXT NOT NULL DEFAULT '[]',
    ingested_at      TEXT NOT NULL,
    tenant_id        TEXT
);

CREATE TABLE IF NOT EXISTS entities (
    entity_id         TEXT PRIMARY KEY,  -- 'ent_<hex>'
    entity_type       TEXT NOT NULL,
    identity_value    TEXT NOT NULL,
    first_observed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS observations (
    observation_id    TEXT PRIMARY KEY,  -- 'obs_<hex>'
    entity_id         TEXT NOT NULL REFERENCES entities(entity_id),
    entity_type       TEXT NOT NULL,
    schema_version    INTEGER NOT NULL,
    source_id         TEXT NOT NULL REFERENCES sources(content_id),
    producer_id       TEXT NOT NULL,
    producer_version  TEXT NOT NULL,
    fields            TEXT NOT NULL,     -- JSON object of tagged canonical values
    specificity_score INTEGER NOT NULL,
    source_priority   INTEGER NOT NULL,
    observed_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshots (
    entity_id         TEXT NOT NULL REFERENCES entities(entity_id),
    revision          INTEGER NOT NULL,  -- per-entity append counter
    entity_type       TEXT NOT NULL,
    schema_version    INTEGER NOT NULL,
    computed_at       TEXT NOT NULL,
    observation_count INTEGER NOT NULL,
    fields            TEXT NOT NULL,
    provenance        TEXT NOT NULL,
    PRIMARY KEY (entity_id, revision)
);

CREATE INDEX IF NOT EXISTS entities_type_idx        ON entities(entity_type);
CREATE INDEX IF NOT EXISTS observations_entity_idx  ON observations(entity_id, observed_at);
CREATE INDEX IF NOT EXISTS observations_source_idx  ON observations(source_id);
CREATE INDEX IF NOT EXISTS snapshots_computed_idx   ON snapshots(entity_id, computed_at, observation_count);

PRAGMA user_version = 1;
";
