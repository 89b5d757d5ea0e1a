//! [`SqliteStore`]: the SQLite implementation of [`TruthStore`].

use std::path::Path;

use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior};
use tracing::debug;

use verity_core::{
  hash::ContentId,
  identity::{EntityId, EntityMetadata, ObservationId},
  observation::{Observation, PendingCommit, Source},
  reducer::compute_snapshot,
  schema::PolicySet,
  snapshot::EntitySnapshot,
  store::{CommitOutcome, ObservationFilter, TruthStore},
};

use crate::{
  Error, Result,
  encode::{RawEntity, RawObservation, RawSnapshot, RawSource, encode_dt, encode_tier},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Verity store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── Transaction bodies ──────────────────────────────────────────────────────
//
// These run on the connection thread. Each one opens its own IMMEDIATE
// transaction; returning early without `commit()` rolls it back.

fn commit_tx(
  conn: &mut Connection,
  pending: PendingCommit,
  policies: &PolicySet,
) -> Result<CommitOutcome> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let content_id = pending.source.content_id.clone();

  let observation_id = pending.observation.observation_id.clone();

  let existing: Option<String> = tx
    .query_row(
      "SELECT entity_id FROM observations WHERE observation_id = ?1",
      rusqlite::params![observation_id.as_str()],
      |row| row.get(0),
    )
    .optional()?;

  if let Some(entity_id) = existing {
    let entity_id = EntityId::parse(&entity_id)?;
    let snapshot = latest_snapshot(&tx, &entity_id)?
      .ok_or_else(|| verity_core::Error::EntityNotFound(entity_id.clone()))?;
    debug!(observation_id = %observation_id, "observation already recorded");
    return Ok(CommitOutcome {
      entity_id,
      observation_id,
      content_id,
      deduplicated: true,
      snapshot,
    });
  }

  insert_source(&tx, &pending.source)?;
  insert_entity(&tx, &pending.entity)?;
  insert_observation(&tx, &pending.observation)?;

  let entity_id = pending.observation.entity_id;
  let observations = load_observations(&tx, &entity_id, &ObservationFilter::default())?;
  let snapshot = compute_snapshot(&entity_id, &observations, policies)?;
  insert_snapshot(&tx, &snapshot)?;
  tx.commit()?;

  Ok(CommitOutcome {
    entity_id,
    observation_id,
    content_id,
    deduplicated: false,
    snapshot,
  })
}

fn recompute_tx(
  conn: &mut Connection,
  entity_id: &EntityId,
  policies: &PolicySet,
) -> Result<EntitySnapshot> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let observations = load_observations(&tx, entity_id, &ObservationFilter::default())?;
  if observations.is_empty() {
    return Err(verity_core::Error::EntityNotFound(entity_id.clone()).into());
  }
  let snapshot = compute_snapshot(entity_id, &observations, policies)?;
  insert_snapshot(&tx, &snapshot)?;
  tx.commit()?;
  Ok(snapshot)
}

/// Sources are shared; a repeat of the same material is ignored.
fn insert_source(conn: &Connection, source: &Source) -> Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO sources (
       content_id, payload, producer_id, producer_version, producer_tier,
       produced_at, source_refs, ingested_at, tenant_id
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    rusqlite::params![
      source.content_id.as_str(),
      serde_json::to_string(&source.payload)?,
      source.producer.producer_id,
      source.producer.producer_version,
      encode_tier(source.producer.tier),
      source.producer.produced_at.map(encode_dt),
      serde_json::to_string(&source.source_refs)?,
      encode_dt(source.ingested_at),
      source.tenant_id,
    ],
  )?;
  Ok(())
}

/// Entities are created implicitly; the first observation's metadata wins.
fn insert_entity(conn: &Connection, entity: &EntityMetadata) -> Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO entities (entity_id, entity_type, identity_value, first_observed_at)
     VALUES (?1, ?2, ?3, ?4)",
    rusqlite::params![
      entity.entity_id.as_str(),
      entity.entity_type,
      entity.identity_value,
      encode_dt(entity.first_observed_at),
    ],
  )?;
  Ok(())
}

fn insert_observation(conn: &Connection, obs: &Observation) -> Result<()> {
  conn.execute(
    "INSERT INTO observations (
       observation_id, entity_id, entity_type, schema_version, source_id,
       producer_id, producer_version, fields, specificity_score,
       source_priority, observed_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    rusqlite::params![
      obs.observation_id.as_str(),
      obs.entity_id.as_str(),
      obs.entity_type,
      obs.schema_version,
      obs.source_id.as_str(),
      obs.producer_id,
      obs.producer_version,
      serde_json::to_string(&obs.fields)?,
      obs.specificity_score,
      obs.source_priority,
      encode_dt(obs.observed_at),
    ],
  )?;
  Ok(())
}

fn insert_snapshot(conn: &Connection, snapshot: &EntitySnapshot) -> Result<()> {
  let revision: i64 = conn.query_row(
    "SELECT COALESCE(MAX(revision), 0) + 1 FROM snapshots WHERE entity_id = ?1",
    rusqlite::params![snapshot.entity_id.as_str()],
    |row| row.get(0),
  )?;
  let observation_count = i64::try_from(snapshot.observation_count)
    .map_err(|_| Error::Corrupt("observation_count exceeds i64".into()))?;

  conn.execute(
    "INSERT INTO snapshots (
       entity_id, revision, entity_type, schema_version, computed_at,
       observation_count, fields, provenance
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    rusqlite::params![
      snapshot.entity_id.as_str(),
      revision,
      snapshot.entity_type,
      snapshot.schema_version,
      encode_dt(snapshot.computed_at),
      observation_count,
      serde_json::to_string(&snapshot.fields)?,
      serde_json::to_string(&snapshot.provenance)?,
    ],
  )?;
  debug!(entity_id = %snapshot.entity_id, revision, "snapshot appended");
  Ok(())
}

fn load_observations(
  conn: &Connection,
  entity_id: &EntityId,
  filter: &ObservationFilter,
) -> Result<Vec<Observation>> {
  let limit = filter
    .limit
    .map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
  let sql = format!(
    "SELECT {} FROM observations
     WHERE entity_id = ?1
       AND (?2 IS NULL OR EXISTS (SELECT 1 FROM json_each(fields) WHERE key = ?2))
       AND (?3 IS NULL OR producer_id = ?3)
       AND (?4 IS NULL OR source_priority >= ?4)
       AND (?5 IS NULL OR observed_at > ?5)
       AND (?6 IS NULL OR observed_at < ?6)
       AND (?7 IS NULL OR schema_version = ?7)
     ORDER BY observed_at DESC, observation_id ASC
     LIMIT ?8",
    RawObservation::COLUMNS
  );

  let mut stmt = conn.prepare(&sql)?;
  let raws = stmt
    .query_map(
      rusqlite::params![
        entity_id.as_str(),
        filter.field.as_deref(),
        filter.producer_id.as_deref(),
        filter.min_priority,
        filter.observed_after.map(encode_dt),
        filter.observed_before.map(encode_dt),
        filter.schema_version,
        limit,
      ],
      RawObservation::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raws.into_iter().map(RawObservation::into_observation).collect()
}

fn latest_snapshot(conn: &Connection, entity_id: &EntityId) -> Result<Option<EntitySnapshot>> {
  let raw = conn
    .query_row(
      &format!(
        "SELECT {} FROM snapshots WHERE entity_id = ?1 ORDER BY revision DESC LIMIT 1",
        RawSnapshot::COLUMNS
      ),
      rusqlite::params![entity_id.as_str()],
      RawSnapshot::from_row,
    )
    .optional()?;
  raw.map(RawSnapshot::into_snapshot).transpose()
}

// ─── TruthStore impl ─────────────────────────────────────────────────────────

impl TruthStore for SqliteStore {
  type Error = Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn commit(
    &self,
    pending: PendingCommit,
    policies: PolicySet,
  ) -> Result<CommitOutcome> {
    self
      .conn
      .call(move |conn| Ok(commit_tx(conn, pending, &policies)))
      .await?
  }

  async fn recompute(
    &self,
    entity_id: EntityId,
    policies: PolicySet,
  ) -> Result<EntitySnapshot> {
    self
      .conn
      .call(move |conn| Ok(recompute_tx(conn, &entity_id, &policies)))
      .await?
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_source(&self, content_id: ContentId) -> Result<Option<Source>> {
    let raw: Option<RawSource> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM sources WHERE content_id = ?1",
                RawSource::COLUMNS
              ),
              rusqlite::params![content_id.as_str()],
              RawSource::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawSource::into_source).transpose()
  }

  async fn get_entity(&self, entity_id: EntityId) -> Result<Option<EntityMetadata>> {
    let raw: Option<RawEntity> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM entities WHERE entity_id = ?1",
                RawEntity::COLUMNS
              ),
              rusqlite::params![entity_id.as_str()],
              RawEntity::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntity::into_entity).transpose()
  }

  async fn list_entities(&self, entity_type: Option<String>) -> Result<Vec<EntityMetadata>> {
    let raws: Vec<RawEntity> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM entities
           WHERE (?1 IS NULL OR entity_type = ?1)
           ORDER BY entity_id",
          RawEntity::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![entity_type], RawEntity::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntity::into_entity).collect()
  }

  async fn get_observation(
    &self,
    observation_id: ObservationId,
  ) -> Result<Option<Observation>> {
    let raw: Option<RawObservation> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM observations WHERE observation_id = ?1",
                RawObservation::COLUMNS
              ),
              rusqlite::params![observation_id.as_str()],
              RawObservation::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawObservation::into_observation).transpose()
  }

  async fn list_observations<'a>(
    &'a self,
    entity_id: EntityId,
    filter: &'a ObservationFilter,
  ) -> Result<Vec<Observation>> {
    let filter = filter.clone();
    self
      .conn
      .call(move |conn| Ok(load_observations(conn, &entity_id, &filter)))
      .await?
  }

  async fn get_snapshot(&self, entity_id: EntityId) -> Result<Option<EntitySnapshot>> {
    self
      .conn
      .call(move |conn| Ok(latest_snapshot(conn, &entity_id)))
      .await?
  }

  async fn snapshot_history(&self, entity_id: EntityId) -> Result<Vec<EntitySnapshot>> {
    let raws: Vec<RawSnapshot> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM snapshots WHERE entity_id = ?1 ORDER BY revision",
          RawSnapshot::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![entity_id.as_str()], RawSnapshot::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawSnapshot::into_snapshot).collect()
  }
}
