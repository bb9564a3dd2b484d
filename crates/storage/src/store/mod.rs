#![forbid(unsafe_code)]

mod collection;
mod defaults;
mod error;
mod hosts;
mod metas;
mod query;
mod relations;
mod requests;

pub use error::StoreError;
pub use requests::*;

use rl_core::BundleRegistry;
use rl_core::ids::{HostId, MetaId};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DB_FILE: &str = "revlink.db";
const SCHEMA_VERSION: i64 = 1;

/// Transactional store for host, meta and relation records plus the
/// relation-synchronization engine that runs inside host saves. All
/// collaborators are passed in at construction; nothing is resolved from
/// ambient state.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    storage_dir: PathBuf,
    registry: BundleRegistry,
}

impl SqliteStore {
    pub fn open(
        storage_dir: impl AsRef<Path>,
        registry: BundleRegistry,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;

        let db_path = storage_dir.join(DB_FILE);
        let conn = Connection::open(db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        preflight_gate(&conn)?;
        install_schema(&conn)?;

        Ok(Self {
            conn,
            storage_dir,
            registry,
        })
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn registry(&self) -> &BundleRegistry {
        &self.registry
    }
}

fn preflight_gate(conn: &Connection) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let mut rows = stmt.query([])?;
    let mut tables = BTreeSet::new();
    while let Some(row) = rows.next()? {
        tables.insert(row.get::<_, String>(0)?);
    }

    if tables.is_empty() {
        return Ok(());
    }

    let required: BTreeSet<&str> = [
        "store_state",
        "hosts",
        "host_revisions",
        "metas",
        "meta_revisions",
        "meta_defaults",
        "relations",
        "relation_revisions",
    ]
    .into_iter()
    .collect();

    if tables
        .iter()
        .any(|table| !required.contains(table.as_str()))
    {
        return Err(StoreError::InvalidInput(
            "RESET_REQUIRED: unsupported tables detected",
        ));
    }

    for table in required {
        if !tables.contains(table) {
            return Err(StoreError::InvalidInput(
                "RESET_REQUIRED: required table is missing",
            ));
        }
    }

    let version = conn
        .query_row(
            "SELECT schema_version FROM store_state WHERE singleton=1",
            [],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match version {
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        Some(_) => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema version mismatch",
        )),
        None => Err(StoreError::InvalidInput(
            "RESET_REQUIRED: schema state row is missing",
        )),
    }
}

fn install_schema(conn: &Connection) -> Result<(), StoreError> {
    let now_ms = now_ms();

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS store_state (
          singleton INTEGER PRIMARY KEY CHECK(singleton = 1),
          schema_version INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS hosts (
          id TEXT PRIMARY KEY,
          current_revision INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS host_revisions (
          host TEXT NOT NULL,
          revision INTEGER NOT NULL,
          published INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(host, revision),
          FOREIGN KEY(host) REFERENCES hosts(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS metas (
          id TEXT PRIMARY KEY,
          bundle TEXT NOT NULL,
          revision_seq INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS meta_revisions (
          meta TEXT NOT NULL,
          revision INTEGER NOT NULL,
          enabled INTEGER NOT NULL,
          fields_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(meta, revision),
          FOREIGN KEY(meta) REFERENCES metas(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS meta_defaults (
          meta TEXT PRIMARY KEY,
          revision INTEGER NOT NULL,
          FOREIGN KEY(meta) REFERENCES metas(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS relations (
          id TEXT PRIMARY KEY,
          bundle TEXT NOT NULL,
          host TEXT NOT NULL,
          meta TEXT NOT NULL,
          revision_seq INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(host, meta),
          FOREIGN KEY(host) REFERENCES hosts(id) ON DELETE CASCADE,
          FOREIGN KEY(meta) REFERENCES metas(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_relations_meta
          ON relations(meta, host);

        CREATE TABLE IF NOT EXISTS relation_revisions (
          relation TEXT NOT NULL,
          revision INTEGER NOT NULL,
          host_revision INTEGER NOT NULL,
          meta_revision INTEGER NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY(relation, revision),
          FOREIGN KEY(relation) REFERENCES relations(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_relation_revisions_host
          ON relation_revisions(host_revision, relation);
        "#,
    )?;

    conn.execute(
        "INSERT INTO store_state(singleton, schema_version, created_at_ms, updated_at_ms) \
         VALUES (1, ?1, ?2, ?2) \
         ON CONFLICT(singleton) DO UPDATE SET schema_version=excluded.schema_version, updated_at_ms=excluded.updated_at_ms",
        rusqlite::params![SCHEMA_VERSION, now_ms],
    )?;

    Ok(())
}

pub(crate) fn canonicalize_host(value: &str) -> Result<HostId, StoreError> {
    HostId::try_new(value).map_err(|_| StoreError::InvalidInput("invalid host id"))
}

pub(crate) fn canonicalize_meta(value: &str) -> Result<MetaId, StoreError> {
    MetaId::try_new(value).map_err(|_| StoreError::InvalidInput("invalid meta id"))
}

pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == ErrorCode::ConstraintViolation
                || message.as_deref().is_some_and(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

pub(crate) fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration,
        Err(_) => return 0,
    };

    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
