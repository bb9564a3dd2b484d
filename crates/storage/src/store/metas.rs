#![forbid(unsafe_code)]

use super::defaults::{clear_default_if_points_at, default_revision, set_default_revision};
use super::relations::orphan_sweep;
use super::{SqliteStore, StoreError, canonicalize_meta, now_ms};
use rl_core::change::has_tracked_changes;
use rl_core::ids::{BundleId, MetaId};
use rl_core::{BundleRegistry, MetaRecord};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde_json::Value;
use std::collections::BTreeMap;

pub(crate) struct MetaRevisionRow {
    pub revision: i64,
    pub enabled: bool,
    pub fields: BTreeMap<String, Value>,
}

impl SqliteStore {
    /// Standalone meta save. Host saves go through `save_host`, which runs
    /// the same logic inside the host transaction and then synchronizes
    /// relations.
    pub fn save_meta(&mut self, mut meta: MetaRecord) -> Result<MetaRecord, StoreError> {
        let tx = self.conn.transaction()?;
        save_meta_tx(&tx, &self.registry, &mut meta)?;
        tx.commit()?;
        meta.clear_transients();
        Ok(meta)
    }

    /// Resolves the revision the default pointer names. A meta without a
    /// pointer is not found here even though explicit revision loads work.
    pub fn load_meta_current(&self, meta_id: &str) -> Result<Option<MetaRecord>, StoreError> {
        let id = canonicalize_meta(meta_id)?;
        let Some(revision) = default_revision(&self.conn, &id)? else {
            return Ok(None);
        };
        load_meta_revision_on(&self.conn, &id, revision)
    }

    pub fn load_meta_revision(
        &self,
        meta_id: &str,
        revision: i64,
    ) -> Result<Option<MetaRecord>, StoreError> {
        let id = canonicalize_meta(meta_id)?;
        load_meta_revision_on(&self.conn, &id, revision)
    }

    pub fn list_meta_revisions(&self, meta_id: &str) -> Result<Vec<i64>, StoreError> {
        let id = canonicalize_meta(meta_id)?;
        let mut stmt = self
            .conn
            .prepare("SELECT revision FROM meta_revisions WHERE meta=?1 ORDER BY revision ASC")?;
        let mut rows = stmt.query(params![id.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, i64>(0)?);
        }
        Ok(out)
    }

    /// Deletes one meta revision iff nothing references it. Re-running on an
    /// already-absent revision is a no-op, not an error.
    pub fn delete_orphan_meta_revision(
        &mut self,
        meta_id: &str,
        revision: i64,
    ) -> Result<bool, StoreError> {
        let id = canonicalize_meta(meta_id)?;
        let tx = self.conn.transaction()?;
        let deleted = orphan_sweep(&tx, id.as_str(), revision)?;
        tx.commit()?;
        Ok(deleted)
    }
}

/// Core meta save: assign identity on first save, create a revision only
/// when tracked fields changed or a revision was forced (status change,
/// explicit request), otherwise persist in place. Honors the default
/// pointer intent last, against the revision actually written.
pub(crate) fn save_meta_tx(
    tx: &Transaction<'_>,
    registry: &BundleRegistry,
    meta: &mut MetaRecord,
) -> Result<(), StoreError> {
    let accessor = registry.accessor(meta.bundle().as_str())?;

    if meta.reverted() {
        // pinned history; the save must not touch it
        if meta.meta_ref().is_none() {
            return Err(StoreError::InvalidInput(
                "reverted meta lacks identity or revision",
            ));
        }
        return Ok(());
    }

    let now = now_ms();
    let id = match meta.id().cloned() {
        Some(id) => id,
        None => {
            let id = MetaId::try_new(uuid::Uuid::new_v4().to_string())
                .map_err(|_| StoreError::InvalidInput("generated meta id is invalid"))?;
            meta.assign_identity(id.clone());
            id
        }
    };

    let written = match latest_meta_revision(tx, &id)? {
        None => {
            tx.execute(
                "INSERT INTO metas(id, bundle, revision_seq, created_at_ms, updated_at_ms) \
                 VALUES (?1, ?2, 1, ?3, ?3)",
                params![id.as_str(), meta.bundle().as_str(), now],
            )?;
            insert_meta_revision(tx, &id, 1, meta, now)?;
            1
        }
        Some(prev) => {
            let changed = has_tracked_changes(accessor, meta.fields(), &prev.fields);
            let status_changed = prev.enabled != meta.enabled();
            let written = if changed || status_changed || meta.force_new_revision() {
                // revision numbers come off a high-water mark, so a number
                // freed by an orphan sweep is never handed out again
                let next = next_meta_revision(tx, &id)?;
                insert_meta_revision(tx, &id, next, meta, now)?;
                next
            } else {
                tx.execute(
                    "UPDATE meta_revisions SET enabled=?3, fields_json=?4 \
                     WHERE meta=?1 AND revision=?2",
                    params![
                        id.as_str(),
                        prev.revision,
                        meta.enabled(),
                        encode_fields(meta.fields())?
                    ],
                )?;
                prev.revision
            };
            tx.execute(
                "UPDATE metas SET updated_at_ms=?2 WHERE id=?1",
                params![id.as_str(), now],
            )?;
            written
        }
    };
    meta.set_revision_id(written);

    match meta.default_revision_intent() {
        Some(true) => set_default_revision(tx, &id, written)?,
        Some(false) => clear_default_if_points_at(tx, &id, written)?,
        None => {}
    }

    Ok(())
}

pub(crate) fn load_meta_revision_on(
    conn: &Connection,
    id: &MetaId,
    revision: i64,
) -> Result<Option<MetaRecord>, StoreError> {
    let row = conn
        .query_row(
            "SELECT m.bundle, mr.enabled, mr.fields_json \
             FROM meta_revisions mr JOIN metas m ON m.id = mr.meta \
             WHERE mr.meta=?1 AND mr.revision=?2",
            params![id.as_str(), revision],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((bundle, enabled, fields_json)) => {
            let bundle = BundleId::try_new(bundle)
                .map_err(|_| StoreError::InvalidInput("stored bundle id is invalid"))?;
            let fields = decode_fields(&fields_json)?;
            Ok(Some(MetaRecord::persisted(
                id.clone(),
                revision,
                bundle,
                enabled,
                fields,
            )))
        }
    }
}

pub(crate) fn load_latest_meta(
    conn: &Connection,
    id: &MetaId,
) -> Result<Option<MetaRecord>, StoreError> {
    let revision = conn
        .query_row(
            "SELECT MAX(revision) FROM meta_revisions WHERE meta=?1",
            params![id.as_str()],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?
        .flatten();

    match revision {
        None => Ok(None),
        Some(revision) => load_meta_revision_on(conn, id, revision),
    }
}

pub(crate) fn latest_meta_revision(
    conn: &Connection,
    id: &MetaId,
) -> Result<Option<MetaRevisionRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT revision, enabled, fields_json FROM meta_revisions \
             WHERE meta=?1 ORDER BY revision DESC LIMIT 1",
            params![id.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((revision, enabled, fields_json)) => Ok(Some(MetaRevisionRow {
            revision,
            enabled,
            fields: decode_fields(&fields_json)?,
        })),
    }
}

pub(crate) fn meta_revision_exists(
    conn: &Connection,
    meta: &str,
    revision: i64,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM meta_revisions WHERE meta=?1 AND revision=?2",
            params![meta, revision],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn next_meta_revision(conn: &Connection, id: &MetaId) -> Result<i64, StoreError> {
    let next = conn.query_row(
        "SELECT revision_seq + 1 FROM metas WHERE id=?1",
        params![id.as_str()],
        |row| row.get::<_, i64>(0),
    )?;
    conn.execute(
        "UPDATE metas SET revision_seq=?2 WHERE id=?1",
        params![id.as_str(), next],
    )?;
    Ok(next)
}

fn insert_meta_revision(
    conn: &Connection,
    id: &MetaId,
    revision: i64,
    meta: &MetaRecord,
    now: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO meta_revisions(meta, revision, enabled, fields_json, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.as_str(),
            revision,
            meta.enabled(),
            encode_fields(meta.fields())?,
            now
        ],
    )?;
    Ok(())
}

fn encode_fields(fields: &BTreeMap<String, Value>) -> Result<String, StoreError> {
    serde_json::to_string(fields).map_err(|_| StoreError::InvalidInput("fields are not serializable"))
}

fn decode_fields(raw: &str) -> Result<BTreeMap<String, Value>, StoreError> {
    serde_json::from_str(raw).map_err(|_| StoreError::InvalidInput("stored fields are not valid json"))
}
