#![forbid(unsafe_code)]

use super::hosts::host_revision_exists;
use super::metas::meta_revision_exists;
use super::{
    RelationRevisionRow, RelationRow, SqliteStore, StoreError, canonicalize_host,
    canonicalize_meta, is_constraint_violation,
};
use rl_core::ids::{HostId, MetaId};
use rl_core::{HostRef, MetaRef};
use rusqlite::{Connection, OptionalExtension, params};

pub(crate) struct PinnedRelationRow {
    pub relation: String,
    pub revision: i64,
    pub meta: String,
    pub meta_revision: i64,
}

impl SqliteStore {
    pub fn relation_for(
        &self,
        host_id: &str,
        meta_id: &str,
    ) -> Result<Option<RelationRow>, StoreError> {
        let host = canonicalize_host(host_id)?;
        let meta = canonicalize_meta(meta_id)?;
        let row = self
            .conn
            .query_row(
                "SELECT id, bundle, created_at_ms FROM relations WHERE host=?1 AND meta=?2",
                params![host.as_str(), meta.as_str()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(id, bundle, created_at_ms)| RelationRow {
            id,
            bundle,
            host: host.as_str().to_string(),
            meta: meta.as_str().to_string(),
            created_at_ms,
        }))
    }

    /// Ascending revision ids of one relation, for history audits.
    pub fn relation_revisions_for(&self, relation_id: &str) -> Result<Vec<i64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT revision FROM relation_revisions WHERE relation=?1 ORDER BY revision ASC",
        )?;
        let mut rows = stmt.query(params![relation_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, i64>(0)?);
        }
        Ok(out)
    }

    pub fn relation_revision_rows(
        &self,
        relation_id: &str,
    ) -> Result<Vec<RelationRevisionRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT revision, host_revision, meta_revision, created_at_ms \
             FROM relation_revisions WHERE relation=?1 ORDER BY revision ASC",
        )?;
        let mut rows = stmt.query(params![relation_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(RelationRevisionRow {
                relation: relation_id.to_string(),
                revision: row.get::<_, i64>(0)?,
                host_revision: row.get::<_, i64>(1)?,
                meta_revision: row.get::<_, i64>(2)?,
                created_at_ms: row.get::<_, i64>(3)?,
            });
        }
        Ok(out)
    }

    /// Meta refs pinned to exactly this host revision: the read path for
    /// "what did this host revision see".
    pub fn related_meta_refs(&self, host_ref: &HostRef) -> Result<Vec<MetaRef>, StoreError> {
        pinned_meta_refs(&self.conn, &host_ref.host, host_ref.revision)
    }

    /// Symmetric reverse lookup: host refs whose relation history pins this
    /// exact meta revision.
    pub fn related_host_refs(&self, meta_ref: &MetaRef) -> Result<Vec<HostRef>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT r.host, rr.host_revision \
             FROM relation_revisions rr JOIN relations r ON rr.relation = r.id \
             WHERE r.meta=?1 AND rr.meta_revision=?2 \
             ORDER BY r.host ASC, rr.host_revision ASC",
        )?;
        let mut rows = stmt.query(params![meta_ref.meta.as_str(), meta_ref.revision])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let host = HostId::try_new(row.get::<_, String>(0)?)
                .map_err(|_| StoreError::InvalidInput("stored host id is invalid"))?;
            out.push(HostRef {
                host,
                revision: row.get::<_, i64>(1)?,
            });
        }
        Ok(out)
    }
}

/// Create-or-append upsert for one (host, meta) pairing. Relation revisions
/// are append-or-delete only: once a pin exists for the host revision it is
/// the snapshot taken when that revision first saw the meta, and repeated
/// calls with identical input write nothing. The UNIQUE(host, meta)
/// constraint resolves identity races; a losing insert re-reads the
/// surviving row instead of duplicating the pairing.
pub(crate) fn sync_relation(
    conn: &Connection,
    bundle: &str,
    host: &HostId,
    host_revision: i64,
    meta_ref: &MetaRef,
    now: i64,
) -> Result<(), StoreError> {
    if !host_revision_exists(conn, host, host_revision)? {
        return Err(StoreError::RevisionIntegrity {
            detail: format!("host {host} revision {host_revision} does not exist"),
        });
    }
    if !meta_revision_exists(conn, meta_ref.meta.as_str(), meta_ref.revision)? {
        return Err(StoreError::RevisionIntegrity {
            detail: format!(
                "meta {} revision {} does not exist",
                meta_ref.meta, meta_ref.revision
            ),
        });
    }

    let relation_id = match relation_id_for(conn, host, &meta_ref.meta)? {
        Some(id) => id,
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            let insert = conn.execute(
                "INSERT INTO relations(id, bundle, host, meta, revision_seq, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![id, bundle, host.as_str(), meta_ref.meta.as_str(), now],
            );
            match insert {
                Ok(_) => id,
                Err(err) if is_constraint_violation(&err) => {
                    match relation_id_for(conn, host, &meta_ref.meta)? {
                        Some(id) => id,
                        None => return Err(err.into()),
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    };

    let pinned = conn
        .query_row(
            "SELECT revision FROM relation_revisions WHERE relation=?1 AND host_revision=?2",
            params![relation_id, host_revision],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    if pinned.is_some() {
        return Ok(());
    }

    // high-water mark: revision numbers freed by deletes are never reused
    let next = conn.query_row(
        "SELECT revision_seq + 1 FROM relations WHERE id=?1",
        params![relation_id],
        |row| row.get::<_, i64>(0),
    )?;
    conn.execute(
        "UPDATE relations SET revision_seq=?2 WHERE id=?1",
        params![relation_id, next],
    )?;
    conn.execute(
        "INSERT INTO relation_revisions(relation, revision, host_revision, meta_revision, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![relation_id, next, host_revision, meta_ref.revision, now],
    )?;
    Ok(())
}

/// Removes the relation revision pinned to the given host revision, the
/// in-place history edit a detach-without-new-revision performs. Returns
/// the meta revision the deleted pin referenced. Absent rows are a no-op.
pub(crate) fn delete_pinned_relation(
    conn: &Connection,
    host: &HostId,
    host_revision: i64,
    meta: &MetaId,
) -> Result<Option<i64>, StoreError> {
    let Some(relation_id) = relation_id_for(conn, host, meta)? else {
        return Ok(None);
    };

    let pinned = conn
        .query_row(
            "SELECT revision, meta_revision FROM relation_revisions \
             WHERE relation=?1 AND host_revision=?2",
            params![relation_id, host_revision],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    let Some((revision, meta_revision)) = pinned else {
        return Ok(None);
    };

    delete_relation_revision(conn, &relation_id, revision)?;
    Ok(Some(meta_revision))
}

/// Deletes one relation revision and drops the relation identity once its
/// history is empty.
pub(crate) fn delete_relation_revision(
    conn: &Connection,
    relation_id: &str,
    revision: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM relation_revisions WHERE relation=?1 AND revision=?2",
        params![relation_id, revision],
    )?;

    let remaining = conn.query_row(
        "SELECT COUNT(1) FROM relation_revisions WHERE relation=?1",
        params![relation_id],
        |row| row.get::<_, i64>(0),
    )?;
    if remaining == 0 {
        conn.execute("DELETE FROM relations WHERE id=?1", params![relation_id])?;
    }
    Ok(())
}

/// Deletes a meta revision iff zero relation revisions reference it. A meta
/// whose last revision goes loses its identity and default pointer too.
/// Idempotent: sweeping an absent revision reports false.
pub(crate) fn orphan_sweep(
    conn: &Connection,
    meta: &str,
    meta_revision: i64,
) -> Result<bool, StoreError> {
    let referenced = conn.query_row(
        "SELECT COUNT(1) FROM relation_revisions rr \
         JOIN relations r ON rr.relation = r.id \
         WHERE r.meta=?1 AND rr.meta_revision=?2",
        params![meta, meta_revision],
        |row| row.get::<_, i64>(0),
    )?;
    if referenced > 0 {
        return Ok(false);
    }

    let deleted = conn.execute(
        "DELETE FROM meta_revisions WHERE meta=?1 AND revision=?2",
        params![meta, meta_revision],
    )?;
    if deleted == 0 {
        return Ok(false);
    }

    conn.execute(
        "DELETE FROM meta_defaults WHERE meta=?1 AND revision=?2",
        params![meta, meta_revision],
    )?;

    let remaining = conn.query_row(
        "SELECT COUNT(1) FROM meta_revisions WHERE meta=?1",
        params![meta],
        |row| row.get::<_, i64>(0),
    )?;
    if remaining == 0 {
        conn.execute("DELETE FROM metas WHERE id=?1", params![meta])?;
    }
    Ok(true)
}

pub(crate) fn pinned_meta_refs(
    conn: &Connection,
    host: &HostId,
    host_revision: i64,
) -> Result<Vec<MetaRef>, StoreError> {
    let rows = pinned_relation_rows(conn, host, host_revision)?;
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let meta = MetaId::try_new(row.meta)
            .map_err(|_| StoreError::InvalidInput("stored meta id is invalid"))?;
        out.push(MetaRef {
            meta,
            revision: row.meta_revision,
        });
    }
    Ok(out)
}

pub(crate) fn pinned_relation_rows(
    conn: &Connection,
    host: &HostId,
    host_revision: i64,
) -> Result<Vec<PinnedRelationRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT rr.relation, rr.revision, r.meta, rr.meta_revision \
         FROM relation_revisions rr JOIN relations r ON rr.relation = r.id \
         WHERE r.host=?1 AND rr.host_revision=?2 \
         ORDER BY r.meta ASC",
    )?;
    let mut rows = stmt.query(params![host.as_str(), host_revision])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(PinnedRelationRow {
            relation: row.get::<_, String>(0)?,
            revision: row.get::<_, i64>(1)?,
            meta: row.get::<_, String>(2)?,
            meta_revision: row.get::<_, i64>(3)?,
        });
    }
    Ok(out)
}

fn relation_id_for(
    conn: &Connection,
    host: &HostId,
    meta: &MetaId,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT id FROM relations WHERE host=?1 AND meta=?2",
            params![host.as_str(), meta.as_str()],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}
