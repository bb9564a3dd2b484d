#![forbid(unsafe_code)]

use super::metas::meta_revision_exists;
use super::{SqliteStore, StoreError, canonicalize_meta};
use rl_core::ids::MetaId;
use rusqlite::{Connection, OptionalExtension, params};

impl SqliteStore {
    pub fn default_meta_revision(&self, meta_id: &str) -> Result<Option<i64>, StoreError> {
        let id = canonicalize_meta(meta_id)?;
        default_revision(&self.conn, &id)
    }

    /// Points the default pointer at one revision. The primary key on the
    /// pointer table keeps at most one default per meta; re-pointing unsets
    /// the previous one.
    pub fn set_default_meta_revision(
        &mut self,
        meta_id: &str,
        revision: i64,
    ) -> Result<(), StoreError> {
        let id = canonicalize_meta(meta_id)?;
        let tx = self.conn.transaction()?;
        if !meta_revision_exists(&tx, id.as_str(), revision)? {
            return Err(StoreError::UnknownRevision { revision });
        }
        set_default_revision(&tx, &id, revision)?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_default_meta_revision(&mut self, meta_id: &str) -> Result<(), StoreError> {
        let id = canonicalize_meta(meta_id)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM meta_defaults WHERE meta=?1",
            params![id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn default_revision(
    conn: &Connection,
    id: &MetaId,
) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT revision FROM meta_defaults WHERE meta=?1",
            params![id.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?)
}

pub(crate) fn set_default_revision(
    conn: &Connection,
    id: &MetaId,
    revision: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO meta_defaults(meta, revision) VALUES (?1, ?2) \
         ON CONFLICT(meta) DO UPDATE SET revision=excluded.revision",
        params![id.as_str(), revision],
    )?;
    Ok(())
}

/// Unsets the pointer only when it names the given revision.
pub(crate) fn clear_default_if_points_at(
    conn: &Connection,
    id: &MetaId,
    revision: i64,
) -> Result<(), StoreError> {
    conn.execute(
        "DELETE FROM meta_defaults WHERE meta=?1 AND revision=?2",
        params![id.as_str(), revision],
    )?;
    Ok(())
}
