#![forbid(unsafe_code)]

use super::collection::commit_attached_tx;
use super::relations::{delete_relation_revision, orphan_sweep, pinned_relation_rows};
use super::{
    CreateHostRequest, HostRevisionRow, HostRow, HostSaveOutcome, SaveHostRequest, SqliteStore,
    StoreError, canonicalize_host, is_constraint_violation, now_ms,
};
use rl_core::ids::HostId;
use rl_core::{AttachedMetas, HostRecord};
use rusqlite::{Connection, OptionalExtension, params};

impl SqliteStore {
    pub fn create_host(&mut self, request: CreateHostRequest) -> Result<HostRow, StoreError> {
        let host_id = canonicalize_host(&request.host_id)?;
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let insert = tx.execute(
            "INSERT INTO hosts(id, current_revision, created_at_ms, updated_at_ms) \
             VALUES (?1, 1, ?2, ?2)",
            params![host_id.as_str(), now],
        );
        if let Err(err) = insert {
            if is_constraint_violation(&err) {
                return Err(StoreError::HostAlreadyExists);
            }
            return Err(err.into());
        }

        tx.execute(
            "INSERT INTO host_revisions(host, revision, published, created_at_ms) \
             VALUES (?1, 1, ?2, ?3)",
            params![host_id.as_str(), request.published, now],
        )?;

        tx.commit()?;
        Ok(HostRow {
            id: host_id.as_str().to_string(),
            current_revision: 1,
            created_at_ms: now,
            updated_at_ms: now,
        })
    }

    /// Persists the host revision change and runs the attached-meta commit
    /// in the same transaction: meta saves, relation synchronization and
    /// orphan cleanup all land or none do.
    pub fn save_host(
        &mut self,
        request: SaveHostRequest,
        metas: AttachedMetas,
    ) -> Result<HostSaveOutcome, StoreError> {
        let host_id = canonicalize_host(&request.host_id)?;
        let now = now_ms();
        let tx = self.conn.transaction()?;

        let row = host_row(&tx, &host_id)?.ok_or(StoreError::UnknownHost)?;
        let current = row.current_revision;
        let loaded = request.loaded_revision_id.unwrap_or(current);
        if !host_revision_exists(&tx, &host_id, loaded)? {
            return Err(StoreError::UnknownRevision { revision: loaded });
        }

        let effective = if request.new_revision {
            let next = next_host_revision(&tx, &host_id)?;
            tx.execute(
                "INSERT INTO host_revisions(host, revision, published, created_at_ms) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![host_id.as_str(), next, request.published, now],
            )?;
            next
        } else {
            tx.execute(
                "UPDATE host_revisions SET published=?3 WHERE host=?1 AND revision=?2",
                params![host_id.as_str(), current, request.published],
            )?;
            current
        };

        tx.execute(
            "UPDATE hosts SET current_revision=?2, updated_at_ms=?3 WHERE id=?1",
            params![host_id.as_str(), effective, now],
        )?;

        let host = HostRecord {
            id: host_id.clone(),
            revision_id: current,
            loaded_revision_id: Some(loaded),
            is_new_revision: request.new_revision,
            published: request.published,
        };
        let saved = commit_attached_tx(
            &tx,
            &self.registry,
            &host,
            effective,
            metas.into_commit_parts(),
        )?;

        tx.commit()?;
        Ok(HostSaveOutcome {
            host: HostRow {
                id: host_id.as_str().to_string(),
                current_revision: effective,
                created_at_ms: row.created_at_ms,
                updated_at_ms: now,
            },
            revision: effective,
            metas: saved,
        })
    }

    pub fn load_host(&self, host_id: &str) -> Result<Option<HostRow>, StoreError> {
        let host_id = canonicalize_host(host_id)?;
        host_row(&self.conn, &host_id)
    }

    pub fn load_host_revision(
        &self,
        host_id: &str,
        revision: i64,
    ) -> Result<Option<HostRevisionRow>, StoreError> {
        let host_id = canonicalize_host(host_id)?;
        let row = self
            .conn
            .query_row(
                "SELECT published, created_at_ms FROM host_revisions WHERE host=?1 AND revision=?2",
                params![host_id.as_str(), revision],
                |row| Ok((row.get::<_, bool>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(published, created_at_ms)| HostRevisionRow {
            host: host_id.as_str().to_string(),
            revision,
            published,
            created_at_ms,
        }))
    }

    pub fn list_host_revisions(&self, host_id: &str) -> Result<Vec<i64>, StoreError> {
        let host_id = canonicalize_host(host_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT revision FROM host_revisions WHERE host=?1 ORDER BY revision ASC",
        )?;
        let mut rows = stmt.query(params![host_id.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, i64>(0)?);
        }
        Ok(out)
    }

    /// Full cascade: every meta reachable through this host's relations goes,
    /// all revisions included, then the relations, then the host itself.
    pub fn delete_host(&mut self, host_id: &str) -> Result<(), StoreError> {
        let host_id = canonicalize_host(host_id)?;
        let tx = self.conn.transaction()?;
        if host_row(&tx, &host_id)?.is_none() {
            return Err(StoreError::UnknownHost);
        }

        let meta_ids = {
            let mut stmt = tx.prepare("SELECT meta FROM relations WHERE host=?1")?;
            let mut rows = stmt.query(params![host_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row.get::<_, String>(0)?);
            }
            out
        };

        for meta in &meta_ids {
            tx.execute("DELETE FROM metas WHERE id=?1", params![meta])?;
        }
        tx.execute("DELETE FROM hosts WHERE id=?1", params![host_id.as_str()])?;

        tx.commit()?;
        Ok(())
    }

    /// Removes one historical host revision: relation revisions pinned to it
    /// go first, then any meta revisions those pins were the last reference
    /// to. The current revision is not deletable.
    pub fn delete_host_revision(
        &mut self,
        host_id: &str,
        revision: i64,
    ) -> Result<(), StoreError> {
        let host_id = canonicalize_host(host_id)?;
        let tx = self.conn.transaction()?;
        let row = host_row(&tx, &host_id)?.ok_or(StoreError::UnknownHost)?;
        if revision == row.current_revision {
            return Err(StoreError::InvalidInput(
                "cannot delete the current host revision",
            ));
        }
        if !host_revision_exists(&tx, &host_id, revision)? {
            return Err(StoreError::UnknownRevision { revision });
        }

        let pinned = pinned_relation_rows(&tx, &host_id, revision)?;
        for pin in pinned {
            delete_relation_revision(&tx, &pin.relation, pin.revision)?;
            orphan_sweep(&tx, &pin.meta, pin.meta_revision)?;
        }

        tx.execute(
            "DELETE FROM host_revisions WHERE host=?1 AND revision=?2",
            params![host_id.as_str(), revision],
        )?;

        tx.commit()?;
        Ok(())
    }
}

pub(crate) fn host_row(conn: &Connection, host: &HostId) -> Result<Option<HostRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT current_revision, created_at_ms, updated_at_ms FROM hosts WHERE id=?1",
            params![host.as_str()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(
        row.map(|(current_revision, created_at_ms, updated_at_ms)| HostRow {
            id: host.as_str().to_string(),
            current_revision,
            created_at_ms,
            updated_at_ms,
        }),
    )
}

pub(crate) fn host_revision_exists(
    conn: &Connection,
    host: &HostId,
    revision: i64,
) -> Result<bool, StoreError> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM host_revisions WHERE host=?1 AND revision=?2",
            params![host.as_str(), revision],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn next_host_revision(conn: &Connection, host: &HostId) -> Result<i64, StoreError> {
    let max = conn.query_row(
        "SELECT COALESCE(MAX(revision), 0) FROM host_revisions WHERE host=?1",
        params![host.as_str()],
        |row| row.get::<_, i64>(0),
    )?;
    Ok(max + 1)
}
