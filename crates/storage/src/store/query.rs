#![forbid(unsafe_code)]

use super::defaults::default_revision;
use super::hosts::host_row;
use super::metas::load_meta_revision_on;
use super::relations::pinned_meta_refs;
use super::{SqliteStore, StoreError, canonicalize_host, canonicalize_meta};
use rl_core::ids::{BundleId, HostId, MetaId};
use rl_core::{HostRef, MetaRecord, MetaRef};
use rusqlite::params;
use serde_json::Value;
use std::collections::BTreeMap;

impl SqliteStore {
    /// Exact historical resolution: the meta records this host revision
    /// pinned, at the pinned revisions.
    pub fn related_metas(&self, host_ref: &HostRef) -> Result<Vec<MetaRecord>, StoreError> {
        let refs = pinned_meta_refs(&self.conn, &host_ref.host, host_ref.revision)?;
        let mut out = Vec::with_capacity(refs.len());
        for meta_ref in refs {
            let meta = load_meta_revision_on(&self.conn, &meta_ref.meta, meta_ref.revision)?
                .ok_or_else(|| missing_meta(&meta_ref))?;
            out.push(meta);
        }
        Ok(out)
    }

    /// Current resolution grouped by bundle: metas linked to the host's
    /// current revision, each loaded at its default revision when a pointer
    /// exists and at the pinned revision otherwise.
    pub fn related_metas_by_bundle(
        &self,
        host_id: &str,
    ) -> Result<BTreeMap<String, Vec<MetaRecord>>, StoreError> {
        let host = canonicalize_host(host_id)?;
        let row = host_row(&self.conn, &host)?.ok_or(StoreError::UnknownHost)?;
        let refs = pinned_meta_refs(&self.conn, &host, row.current_revision)?;

        let mut grouped: BTreeMap<String, Vec<MetaRecord>> = BTreeMap::new();
        for meta_ref in refs {
            let revision = default_revision(&self.conn, &meta_ref.meta)?
                .unwrap_or(meta_ref.revision);
            let meta = load_meta_revision_on(&self.conn, &meta_ref.meta, revision)?
                .ok_or_else(|| missing_meta(&meta_ref))?;
            grouped
                .entry(meta.bundle().as_str().to_string())
                .or_default()
                .push(meta);
        }
        Ok(grouped)
    }

    /// Metas of one bundle whose named field equals the given value,
    /// matched across all revisions or only against default-pointer
    /// revisions.
    pub fn find_metas_by_field_value(
        &self,
        bundle: &str,
        field: &str,
        value: &Value,
        all_revisions: bool,
    ) -> Result<Vec<MetaRecord>, StoreError> {
        let sql = if all_revisions {
            "SELECT mr.meta, mr.revision, mr.enabled, mr.fields_json \
             FROM meta_revisions mr JOIN metas m ON m.id = mr.meta \
             WHERE m.bundle=?1 \
             ORDER BY mr.meta ASC, mr.revision ASC"
        } else {
            "SELECT mr.meta, mr.revision, mr.enabled, mr.fields_json \
             FROM meta_revisions mr JOIN metas m ON m.id = mr.meta \
             JOIN meta_defaults d ON d.meta = mr.meta AND d.revision = mr.revision \
             WHERE m.bundle=?1 \
             ORDER BY mr.meta ASC"
        };

        let bundle_id = BundleId::try_new(bundle)
            .map_err(|_| StoreError::InvalidInput("invalid bundle id"))?;
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params![bundle_id.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let fields: BTreeMap<String, Value> =
                serde_json::from_str(&row.get::<_, String>(3)?)
                    .map_err(|_| StoreError::InvalidInput("stored fields are not valid json"))?;
            if fields.get(field) != Some(value) {
                continue;
            }
            let meta = MetaId::try_new(row.get::<_, String>(0)?)
                .map_err(|_| StoreError::InvalidInput("stored meta id is invalid"))?;
            out.push(MetaRecord::persisted(
                meta,
                row.get::<_, i64>(1)?,
                bundle_id.clone(),
                row.get::<_, bool>(2)?,
                fields,
            ));
        }
        Ok(out)
    }

    /// Hosts whose current revision pins any revision of this meta.
    pub fn related_hosts(&self, meta_id: &str) -> Result<Vec<HostRef>, StoreError> {
        let meta = canonicalize_meta(meta_id)?;
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT r.host, rr.host_revision \
             FROM relation_revisions rr \
             JOIN relations r ON rr.relation = r.id \
             JOIN hosts h ON h.id = r.host AND h.current_revision = rr.host_revision \
             WHERE r.meta=?1 \
             ORDER BY r.host ASC",
        )?;
        let mut rows = stmt.query(params![meta.as_str()])?;
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

fn missing_meta(meta_ref: &MetaRef) -> StoreError {
    StoreError::RevisionIntegrity {
        detail: format!(
            "relation references missing meta {} revision {}",
            meta_ref.meta, meta_ref.revision
        ),
    }
}
