#![forbid(unsafe_code)]

use super::hosts::host_row;
use super::metas::{load_latest_meta, load_meta_revision_on, save_meta_tx};
use super::relations::{delete_pinned_relation, orphan_sweep, pinned_meta_refs, sync_relation};
use super::{SqliteStore, StoreError, canonicalize_host, now_ms};
use rl_core::{AttachedMetas, BundleRegistry, CommitParts, HostRecord, MetaRecord, MetaRef};
use rusqlite::Transaction;
use std::collections::BTreeSet;

impl SqliteStore {
    /// The per-host working set: meta identities resolved through the
    /// current revision's pins, each loaded at its latest revision (the set
    /// is for editing the present; historical reads go through
    /// `related_metas`). This is the load the lazy collection defers until
    /// first use.
    pub fn attached_metas(&self, host_id: &str) -> Result<AttachedMetas, StoreError> {
        let host = canonicalize_host(host_id)?;
        let row = host_row(&self.conn, &host)?.ok_or(StoreError::UnknownHost)?;
        let refs = pinned_meta_refs(&self.conn, &host, row.current_revision)?;

        let mut entries = Vec::with_capacity(refs.len());
        for meta_ref in refs {
            let meta = load_latest_meta(&self.conn, &meta_ref.meta)?
                .ok_or_else(|| missing_meta(&meta_ref))?;
            entries.push(meta);
        }
        Ok(AttachedMetas::primed(entries))
    }
}

/// Realizes the final relation graph for one host save. Runs inside the
/// host-save transaction; a failure anywhere rolls back the host revision
/// together with every meta and relation write.
pub(crate) fn commit_attached_tx(
    tx: &Transaction<'_>,
    registry: &BundleRegistry,
    host: &HostRecord,
    effective_revision: i64,
    parts: CommitParts,
) -> Result<Vec<MetaRecord>, StoreError> {
    let now = now_ms();
    let reverting = host.is_reverting();

    let mut detached: BTreeSet<String> = BTreeSet::new();
    for meta in parts.skipped.iter().chain(parts.deleted.iter()) {
        if let Some(id) = meta.id() {
            detached.insert(id.as_str().to_string());
        }
    }

    // An empty set on a host with history means the edit did not touch the
    // metas: repopulate from the loaded revision. On a revert the pinned
    // revisions themselves are restored; otherwise only the identities come
    // from the pins and the content is the latest revision, so an untouched
    // meta stays revision-stable.
    let mut entries = parts.entries;
    if entries.is_empty() {
        if let Some(loaded) = host.loaded_revision_id {
            for meta_ref in pinned_meta_refs(tx, &host.id, loaded)? {
                if detached.contains(meta_ref.meta.as_str()) {
                    continue;
                }
                let meta = if reverting {
                    let mut meta = load_meta_revision_on(tx, &meta_ref.meta, meta_ref.revision)?
                        .ok_or_else(|| missing_meta(&meta_ref))?;
                    meta.mark_reverted();
                    meta
                } else {
                    load_latest_meta(tx, &meta_ref.meta)?
                        .ok_or_else(|| missing_meta(&meta_ref))?
                };
                entries.push(meta);
            }
        }
    }

    // Detach-deletes edit the current revision's history in place.
    for meta in &parts.deleted {
        let Some(id) = meta.id() else { continue };
        if let Some(meta_revision) =
            delete_pinned_relation(tx, &host.id, effective_revision, id)?
        {
            orphan_sweep(tx, id.as_str(), meta_revision)?;
        }
    }

    let mut saved = Vec::with_capacity(entries.len());
    for mut meta in entries {
        let accessor = registry.accessor(meta.bundle().as_str())?;

        // Meta status mirrors the host; the save turns a status flip into a
        // forced revision. A reverted meta keeps its pinned status.
        if !meta.reverted() {
            meta.set_enabled(host.published);
        }
        save_meta_tx(tx, registry, &mut meta)?;

        if meta.delete_relations() {
            if let Some(id) = meta.id() {
                if let Some(meta_revision) =
                    delete_pinned_relation(tx, &host.id, effective_revision, id)?
                {
                    orphan_sweep(tx, id.as_str(), meta_revision)?;
                }
            }
        } else if !meta.skip_relations() {
            let meta_ref = meta.meta_ref().ok_or_else(|| StoreError::RevisionIntegrity {
                detail: "meta save produced no revision to pin".to_string(),
            })?;
            sync_relation(
                tx,
                accessor.relation_bundle(),
                &host.id,
                effective_revision,
                &meta_ref,
                now,
            )?;
        }

        meta.clear_transients();
        saved.push(meta);
    }

    Ok(saved)
}

fn missing_meta(meta_ref: &MetaRef) -> StoreError {
    StoreError::RevisionIntegrity {
        detail: format!(
            "relation references missing meta {} revision {}",
            meta_ref.meta, meta_ref.revision
        ),
    }
}
