#![forbid(unsafe_code)]

use crate::bundle::{BundleRegistry, BundleRegistryError};
use crate::change::should_attach;
use crate::entity::{HostRecord, MetaRecord};
use crate::ids::BundleId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached,
    /// The meta carried no tracked field value and was left alone.
    IgnoredEmpty,
}

/// Per-host working set of meta records. A store-produced set arrives primed
/// from the relation graph; a caller-constructed one starts unprimed and the
/// commit path repopulates it from the host's loaded revision.
#[derive(Debug, Default)]
pub struct AttachedMetas {
    entries: Vec<MetaRecord>,
    primed: bool,
    dirty: bool,
    skip_queue: Vec<MetaRecord>,
    delete_queue: Vec<MetaRecord>,
}

/// Everything a commit needs, by value. The collection is consumed so the
/// one-shot queues cannot leak into a second save.
#[derive(Debug)]
pub struct CommitParts {
    pub entries: Vec<MetaRecord>,
    pub skipped: Vec<MetaRecord>,
    pub deleted: Vec<MetaRecord>,
}

impl AttachedMetas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primed(entries: Vec<MetaRecord>) -> Self {
        Self {
            entries,
            primed: true,
            dirty: false,
            skip_queue: Vec::new(),
            delete_queue: Vec::new(),
        }
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetaRecord> {
        self.entries.iter()
    }

    pub fn attach(
        &mut self,
        meta: MetaRecord,
        registry: &BundleRegistry,
    ) -> Result<AttachOutcome, BundleRegistryError> {
        let accessor = registry.accessor(meta.bundle().as_str())?;
        if !should_attach(accessor, meta.fields()) {
            return Ok(AttachOutcome::IgnoredEmpty);
        }

        let slot = self.entries.iter().position(|entry| match meta.id() {
            Some(id) => entry.id() == Some(id),
            None => entry.id().is_none() && entry.bundle() == meta.bundle(),
        });
        match slot {
            Some(index) => self.entries[index] = meta,
            None => self.entries.push(meta),
        }
        self.dirty = true;
        Ok(AttachOutcome::Attached)
    }

    /// Removes the meta from the set. A persisted meta is queued so the
    /// commit either skips it (the host is about to revision, old history
    /// stays untouched) or deletes its relation revision pinned to the
    /// current host revision.
    pub fn detach(&mut self, meta: &MetaRecord, host: &HostRecord) {
        self.entries.retain(|entry| match meta.id() {
            Some(id) => entry.id() != Some(id),
            None => !(entry.id().is_none() && entry.bundle() == meta.bundle()),
        });

        if meta.id().is_some() {
            let mut queued = meta.clone();
            if host.is_new_revision {
                queued.mark_skip_relations();
                self.skip_queue.push(queued);
            } else {
                queued.mark_delete_relations();
                self.delete_queue.push(queued);
            }
        }
        self.dirty = true;
    }

    /// Existing entry for the bundle, or a fresh identity-less record. Never
    /// mutates the set; the caller decides whether to attach.
    pub fn get_or_create(&self, bundle: &BundleId) -> MetaRecord {
        self.entries
            .iter()
            .find(|entry| entry.bundle() == bundle)
            .cloned()
            .unwrap_or_else(|| MetaRecord::new(bundle.clone()))
    }

    pub fn into_commit_parts(self) -> CommitParts {
        CommitParts {
            entries: self.entries,
            skipped: self.skip_queue,
            deleted: self.delete_queue,
        }
    }
}
