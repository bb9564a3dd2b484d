#![forbid(unsafe_code)]

use crate::ids::{BundleId, HostId, MetaId};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostRef {
    pub host: HostId,
    pub revision: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetaRef {
    pub meta: MetaId,
    pub revision: i64,
}

/// Save-time snapshot of the host entity. `revision_id` is the revision the
/// store currently considers current; `loaded_revision_id` is the revision
/// this in-memory instance was derived from.
#[derive(Clone, Debug)]
pub struct HostRecord {
    pub id: HostId,
    pub revision_id: i64,
    pub loaded_revision_id: Option<i64>,
    pub is_new_revision: bool,
    pub published: bool,
}

impl HostRecord {
    /// A host derived from a non-current revision is reverting: its meta
    /// state must be restored from the loaded revision, not re-derived.
    pub fn is_reverting(&self) -> bool {
        self.loaded_revision_id
            .is_some_and(|loaded| loaded != self.revision_id)
    }
}

/// One meta record in memory. Identity and revision are absent until the
/// first save. The relation flags are save-time intents, consumed once.
#[derive(Clone, Debug)]
pub struct MetaRecord {
    id: Option<MetaId>,
    revision_id: Option<i64>,
    bundle: BundleId,
    enabled: bool,
    fields: BTreeMap<String, Value>,
    skip_relations: bool,
    delete_relations: bool,
    force_new_revision: bool,
    reverted: bool,
    default_intent: Option<bool>,
}

impl MetaRecord {
    pub fn new(bundle: BundleId) -> Self {
        Self {
            id: None,
            revision_id: None,
            bundle,
            enabled: false,
            fields: BTreeMap::new(),
            skip_relations: false,
            delete_relations: false,
            force_new_revision: false,
            reverted: false,
            default_intent: None,
        }
    }

    pub fn persisted(
        id: MetaId,
        revision_id: i64,
        bundle: BundleId,
        enabled: bool,
        fields: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id: Some(id),
            revision_id: Some(revision_id),
            bundle,
            enabled,
            fields,
            skip_relations: false,
            delete_relations: false,
            force_new_revision: false,
            reverted: false,
            default_intent: None,
        }
    }

    pub fn id(&self) -> Option<&MetaId> {
        self.id.as_ref()
    }

    pub fn revision_id(&self) -> Option<i64> {
        self.revision_id
    }

    pub fn bundle(&self) -> &BundleId {
        &self.bundle
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    pub fn clear_field(&mut self, name: &str) {
        self.fields.remove(name);
    }

    pub fn assign_identity(&mut self, id: MetaId) {
        self.id = Some(id);
    }

    pub fn set_revision_id(&mut self, revision_id: i64) {
        self.revision_id = Some(revision_id);
    }

    pub fn mark_skip_relations(&mut self) {
        self.skip_relations = true;
    }

    pub fn skip_relations(&self) -> bool {
        self.skip_relations
    }

    pub fn mark_delete_relations(&mut self) {
        self.delete_relations = true;
    }

    pub fn delete_relations(&self) -> bool {
        self.delete_relations
    }

    pub fn mark_force_new_revision(&mut self) {
        self.force_new_revision = true;
    }

    pub fn force_new_revision(&self) -> bool {
        self.force_new_revision
    }

    pub fn mark_reverted(&mut self) {
        self.reverted = true;
    }

    pub fn reverted(&self) -> bool {
        self.reverted
    }

    pub fn set_default_revision(&mut self, default: bool) {
        self.default_intent = Some(default);
    }

    pub fn default_revision_intent(&self) -> Option<bool> {
        self.default_intent
    }

    /// Save-time intents never survive a save.
    pub fn clear_transients(&mut self) {
        self.skip_relations = false;
        self.delete_relations = false;
        self.force_new_revision = false;
        self.reverted = false;
        self.default_intent = None;
    }

    pub fn meta_ref(&self) -> Option<MetaRef> {
        match (&self.id, self.revision_id) {
            (Some(meta), Some(revision)) => Some(MetaRef {
                meta: meta.clone(),
                revision,
            }),
            _ => None,
        }
    }
}
