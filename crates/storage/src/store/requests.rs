#![forbid(unsafe_code)]

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateHostRequest {
    pub host_id: String,
    pub published: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveHostRequest {
    pub host_id: String,
    /// Revision the in-memory host was derived from. `None` means the
    /// current revision (an ordinary edit, not a revert).
    pub loaded_revision_id: Option<i64>,
    pub new_revision: bool,
    pub published: bool,
}

#[derive(Clone, Debug)]
pub struct HostRow {
    pub id: String,
    pub current_revision: i64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct HostRevisionRow {
    pub host: String,
    pub revision: i64,
    pub published: bool,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct RelationRow {
    pub id: String,
    pub bundle: String,
    pub host: String,
    pub meta: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct RelationRevisionRow {
    pub relation: String,
    pub revision: i64,
    pub host_revision: i64,
    pub meta_revision: i64,
    pub created_at_ms: i64,
}

/// What a host save produced: the revision relations were pinned to and the
/// working set as persisted (identities and revisions filled in).
#[derive(Debug)]
pub struct HostSaveOutcome {
    pub host: HostRow,
    pub revision: i64,
    pub metas: Vec<rl_core::MetaRecord>,
}
