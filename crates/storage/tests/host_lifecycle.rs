use rl_core::ids::BundleId;
use rl_core::{AttachedMetas, BundleRegistry, MetaRecord, StaticBundle};
use rl_storage::{CreateHostRequest, SaveHostRequest, SqliteStore, StoreError};
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

static VISUAL: StaticBundle = StaticBundle {
    bundle: "visual",
    fields: &["color"],
    relation_bundle: "node_meta",
};

static SPEED: StaticBundle = StaticBundle {
    bundle: "speed",
    fields: &["gear"],
    relation_bundle: "node_meta",
};

fn temp_storage_dir(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be monotonic enough for tests")
        .as_nanos();
    path.push(format!(
        "revlink-host-{label}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&path).expect("temp storage dir must be creatable");
    path
}

fn registry() -> BundleRegistry {
    BundleRegistry::try_new(&[&VISUAL, &SPEED]).expect("registry should build")
}

fn meta_with(tag: &str, field: &str, value: serde_json::Value) -> MetaRecord {
    let bundle = BundleId::try_new(tag).expect("bundle id should validate");
    let mut meta = MetaRecord::new(bundle);
    meta.set_field(field, value);
    meta
}

fn save(
    store: &mut SqliteStore,
    host_id: &str,
    new_revision: bool,
    published: bool,
    set: AttachedMetas,
) -> rl_storage::HostSaveOutcome {
    store
        .save_host(
            SaveHostRequest {
                host_id: host_id.to_string(),
                loaded_revision_id: None,
                new_revision,
                published,
            },
            set,
        )
        .expect("host save should succeed")
}

#[test]
fn storage_open_is_fail_closed_on_legacy_schema() {
    let dir = temp_storage_dir("legacy-reset-required");
    let db_path = dir.join("revlink.db");

    let conn = Connection::open(db_path).expect("legacy db must open");
    conn.execute("CREATE TABLE legacy_pairs(id TEXT PRIMARY KEY)", [])
        .expect("legacy table should be created");
    drop(conn);

    let err = SqliteStore::open(&dir, registry()).expect_err("legacy storage must be rejected");
    assert_eq!(err.code(), "RESET_REQUIRED");
    assert!(matches!(
        err,
        StoreError::InvalidInput(message) if message.starts_with("RESET_REQUIRED")
    ));
}

#[test]
fn storage_reopens_over_existing_data() {
    let dir = temp_storage_dir("reopen");
    {
        let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");
        store
            .create_host(CreateHostRequest {
                host_id: "node-1".to_string(),
                published: true,
            })
            .expect("host should be created");
    }

    let store = SqliteStore::open(&dir, registry()).expect("existing storage should reopen");
    let host = store
        .load_host("node-1")
        .expect("host load should work")
        .expect("host must survive the reopen");
    assert_eq!(host.current_revision, 1);
}

#[test]
fn unknown_host_is_reported_everywhere() {
    let dir = temp_storage_dir("unknown-host");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    let err = store
        .save_host(
            SaveHostRequest {
                host_id: "missing".to_string(),
                loaded_revision_id: None,
                new_revision: false,
                published: false,
            },
            AttachedMetas::new(),
        )
        .expect_err("saving a missing host must fail");
    assert_eq!(err.code(), "UNKNOWN_HOST");

    assert_eq!(
        store
            .attached_metas("missing")
            .expect_err("priming a missing host must fail")
            .code(),
        "UNKNOWN_HOST"
    );
    assert_eq!(
        store
            .delete_host("missing")
            .expect_err("deleting a missing host must fail")
            .code(),
        "UNKNOWN_HOST"
    );
}

#[test]
fn save_rejects_an_unknown_loaded_revision() {
    let dir = temp_storage_dir("unknown-loaded");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    store
        .create_host(CreateHostRequest {
            host_id: "node-1".to_string(),
            published: false,
        })
        .expect("host should be created");

    let err = store
        .save_host(
            SaveHostRequest {
                host_id: "node-1".to_string(),
                loaded_revision_id: Some(9),
                new_revision: true,
                published: false,
            },
            AttachedMetas::new(),
        )
        .expect_err("a save derived from a missing revision must fail");
    assert_eq!(err.code(), "UNKNOWN_REVISION");
}

#[test]
fn host_delete_cascades_to_metas_and_relations() {
    let dir = temp_storage_dir("host-delete");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    store
        .create_host(CreateHostRequest {
            host_id: "node-1".to_string(),
            published: true,
        })
        .expect("host should be created");

    let mut set = AttachedMetas::new();
    set.attach(meta_with("visual", "color", json!("red")), store.registry())
        .expect("attach should resolve the bundle");
    set.attach(meta_with("speed", "gear", json!("3")), store.registry())
        .expect("attach should resolve the bundle");
    let out = save(&mut store, "node-1", false, true, set);
    assert_eq!(out.metas.len(), 2);
    let meta_ids: Vec<String> = out
        .metas
        .iter()
        .map(|meta| {
            meta.id()
                .expect("identity must be assigned")
                .as_str()
                .to_string()
        })
        .collect();

    // add revision depth before the cascade
    save(&mut store, "node-1", true, true, AttachedMetas::new());

    store.delete_host("node-1").expect("host delete should work");

    assert!(
        store
            .load_host("node-1")
            .expect("host load should work")
            .is_none()
    );
    assert!(
        store
            .list_host_revisions("node-1")
            .expect("host revisions should list")
            .is_empty()
    );
    for meta_id in &meta_ids {
        assert!(
            store
                .list_meta_revisions(meta_id)
                .expect("meta revisions should list")
                .is_empty()
        );
        assert!(
            store
                .relation_for("node-1", meta_id)
                .expect("relation lookup should work")
                .is_none()
        );
    }
}

#[test]
fn host_revision_delete_sweeps_orphaned_meta_revisions() {
    let dir = temp_storage_dir("revision-delete");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    store
        .create_host(CreateHostRequest {
            host_id: "node-1".to_string(),
            published: true,
        })
        .expect("host should be created");

    let mut set = AttachedMetas::new();
    set.attach(meta_with("visual", "color", json!("red")), store.registry())
        .expect("attach should resolve the bundle");
    let out = save(&mut store, "node-1", false, true, set);
    let meta_id = out.metas[0]
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();

    // revision 2 pins a second meta revision
    let mut set = store
        .attached_metas("node-1")
        .expect("working set should prime");
    let mut updated = set.get_or_create(&BundleId::try_new("visual").expect("bundle id"));
    updated.set_field("color", json!("blue"));
    set.attach(updated, store.registry())
        .expect("attach should resolve the bundle");
    save(&mut store, "node-1", true, true, set);

    assert_eq!(
        store
            .list_meta_revisions(&meta_id)
            .expect("meta revisions should list"),
        vec![1, 2]
    );

    // current revision is protected
    let err = store
        .delete_host_revision("node-1", 2)
        .expect_err("the current revision must not be deletable");
    assert_eq!(err.code(), "INVALID_INPUT");

    let err = store
        .delete_host_revision("node-1", 9)
        .expect_err("a missing revision must be reported");
    assert_eq!(err.code(), "UNKNOWN_REVISION");

    store
        .delete_host_revision("node-1", 1)
        .expect("historical revision delete should work");

    assert_eq!(
        store
            .list_host_revisions("node-1")
            .expect("host revisions should list"),
        vec![2]
    );
    // meta revision 1 lost its only pin and went with it
    assert_eq!(
        store
            .list_meta_revisions(&meta_id)
            .expect("meta revisions should list"),
        vec![2]
    );
}
