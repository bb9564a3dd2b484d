use rl_core::ids::BundleId;
use rl_core::{AttachedMetas, BundleRegistry, MetaRecord, StaticBundle};
use rl_storage::{CreateHostRequest, SaveHostRequest, SqliteStore};
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
        "revlink-meta-{label}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&path).expect("temp storage dir must be creatable");
    path
}

fn registry() -> BundleRegistry {
    BundleRegistry::try_new(&[&VISUAL, &SPEED]).expect("registry should build")
}

fn visual_meta(color: &str) -> MetaRecord {
    let bundle = BundleId::try_new("visual").expect("bundle id should validate");
    let mut meta = MetaRecord::new(bundle);
    meta.set_field("color", json!(color));
    meta
}

#[test]
fn unchanged_save_never_increments_the_meta_revision() {
    let dir = temp_storage_dir("noop-stability");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    store
        .create_host(CreateHostRequest {
            host_id: "node-1".to_string(),
            published: false,
        })
        .expect("host should be created");

    let mut set = AttachedMetas::new();
    set.attach(visual_meta("red"), store.registry())
        .expect("attach should resolve the bundle");
    let out = store
        .save_host(
            SaveHostRequest {
                host_id: "node-1".to_string(),
                loaded_revision_id: None,
                new_revision: false,
                published: false,
            },
            set,
        )
        .expect("first save should persist the meta");
    let meta_id = out.metas[0]
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();
    assert_eq!(
        store
            .list_meta_revisions(&meta_id)
            .expect("meta revisions should list"),
        vec![1]
    );

    let set = store
        .attached_metas("node-1")
        .expect("working set should prime");
    store
        .save_host(
            SaveHostRequest {
                host_id: "node-1".to_string(),
                loaded_revision_id: None,
                new_revision: false,
                published: false,
            },
            set,
        )
        .expect("second save should be a no-op");

    assert_eq!(
        store
            .list_meta_revisions(&meta_id)
            .expect("meta revisions should list"),
        vec![1]
    );

    let relation = store
        .relation_for("node-1", &meta_id)
        .expect("relation lookup should work")
        .expect("relation must exist");
    assert_eq!(
        store
            .relation_revisions_for(&relation.id)
            .expect("relation revisions should list"),
        vec![1]
    );
}

#[test]
fn status_flip_forces_a_meta_revision_with_no_field_changes() {
    let dir = temp_storage_dir("status-propagation");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    store
        .create_host(CreateHostRequest {
            host_id: "node-1".to_string(),
            published: false,
        })
        .expect("host should be created");

    let mut set = AttachedMetas::new();
    set.attach(visual_meta("red"), store.registry())
        .expect("attach should resolve the bundle");
    let out = store
        .save_host(
            SaveHostRequest {
                host_id: "node-1".to_string(),
                loaded_revision_id: None,
                new_revision: false,
                published: false,
            },
            set,
        )
        .expect("first save should persist the meta");
    let meta_id = out.metas[0]
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();
    assert!(!out.metas[0].enabled());

    // publish with an untouched working set
    store
        .save_host(
            SaveHostRequest {
                host_id: "node-1".to_string(),
                loaded_revision_id: None,
                new_revision: false,
                published: true,
            },
            AttachedMetas::new(),
        )
        .expect("publishing save should succeed");

    assert_eq!(
        store
            .list_meta_revisions(&meta_id)
            .expect("meta revisions should list"),
        vec![1, 2]
    );
    let latest = store
        .load_meta_revision(&meta_id, 2)
        .expect("revision load should work")
        .expect("revision 2 must exist");
    assert!(latest.enabled());
    assert_eq!(latest.field("color"), Some(&json!("red")));
}

#[test]
fn default_pointer_is_unique_and_gates_current_reads() {
    let dir = temp_storage_dir("default-pointer");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    let saved = store
        .save_meta(visual_meta("red"))
        .expect("standalone meta save should work");
    let meta_id = saved
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();

    // no pointer yet: current reads miss, revision loads still hit
    assert!(
        store
            .load_meta_current(&meta_id)
            .expect("current load should work")
            .is_none()
    );
    assert!(
        store
            .load_meta_revision(&meta_id, 1)
            .expect("revision load should work")
            .is_some()
    );

    let mut updated = saved;
    updated.set_field("color", json!("blue"));
    store
        .save_meta(updated)
        .expect("changed meta save should create revision 2");

    store
        .set_default_meta_revision(&meta_id, 1)
        .expect("default pointer should set");
    store
        .set_default_meta_revision(&meta_id, 2)
        .expect("default pointer should re-point");
    assert_eq!(
        store
            .default_meta_revision(&meta_id)
            .expect("pointer read should work"),
        Some(2)
    );

    let current = store
        .load_meta_current(&meta_id)
        .expect("current load should work")
        .expect("pointer must resolve");
    assert_eq!(current.field("color"), Some(&json!("blue")));

    store
        .clear_default_meta_revision(&meta_id)
        .expect("pointer clear should work");
    assert!(
        store
            .load_meta_current(&meta_id)
            .expect("current load should work")
            .is_none()
    );
}

#[test]
fn save_time_default_intents_target_the_written_revision() {
    let dir = temp_storage_dir("default-intents");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    let mut meta = visual_meta("red");
    meta.set_default_revision(true);
    let saved = store
        .save_meta(meta)
        .expect("meta save with default intent should work");
    let meta_id = saved
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();
    assert_eq!(
        store
            .default_meta_revision(&meta_id)
            .expect("pointer read should work"),
        Some(1)
    );

    // unset intent only clears a pointer naming the revision being written
    let mut updated = saved;
    updated.set_field("color", json!("green"));
    updated.set_default_revision(false);
    store
        .save_meta(updated)
        .expect("meta save should create revision 2");
    assert_eq!(
        store
            .default_meta_revision(&meta_id)
            .expect("pointer read should work"),
        Some(1)
    );
}

#[test]
fn unregistered_bundle_is_a_configuration_error() {
    let dir = temp_storage_dir("configuration-missing");
    let only_visual =
        BundleRegistry::try_new(&[&VISUAL]).expect("registry should build");
    let mut store = SqliteStore::open(&dir, only_visual).expect("fresh storage should open");

    store
        .create_host(CreateHostRequest {
            host_id: "node-1".to_string(),
            published: false,
        })
        .expect("host should be created");

    // attach refuses the unknown bundle up front
    let mut set = AttachedMetas::new();
    let speed = BundleId::try_new("speed").expect("bundle id should validate");
    let mut meta = MetaRecord::new(speed);
    meta.set_field("gear", json!("1"));
    assert!(set.attach(meta.clone(), store.registry()).is_err());

    // a set smuggled past the registry fails the commit instead
    let err = store
        .save_host(
            SaveHostRequest {
                host_id: "node-1".to_string(),
                loaded_revision_id: None,
                new_revision: false,
                published: false,
            },
            AttachedMetas::primed(vec![meta]),
        )
        .expect_err("commit must reject the unregistered bundle");
    assert_eq!(err.code(), "CONFIGURATION_MISSING");
}

#[test]
fn field_value_queries_span_all_or_only_default_revisions() {
    let dir = temp_storage_dir("field-query");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    let saved = store
        .save_meta(visual_meta("red"))
        .expect("standalone meta save should work");
    let meta_id = saved
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();
    let mut updated = saved;
    updated.set_field("color", json!("blue"));
    store
        .save_meta(updated)
        .expect("changed meta save should create revision 2");
    store
        .set_default_meta_revision(&meta_id, 2)
        .expect("default pointer should set");

    let across = store
        .find_metas_by_field_value("visual", "color", &json!("red"), true)
        .expect("all-revision query should work");
    assert_eq!(across.len(), 1);
    assert_eq!(across[0].revision_id(), Some(1));

    // revision 1 is not the default, so the default-scoped query misses it
    let defaults_only = store
        .find_metas_by_field_value("visual", "color", &json!("red"), false)
        .expect("default-revision query should work");
    assert!(defaults_only.is_empty());

    let defaults_only = store
        .find_metas_by_field_value("visual", "color", &json!("blue"), false)
        .expect("default-revision query should work");
    assert_eq!(defaults_only.len(), 1);
    assert_eq!(defaults_only[0].revision_id(), Some(2));
}

#[test]
fn orphan_delete_is_idempotent() {
    let dir = temp_storage_dir("orphan-idempotent");
    let mut store = SqliteStore::open(&dir, registry()).expect("fresh storage should open");

    let saved = store
        .save_meta(visual_meta("red"))
        .expect("standalone meta save should work");
    let meta_id = saved
        .id()
        .expect("identity must be assigned")
        .as_str()
        .to_string();

    assert!(
        store
            .delete_orphan_meta_revision(&meta_id, 1)
            .expect("orphan delete should work")
    );
    assert!(
        !store
            .delete_orphan_meta_revision(&meta_id, 1)
            .expect("second orphan delete must be a no-op")
    );
    assert!(
        store
            .load_meta_revision(&meta_id, 1)
            .expect("revision load should work")
            .is_none()
    );
}
