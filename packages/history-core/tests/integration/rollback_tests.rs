//! Rollback workflows: scenario D, idempotence, preconditions and skipped records.

use std::fs;

use history_core::persistence::PersistenceManager;
use history_core::{
    verify_chain, ChangeKind, EntityState, EntityType, HistoryConfig, HistoryError, HistoryLog,
    PropertyDef, RollbackOutcome, Value, ValueKind,
};
use ntest::timeout;
use tempfile::tempdir;

use super::helpers::{blog_database, seed_blog, seed_post, values, CONTENT};

#[timeout(1000)]
#[test]
fn test_rollback_restores_previous_value() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let blog = seed_blog(&mut session, "http://blog");

    session.set(blog, "Url", "http://first").unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    session.set(blog, "Url", "http://second").unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    assert_eq!(db.history_count().unwrap(), 2);

    let outcome = session.rollback(blog, None).unwrap();
    let RollbackOutcome::Restored { history_id, entity } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };
    assert_eq!(history_id, 2);
    assert_eq!(session.state(blog), EntityState::Detached);
    assert_eq!(session.state(entity), EntityState::Modified);

    // Entity update plus history retirement
    assert_eq!(session.save_changes().unwrap(), 2);
    assert_eq!(
        db.get_row("Blogs", "1").unwrap().unwrap().get("Url"),
        Some(&Value::from("http://first"))
    );
    assert_eq!(db.history_count().unwrap(), 1);
    assert_eq!(session.state(entity), EntityState::Unchanged);
}

#[timeout(1000)]
#[test]
fn test_rollback_of_deleted_row_recreates_it() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "Content", "Edited content.").unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    let modified_id = db.latest("Posts", "1").unwrap().unwrap().id;

    session.remove(post).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    assert_eq!(db.row_count("Posts").unwrap(), 0);

    let outcome = session.rollback_row("Post", "1", None).unwrap();
    assert!(matches!(outcome, RollbackOutcome::Restored { .. }));
    assert_eq!(session.save_changes().unwrap(), 2);

    let row = db.get_row("Posts", "1").unwrap().unwrap();
    assert_eq!(row.get("Content"), Some(&Value::from("Edited content.")));
    let chain = db.chain("Posts", "1").unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].id, modified_id);
    assert_eq!(chain[0].kind, ChangeKind::Modified);

    // Chain exhausted: a second rollback changes nothing
    assert_eq!(
        session.rollback_row("Post", "1", None).unwrap(),
        RollbackOutcome::NoChange
    );
    assert_eq!(session.save_changes().unwrap(), 0);
    assert_eq!(db.history_count().unwrap(), 1);
}

#[timeout(1000)]
#[test]
fn test_rollback_to_explicit_record_keeps_chain_linked() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    for views in 1..=3 {
        session.set(post, "NumViews", views).unwrap();
        session.ensure_history().unwrap();
        session.save_changes().unwrap();
    }

    let outcome = session.rollback(post, Some(2)).unwrap();
    assert!(matches!(outcome, RollbackOutcome::Restored { history_id: 2, .. }));
    session.save_changes().unwrap();

    assert_eq!(
        db.get_row("Posts", "1").unwrap().unwrap().get("NumViews"),
        Some(&Value::Int(1))
    );
    let chain = db.chain("Posts", "1").unwrap();
    assert_eq!(chain.iter().map(|r| r.id).collect::<Vec<_>>(), [1, 3]);
    assert!(verify_chain(&chain).is_empty());
}

#[timeout(1000)]
#[test]
fn test_rollback_of_added_entity_fails_fast() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = session
        .add("Post", values([("Title", Value::from("draft"))]))
        .unwrap();

    let err = session.rollback(post, None).unwrap_err();
    assert!(matches!(err, HistoryError::Precondition { .. }));
    assert_eq!(session.state(post), EntityState::Added);
    assert!(session.staged_history().staged().is_empty());
}

#[timeout(1000)]
#[test]
fn test_rollback_without_key_fails_fast() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();

    let err = session.rollback_row("Post", "", None).unwrap_err();
    assert!(matches!(err, HistoryError::Precondition { .. }));
    let err = session.rollback_row("Unknown", "1", None).unwrap_err();
    assert!(matches!(err, HistoryError::Precondition { .. }));
}

#[timeout(1000)]
#[test]
fn test_rollback_with_single_record_is_no_change() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "NumViews", 1).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();

    assert_eq!(session.rollback(post, None).unwrap(), RollbackOutcome::NoChange);
    assert_eq!(session.state(post), EntityState::Unchanged);
    assert_eq!(db.history_count().unwrap(), 1);
}

#[timeout(1000)]
#[test]
fn test_unknown_history_id_is_no_change() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);
    let other = seed_post(&mut session);

    session.set(other, "NumViews", 1).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();

    // Record 1 belongs to another row
    assert_eq!(session.rollback(post, Some(1)).unwrap(), RollbackOutcome::NoChange);
}

#[timeout(1000)]
#[test]
fn test_malformed_payload_is_skipped_after_reload() {
    let temp_dir = tempdir().unwrap();
    let config = HistoryConfig {
        data_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };
    let db = blog_database(config.clone());
    {
        let mut session = db.session();
        let post = seed_post(&mut session);
        for title in ["first", "second"] {
            session.set(post, "Title", title).unwrap();
            session.ensure_history().unwrap();
            session.save_changes().unwrap();
        }
    }
    let persistence = PersistenceManager::new(&config);
    persistence.save(&db).unwrap();

    // Truncate the latest payload and drop its checksum, as a damaged copy would
    let history_path = temp_dir.path().join("data").join("history.json");
    let mut history: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&history_path).unwrap()).unwrap();
    history["records"][1]["changed"] = serde_json::Value::from(r#"{"before":{"Title""#);
    fs::write(&history_path, history.to_string()).unwrap();

    let schema_path = temp_dir.path().join("schema.json");
    let mut schema: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&schema_path).unwrap()).unwrap();
    schema["checksums"]
        .as_object_mut()
        .unwrap()
        .remove("history");
    fs::write(&schema_path, schema.to_string()).unwrap();

    let reloaded = persistence.load(config).unwrap();
    let mut session = reloaded.session();
    let post = session.load("Post", "1").unwrap().unwrap();

    let outcome = session.rollback(post, None).unwrap();
    assert!(matches!(
        outcome,
        RollbackOutcome::Skipped {
            history_id: 2,
            error: HistoryError::MalformedPayload { .. }
        }
    ));
    assert_eq!(session.state(post), EntityState::Unchanged);
    assert_eq!(session.get(post, "Title").unwrap(), &Value::from("second"));
    assert_eq!(session.save_changes().unwrap(), 0);
    assert_eq!(reloaded.history_count().unwrap(), 2);
}

#[timeout(1000)]
#[test]
fn test_rollback_discarded_with_session() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    for content in ["one", "two"] {
        session.set(post, "Content", content).unwrap();
        session.ensure_history().unwrap();
        session.save_changes().unwrap();
    }

    session.rollback(post, None).unwrap();
    session.discard();
    assert_eq!(session.save_changes().unwrap(), 0);
    assert_eq!(db.history_count().unwrap(), 2);
    assert_eq!(
        db.get_row("Posts", "1").unwrap().unwrap().get("Content"),
        Some(&Value::from("two"))
    );
    assert_ne!(
        db.get_row("Posts", "1").unwrap().unwrap().get("Content"),
        Some(&Value::from(CONTENT))
    );
}

#[timeout(1000)]
#[test]
fn test_text_key_containing_comma_rolls_back() {
    let db = blog_database(HistoryConfig::default());
    db.register_entity(EntityType::new(
        "Tag",
        "Tags",
        vec![
            PropertyDef::key("Slug", ValueKind::Text),
            PropertyDef::new("Label", ValueKind::Text),
        ],
    ))
    .unwrap();
    let mut session = db.session();
    let tag = session
        .add(
            "Tag",
            values([("Slug", Value::from("a,b")), ("Label", Value::from("first"))]),
        )
        .unwrap();
    session.save_changes().unwrap();
    for label in ["second", "third"] {
        session.set(tag, "Label", label).unwrap();
        session.ensure_history().unwrap();
        session.save_changes().unwrap();
    }
    assert_eq!(db.chain("Tags", "a,b").unwrap().len(), 2);

    let outcome = session.rollback(tag, None).unwrap();
    assert!(matches!(outcome, RollbackOutcome::Restored { history_id: 2, .. }));
    session.save_changes().unwrap();
    assert_eq!(
        db.get_row("Tags", "a,b").unwrap().unwrap().get("Label"),
        Some(&Value::from("second"))
    );

    // Deleted row: the key comes from the captured snapshot
    let tag = session.load("Tag", "a,b").unwrap().unwrap();
    session.remove(tag).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    assert_eq!(db.row_count("Tags").unwrap(), 0);

    let outcome = session.rollback_row("Tag", "a,b", None).unwrap();
    assert!(matches!(outcome, RollbackOutcome::Restored { .. }));
    session.save_changes().unwrap();
    let row = db.get_row("Tags", "a,b").unwrap().unwrap();
    assert_eq!(row.get("Slug"), Some(&Value::from("a,b")));
    assert_eq!(row.get("Label"), Some(&Value::from("second")));
}
