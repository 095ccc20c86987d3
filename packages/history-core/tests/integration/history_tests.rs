//! History capture through sessions: scenarios A to C, exclusion, chains and limits.

use history_core::{
    verify_chain, Actor, ChangeKind, EntityState, HistoryConfig, HistoryError, HistoryLog, Value,
    ADDED_ROW_ID,
};
use ntest::timeout;

use super::helpers::{blog_database, seed_blog, seed_post, values, CONTENT, TITLE};

#[timeout(1000)]
#[test]
fn test_added_entity_produces_no_history_by_default() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    session
        .add(
            "Post",
            values([
                ("Title", Value::from(TITLE)),
                ("Content", Value::from(CONTENT)),
            ]),
        )
        .unwrap();

    assert_eq!(session.ensure_history().unwrap(), 0);
    assert_eq!(session.save_changes().unwrap(), 1);
    assert_eq!(db.history_count().unwrap(), 0);
}

#[timeout(1000)]
#[test]
fn test_added_entity_with_capture_enabled() {
    let db = blog_database(HistoryConfig {
        capture_added: true,
        ..Default::default()
    });
    let mut session = db.session();
    let blog = seed_blog(&mut session, "http://blog");
    let blog_id = session.get(blog, "BlogId").unwrap().clone();

    session
        .add(
            "Post",
            values([
                ("Title", Value::from(TITLE)),
                ("Content", Value::from(CONTENT)),
                ("BlogId", blog_id),
            ]),
        )
        .unwrap();
    assert_eq!(session.ensure_history().unwrap(), 1);
    assert_eq!(session.save_changes().unwrap(), 2);

    let records = db.history_records().unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.kind, ChangeKind::Added);
    // Sentinel row id replaced by the key assigned on insert
    assert_ne!(record.row_id, ADDED_ROW_ID);
    assert_eq!(record.row_id, "1");
    assert_eq!(record.parent_id, None);
    assert_eq!(
        record.changed,
        r#"{"before":null,"after":{"Title":"xUnit","Content":"Post from xUnit test.","NumViews":null}}"#
    );
}

#[timeout(1000)]
#[test]
fn test_modified_records_only_changed_properties() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "Content", "Edited content.").unwrap();
    assert_eq!(session.ensure_history().unwrap(), 1);
    assert_eq!(session.save_changes().unwrap(), 2);

    let record = db.latest("Posts", "1").unwrap().unwrap();
    assert_eq!(record.kind, ChangeKind::Modified);
    assert_eq!(record.row_id, "1");
    assert_eq!(record.table_name, "Posts");
    assert_eq!(record.entity_name, "Post");

    let before = record.before().unwrap().unwrap();
    let after = record.after().unwrap().unwrap();
    assert_eq!(before.keys().collect::<Vec<_>>(), ["Content"]);
    assert_eq!(before.get("Content"), Some(&Value::from(CONTENT)));
    assert_eq!(after.get("Content"), Some(&Value::from("Edited content.")));
    assert!(!before.contains_key("Title"));
    assert!(!after.contains_key("Title"));
}

#[timeout(1000)]
#[test]
fn test_deleted_record_links_to_modified_record() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "Content", "Edited content.").unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    let modified = db.latest("Posts", "1").unwrap().unwrap();

    session.remove(post).unwrap();
    session.ensure_history().unwrap();
    assert_eq!(session.save_changes().unwrap(), 2);
    assert_eq!(session.state(post), EntityState::Detached);
    assert_eq!(db.row_count("Posts").unwrap(), 0);

    let deleted = db.latest("Posts", "1").unwrap().unwrap();
    assert_eq!(deleted.kind, ChangeKind::Deleted);
    assert_eq!(deleted.parent_id, Some(modified.id));
    assert!(deleted.after().unwrap().is_none());

    let before = deleted.before().unwrap().unwrap();
    assert_eq!(
        before.keys().collect::<Vec<_>>(),
        ["PostId", "Title", "Content", "NumViews", "BlogId"]
    );
    assert_eq!(before.get("PostId"), Some(&Value::Int(1)));
    assert_eq!(before.get("Content"), Some(&Value::from("Edited content.")));
    assert_eq!(before.get("NumViews"), Some(&Value::Null));
}

#[timeout(1000)]
#[test]
fn test_excluded_property_changes_are_not_recorded() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let blog = seed_blog(&mut session, "http://blog");

    session.set(blog, "PrivateURL", "http://secret").unwrap();
    assert_eq!(session.ensure_history().unwrap(), 0);
    session.save_changes().unwrap();

    session.set(blog, "PrivateURL", "http://other").unwrap();
    session.set(blog, "Url", "http://public").unwrap();
    assert_eq!(session.ensure_history().unwrap(), 1);
    session.save_changes().unwrap();

    let record = db.latest("Blogs", "1").unwrap().unwrap();
    assert!(!record.changed.contains("PrivateURL"));
    assert!(!record.changed.contains("http://other"));

    session.remove(blog).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    let deleted = db.latest("Blogs", "1").unwrap().unwrap();
    assert!(!deleted.before().unwrap().unwrap().contains_key("PrivateURL"));
}

#[timeout(1000)]
#[test]
fn test_excluded_type_is_never_recorded() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let cursor = session
        .add("AuditCursor", values([("Position", Value::Int(0))]))
        .unwrap();
    session.save_changes().unwrap();

    session.set(cursor, "Position", 42).unwrap();
    assert_eq!(session.ensure_history().unwrap(), 0);
    session.remove(cursor).unwrap();
    assert_eq!(session.ensure_history().unwrap(), 0);
    session.save_changes().unwrap();
    assert_eq!(db.history_count().unwrap(), 0);
}

#[timeout(1000)]
#[test]
fn test_chain_links_successive_records() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);
    let other = seed_post(&mut session);

    for views in 1..=4 {
        session.set(post, "NumViews", views).unwrap();
        session.set(other, "NumViews", views * 10).unwrap();
        session.ensure_history().unwrap();
        session.save_changes().unwrap();
    }

    let chain = db.chain("Posts", "1").unwrap();
    assert_eq!(chain.len(), 4);
    assert_eq!(chain[0].parent_id, None);
    for pair in chain.windows(2) {
        assert_eq!(pair[1].parent_id, Some(pair[0].id));
    }
    assert!(verify_chain(&chain).is_empty());
    assert!(verify_chain(&db.chain("Posts", "2").unwrap()).is_empty());
}

#[timeout(1000)]
#[test]
fn test_repeated_capture_stages_one_record_per_row() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "NumViews", 1).unwrap();
    assert_eq!(session.ensure_history().unwrap(), 1);
    assert_eq!(session.ensure_history().unwrap(), 1);
    assert_eq!(session.staged_history().staged_appends(), 1);
    assert_eq!(session.save_changes().unwrap(), 2);

    session.set(post, "NumViews", 2).unwrap();
    session.ensure_history().unwrap();
    session.set(post, "NumViews", 3).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();

    let chain = db.chain("Posts", "1").unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].parent_id, None);
    assert_eq!(chain[1].parent_id, Some(chain[0].id));
    assert!(verify_chain(&chain).is_empty());

    // Latest capture wins: before is the committed value, after the final one
    let after = chain[1].after().unwrap().unwrap();
    assert_eq!(chain[1].before().unwrap().unwrap().get("NumViews"), Some(&Value::Int(1)));
    assert_eq!(after.get("NumViews"), Some(&Value::Int(3)));
}

#[timeout(1000)]
#[test]
fn test_before_snapshot_reverts_modification() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);
    let original = session.values(post).unwrap().clone();

    session.set(post, "Title", "The new Era").unwrap();
    session.set(post, "NumViews", 7).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();

    let record = db.latest("Posts", "1").unwrap().unwrap();
    let mut reverted = db.get_row("Posts", "1").unwrap().unwrap();
    reverted.merge(&record.before().unwrap().unwrap());
    assert_eq!(reverted, original);
}

#[timeout(1000)]
#[test]
fn test_forced_modification_reads_stored_value() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.mark_modified(post, "Title").unwrap();
    assert_eq!(session.ensure_history().unwrap(), 1);
    session.save_changes().unwrap();

    let record = db.latest("Posts", "1").unwrap().unwrap();
    let before = record.before().unwrap().unwrap();
    assert_eq!(before.get("Title"), Some(&Value::from(TITLE)));
}

#[timeout(1000)]
#[test]
fn test_actor_is_stamped_on_records() {
    let db = blog_database(HistoryConfig::default());
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set_actor(Actor::named("alice").from_address("10.0.0.7"));
    session.set(post, "NumViews", 3).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();

    let record = db.latest("Posts", "1").unwrap().unwrap();
    assert_eq!(record.created_by.as_deref(), Some("alice"));
    assert_eq!(record.ip_address.as_deref(), Some("10.0.0.7"));
}

#[timeout(1000)]
#[test]
fn test_payload_over_limit_fails_whole_commit() {
    let db = blog_database(HistoryConfig {
        changed_max_length: Some(64),
        ..Default::default()
    });
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "Content", "x".repeat(100)).unwrap();
    session.ensure_history().unwrap();
    let err = session.save_changes().unwrap_err();
    assert!(matches!(
        err,
        HistoryError::ColumnTooLong {
            column: "changed",
            max: 64,
            ..
        }
    ));
    assert_eq!(db.history_count().unwrap(), 0);
    assert_eq!(
        db.get_row("Posts", "1").unwrap().unwrap().get("Content"),
        Some(&Value::from(CONTENT))
    );
}

#[timeout(1000)]
#[test]
fn test_non_positive_limit_uses_default() {
    let db = blog_database(HistoryConfig {
        changed_max_length: Some(0),
        ..Default::default()
    });
    let mut session = db.session();
    let post = seed_post(&mut session);

    session.set(post, "Content", "x".repeat(1000)).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();

    session.set(post, "Content", "y".repeat(3000)).unwrap();
    session.ensure_history().unwrap();
    assert!(matches!(
        session.save_changes(),
        Err(HistoryError::ColumnTooLong { max: 2048, .. })
    ));
    assert_eq!(db.history_count().unwrap(), 1);
}
