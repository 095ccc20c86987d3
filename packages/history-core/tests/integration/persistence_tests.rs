//! Persistence integration: history survives save and load, rollback after reload.

use history_core::persistence::PersistenceManager;
use history_core::{verify_chain, ChangeKind, HistoryConfig, HistoryLog, RollbackOutcome, Value};
use ntest::timeout;
use tempfile::tempdir;

use super::helpers::{blog_database, seed_post, CONTENT};

#[timeout(2000)]
#[test]
fn test_history_survives_reload_and_rolls_back() {
    let temp_dir = tempdir().unwrap();
    let config = HistoryConfig {
        data_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };

    let db = blog_database(config.clone());
    {
        let mut session = db.session();
        let post = seed_post(&mut session);
        session.set(post, "Content", "Edited content.").unwrap();
        session.ensure_history().unwrap();
        session.save_changes().unwrap();
        session.remove(post).unwrap();
        session.ensure_history().unwrap();
        session.save_changes().unwrap();
    }

    let persistence = PersistenceManager::new(&config);
    persistence.save(&db).unwrap();

    let reloaded = persistence.load(config).unwrap();
    assert_eq!(reloaded.history_count().unwrap(), 2);
    let chain = reloaded.chain("Posts", "1").unwrap();
    assert!(verify_chain(&chain).is_empty());
    assert_eq!(chain[1].kind, ChangeKind::Deleted);
    assert_eq!(chain[1].created_at, db.chain("Posts", "1").unwrap()[1].created_at);

    let mut session = reloaded.session();
    let outcome = session.rollback_row("Post", "1", None).unwrap();
    assert!(matches!(outcome, RollbackOutcome::Restored { history_id: 2, .. }));
    session.save_changes().unwrap();

    let row = reloaded.get_row("Posts", "1").unwrap().unwrap();
    assert_eq!(row.get("Content"), Some(&Value::from("Edited content.")));

    // New records continue the id sequence of the saved log
    let post = session.load("Post", "1").unwrap().unwrap();
    session.set(post, "Content", CONTENT).unwrap();
    session.ensure_history().unwrap();
    session.save_changes().unwrap();
    let latest = reloaded.latest("Posts", "1").unwrap().unwrap();
    assert_eq!(latest.id, 3);
    assert_eq!(latest.parent_id, Some(1));
}

#[timeout(2000)]
#[test]
fn test_save_is_repeatable() {
    let temp_dir = tempdir().unwrap();
    let config = HistoryConfig {
        data_dir: temp_dir.path().to_path_buf(),
        ..Default::default()
    };
    let db = blog_database(config.clone());
    let persistence = PersistenceManager::new(&config);

    persistence.save(&db).unwrap();
    {
        let mut session = db.session();
        seed_post(&mut session);
    }
    persistence.save(&db).unwrap();

    let reloaded = persistence.load(config).unwrap();
    assert_eq!(reloaded.row_count("Posts").unwrap(), 1);
    assert_eq!(
        reloaded.table_names(),
        vec![
            "AuditCursors".to_string(),
            "Blogs".to_string(),
            "Posts".to_string()
        ]
    );
}
