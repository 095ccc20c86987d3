//! Shared fixtures: a blogging schema with posts referencing blogs.

use history_core::{
    Database, EntityRef, EntityType, HistoryConfig, PropertyDef, Session, Snapshot, Value,
    ValueKind,
};

pub const TITLE: &str = "xUnit";
pub const CONTENT: &str = "Post from xUnit test.";

/// Registers `Blog`, `Post` and the history-excluded `AuditCursor`.
pub fn blog_database(config: HistoryConfig) -> Database {
    let db = Database::new(config);
    db.register_entity(EntityType::new(
        "Blog",
        "Blogs",
        vec![
            PropertyDef::key("BlogId", ValueKind::Int),
            PropertyDef::new("Url", ValueKind::Text),
            PropertyDef::new("PrivateURL", ValueKind::Text).exclude_from_history(),
        ],
    ))
    .unwrap();
    db.register_entity(
        EntityType::new(
            "Post",
            "Posts",
            vec![
                PropertyDef::key("PostId", ValueKind::Int),
                PropertyDef::new("Title", ValueKind::Text),
                PropertyDef::new("Content", ValueKind::Text),
                PropertyDef::new("NumViews", ValueKind::Int),
                PropertyDef::new("BlogId", ValueKind::Int),
            ],
        )
        .with_relation("BlogId", "Blogs", "BlogId"),
    )
    .unwrap();
    db.register_entity(
        EntityType::new(
            "AuditCursor",
            "AuditCursors",
            vec![
                PropertyDef::key("CursorId", ValueKind::Int),
                PropertyDef::new("Position", ValueKind::Int),
            ],
        )
        .exclude_from_history(),
    )
    .unwrap();
    db
}

pub fn values<const N: usize>(pairs: [(&str, Value); N]) -> Snapshot {
    pairs.into_iter().collect()
}

/// Adds and saves the standard post; returns its handle.
pub fn seed_post(session: &mut Session<'_>) -> EntityRef {
    let post = session
        .add(
            "Post",
            values([
                ("Title", Value::from(TITLE)),
                ("Content", Value::from(CONTENT)),
            ]),
        )
        .unwrap();
    session.save_changes().unwrap();
    post
}

/// Adds and saves a blog; returns its handle.
pub fn seed_blog(session: &mut Session<'_>, url: &str) -> EntityRef {
    let blog = session
        .add(
            "Blog",
            values([
                ("Url", Value::from(url)),
                ("PrivateURL", Value::from("http://private")),
            ]),
        )
        .unwrap();
    session.save_changes().unwrap();
    blog
}
