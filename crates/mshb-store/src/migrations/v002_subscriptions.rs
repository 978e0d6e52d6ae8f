use rusqlite::Connection;

const UP_SQL: &str = r#"
-- Billing mock: one row per user that went through checkout
CREATE TABLE IF NOT EXISTS subscriptions (
    user_id    TEXT PRIMARY KEY NOT NULL,
    plan       TEXT NOT NULL,
    status     TEXT NOT NULL,               -- active | canceled
    renews_at  TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
