//! v001 -- Initial schema creation.
//!
//! Creates `notifications` and `app_settings`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Notifications
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS notifications (
    id         TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    kind       TEXT NOT NULL,                -- chat_message | meeting | system
    title      TEXT NOT NULL,
    message    TEXT NOT NULL,
    meeting_id TEXT,                         -- nullable meeting UUID
    message_id TEXT,                         -- nullable chat row UUID
    is_read    INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    created_at TEXT NOT NULL                 -- RFC-3339
);

-- At most one unread notification per chat message.
CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_unread_message
    ON notifications(message_id)
    WHERE is_read = 0 AND message_id IS NOT NULL;

CREATE INDEX IF NOT EXISTS idx_notifications_created
    ON notifications(created_at DESC);

-- ----------------------------------------------------------------
-- Settings (single JSON row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS app_settings (
    id   INTEGER PRIMARY KEY CHECK (id = 1),
    json TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
