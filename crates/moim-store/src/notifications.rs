use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use moim_shared::{MeetingId, MessageId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{NewNotification, Notification, NotificationKind};

const SELECT_COLUMNS: &str =
    "SELECT id, kind, title, message, meeting_id, message_id, is_read, created_at FROM notifications";

impl Database {
    /// Store a notification unless an unread one exists for the same
    /// `message_id`.
    ///
    /// Returns `None` when suppressed. The existence check and the insert
    /// are a single statement.
    pub fn insert_notification(&self, new: &NewNotification) -> Result<Option<Notification>> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let meeting_id = new.meeting_id.map(|m| m.to_string());
        let message_id = new.message_id.map(|m| m.to_string());

        let affected = self.conn().execute(
            "INSERT INTO notifications
                 (id, kind, title, message, meeting_id, message_id, is_read, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, 0, ?7
             WHERE ?6 IS NULL OR NOT EXISTS (
                 SELECT 1 FROM notifications WHERE message_id = ?6 AND is_read = 0
             )",
            params![
                id.to_string(),
                new.kind.as_str(),
                new.title,
                new.message,
                meeting_id,
                message_id,
                now.to_rfc3339(),
            ],
        )?;

        if affected == 0 {
            return Ok(None);
        }

        Ok(Some(Notification {
            id,
            kind: new.kind,
            title: new.title.clone(),
            message: new.message.clone(),
            meeting_id: new.meeting_id,
            message_id: new.message_id,
            read: false,
            created_at: now,
        }))
    }

    /// All notifications, newest first.
    pub fn list_notifications(&self) -> Result<Vec<Notification>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC, id"))?;
        let rows = stmt.query_map([], row_to_notification)?;

        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    pub fn count_unread_notifications(&self) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM notifications WHERE is_read = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark one notification read. Returns `false` if it was unknown or
    /// already read.
    pub fn mark_notification_read(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND is_read = 0",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_all_notifications_read(&self) -> Result<usize> {
        let affected = self
            .conn()
            .execute("UPDATE notifications SET is_read = 1 WHERE is_read = 0", [])?;
        Ok(affected)
    }

    pub fn delete_notification(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM notifications WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    pub fn clear_notifications(&self) -> Result<usize> {
        let affected = self.conn().execute("DELETE FROM notifications", [])?;
        Ok(affected)
    }
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_uuid(idx: usize, s: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| conversion_error(idx, e))
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<Notification> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(1)?;
    let title: String = row.get(2)?;
    let message: String = row.get(3)?;
    let meeting_str: Option<String> = row.get(4)?;
    let message_str: Option<String> = row.get(5)?;
    let read: bool = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let id = parse_uuid(0, &id_str)?;
    let kind: NotificationKind = kind_str.parse().map_err(|e: String| {
        conversion_error(
            1,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    let meeting_id = meeting_str
        .map(|s| parse_uuid(4, &s).map(MeetingId))
        .transpose()?;
    let message_id = message_str
        .map(|s| parse_uuid(5, &s).map(MessageId))
        .transpose()?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(7, e))?;

    Ok(Notification {
        id,
        kind,
        title,
        message,
        meeting_id,
        message_id,
        read,
        created_at,
    })
}
