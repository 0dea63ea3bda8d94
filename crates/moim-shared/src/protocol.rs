use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MeetingId, MessageId, UserId};

/// Display name of a chat author, resolved once when the row is read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Author {
    /// Username found in the user directory.
    Known(String),
    /// Directory had no usable name; carries the fallback label.
    Anonymous(String),
}

impl Author {
    /// Build an author from an optional directory username.
    ///
    /// Blank names count as missing.
    pub fn resolve(username: Option<String>, anonymous_label: &str) -> Self {
        match username {
            Some(name) if !name.trim().is_empty() => Self::Known(name),
            _ => Self::Anonymous(anonymous_label.to_string()),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Known(name) | Self::Anonymous(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

/// A meeting chat row as read back from the backend, joined with the
/// author's display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-assigned identifier
    pub id: MessageId,
    /// Meeting the message belongs to
    pub meeting_id: MeetingId,
    /// Author's account
    pub user_id: UserId,
    pub author: Author,
    /// Body text
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A chat row joined with the author's directory username, before the
/// author has been resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRow {
    pub id: MessageId,
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// `users.username` of the author, if the join found one
    pub username: Option<String>,
}

impl ChatRow {
    pub fn into_message(self, anonymous_label: &str) -> ChatMessage {
        ChatMessage {
            id: self.id,
            meeting_id: self.meeting_id,
            user_id: self.user_id,
            author: Author::resolve(self.username, anonymous_label),
            message: self.message,
            created_at: self.created_at,
        }
    }
}

/// Realtime notification that a chat row was inserted.
///
/// Carries the raw row only; the author join is not available on the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InsertEvent {
    pub id: MessageId,
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl InsertEvent {
    /// Turn the raw row into a message once its author has been resolved.
    pub fn into_message(self, author: Author) -> ChatMessage {
        ChatMessage {
            id: self.id,
            meeting_id: self.meeting_id,
            user_id: self.user_id,
            author,
            message: self.message,
            created_at: self.created_at,
        }
    }
}

/// Body of a chat insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewChat {
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_author_resolve() {
        assert_eq!(
            Author::resolve(Some("mina".into()), "anon"),
            Author::Known("mina".into())
        );
        assert_eq!(Author::resolve(None, "anon"), Author::Anonymous("anon".into()));
        assert_eq!(
            Author::resolve(Some("   ".into()), "anon"),
            Author::Anonymous("anon".into())
        );
    }

    #[test]
    fn test_insert_event_into_message() {
        let event = InsertEvent {
            id: MessageId::new(),
            meeting_id: MeetingId::new(),
            user_id: UserId::new(),
            message: "hello".into(),
            created_at: Utc::now(),
        };
        let msg = event.clone().into_message(Author::Known("jun".into()));
        assert_eq!(msg.id, event.id);
        assert_eq!(msg.author.display_name(), "jun");
        assert_eq!(msg.message, "hello");
    }

    #[test]
    fn test_author_json_shape() {
        let json = serde_json::to_value(Author::Anonymous("익명".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "anonymous", "name": "익명"}));
    }
}
