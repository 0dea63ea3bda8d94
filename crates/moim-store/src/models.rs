//! Records persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use moim_shared::{MeetingId, MessageId};

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// What raised a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A chat message from another participant.
    ChatMessage,
    /// A meeting-level change (schedule, membership).
    Meeting,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::Meeting => "meeting",
            Self::System => "system",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat_message" => Ok(Self::ChatMessage),
            "meeting" => Ok(Self::Meeting),
            "system" => Ok(Self::System),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

/// A notification as requested by a producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub meeting_id: Option<MeetingId>,
    /// Originating chat message; at most one unread record may exist per id.
    pub message_id: Option<MessageId>,
}

/// A stored notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub meeting_id: Option<MeetingId>,
    pub message_id: Option<MessageId>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_stored_use_same_field_names() {
        let new = NewNotification {
            kind: NotificationKind::ChatMessage,
            title: "t".into(),
            message: "m".into(),
            meeting_id: Some(MeetingId::new()),
            message_id: Some(MessageId::new()),
        };
        let json = serde_json::to_value(&new).unwrap();
        assert!(json.get("meetingId").is_some());
        assert!(json.get("messageId").is_some());
        assert!(json.get("meeting_id").is_none());
    }
}
