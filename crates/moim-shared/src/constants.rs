use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "moim";

/// Table holding meeting chat rows
pub const CHAT_TABLE: &str = "meeting_chats";

/// User directory table (`id`, `username`)
pub const USERS_TABLE: &str = "users";

/// Meeting membership table
pub const PARTICIPANTS_TABLE: &str = "meeting_participants";

/// Participant status that grants chat access
pub const PARTICIPANT_APPROVED: &str = "approved";

/// Database schema the realtime feed watches
pub const DB_SCHEMA: &str = "public";

/// Label shown when an author's display name cannot be resolved
pub const ANONYMOUS_LABEL: &str = "익명";

/// Polling fallback period
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Realtime (Phoenix) heartbeat period
pub const REALTIME_HEARTBEAT: Duration = Duration::from_secs(30);

/// Realtime protocol version sent on connect
pub const REALTIME_VSN: &str = "1.0.0";

/// Title used for chat notifications
pub const CHAT_NOTIFICATION_TITLE: &str = "새 채팅 메시지";
