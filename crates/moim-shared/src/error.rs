use thiserror::Error;

/// Failures surfaced by the meeting chat component.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// A read against the backend failed; the local stream is left as-is.
    #[error("Remote query failed: {0}")]
    RemoteQuery(String),

    /// Inserting a chat row failed; the draft is kept for retry.
    #[error("Remote write failed: {0}")]
    RemoteWrite(String),

    /// Input rejected before any remote call.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// Author name lookup failed.
    #[error("Directory lookup failed: {0}")]
    DirectoryLookup(String),

    /// The realtime channel could not be established.
    #[error("Realtime subscription failed: {0}")]
    Subscribe(String),

    /// The local user is not a participant of this meeting.
    #[error("Not a participant of this meeting")]
    NotParticipant,

    /// Local notification store failure.
    #[error("Notification store error: {0}")]
    Notification(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
