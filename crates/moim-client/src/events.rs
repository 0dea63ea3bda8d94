use serde::Serialize;
use tokio::sync::broadcast;

use moim_store::Notification;

/// Which path triggered a resync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSource {
    Realtime,
    Poll,
    Refresh,
}

/// Events published by a meeting chat to its UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatEvent {
    /// The stream was replaced by a fresh fetch.
    #[serde(rename_all = "camelCase")]
    Synced { source: SyncSource, count: usize },
    /// A background fetch failed; the previous stream is still shown.
    #[serde(rename_all = "camelCase")]
    SyncFailed { source: SyncSource, error: String },
    /// A notification was stored.
    Notified { notification: Notification },
    /// A send failed; the draft is kept.
    SendFailed { error: String },
}

pub fn emit_event(tx: &broadcast::Sender<ChatEvent>, event: ChatEvent) {
    if tx.send(event).is_err() {
        tracing::trace!("No chat event subscribers");
    }
}
