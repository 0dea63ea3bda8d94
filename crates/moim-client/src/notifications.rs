//! Process-wide notification list and the bridge that feeds it from chat.
//!
//! [`NotificationCenter`] is the only way to touch the stored list: it is
//! opened explicitly for the application session and exposes add / read /
//! delete operations plus an unread counter the UI can watch.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use moim_shared::constants::CHAT_NOTIFICATION_TITLE;
use moim_shared::{ChatError, ChatMessage, ChatResult};
use moim_store::{Database, NewNotification, Notification, NotificationKind, StoreError};

use crate::events::{emit_event, ChatEvent};

const PREVIEW_CHARS: usize = 80;

fn store_err(e: StoreError) -> ChatError {
    ChatError::Notification(e.to_string())
}

/// Shared handle to the persisted notification list.
#[derive(Clone)]
pub struct NotificationCenter {
    db: Arc<Mutex<Database>>,
    unread: Arc<watch::Sender<u32>>,
}

impl NotificationCenter {
    /// Take ownership of an opened database for the rest of the session.
    pub fn new(db: Database) -> Result<Self, StoreError> {
        let unread = db.count_unread_notifications()?;
        let (unread_tx, _) = watch::channel(unread);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            unread: Arc::new(unread_tx),
        })
    }

    /// A center backed by a throwaway in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::new(Database::open_in_memory()?)
    }

    fn db(&self) -> ChatResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| ChatError::Notification(format!("Lock poisoned: {e}")))
    }

    /// Recount under the same lock as the change so watchers never see a
    /// count that disagrees with the list.
    fn publish_unread(&self, db: &Database) -> ChatResult<()> {
        let count = db.count_unread_notifications().map_err(store_err)?;
        self.unread.send_replace(count);
        Ok(())
    }

    /// Store a notification. Returns `None` if an unread notification for
    /// the same message already exists.
    pub fn add(&self, new: NewNotification) -> ChatResult<Option<Notification>> {
        let db = self.db()?;
        let stored = db.insert_notification(&new).map_err(store_err)?;
        if stored.is_some() {
            self.publish_unread(&db)?;
        }
        Ok(stored)
    }

    pub fn list(&self) -> ChatResult<Vec<Notification>> {
        self.db()?.list_notifications().map_err(store_err)
    }

    pub fn unread_count(&self) -> u32 {
        *self.unread.borrow()
    }

    pub fn subscribe_unread(&self) -> watch::Receiver<u32> {
        self.unread.subscribe()
    }

    pub fn mark_read(&self, id: Uuid) -> ChatResult<bool> {
        let db = self.db()?;
        let changed = db.mark_notification_read(id).map_err(store_err)?;
        if changed {
            self.publish_unread(&db)?;
        }
        Ok(changed)
    }

    pub fn mark_all_read(&self) -> ChatResult<usize> {
        let db = self.db()?;
        let changed = db.mark_all_notifications_read().map_err(store_err)?;
        self.publish_unread(&db)?;
        Ok(changed)
    }

    pub fn delete(&self, id: Uuid) -> ChatResult<bool> {
        let db = self.db()?;
        let removed = db.delete_notification(id).map_err(store_err)?;
        self.publish_unread(&db)?;
        Ok(removed)
    }

    pub fn clear(&self) -> ChatResult<usize> {
        let db = self.db()?;
        let removed = db.clear_notifications().map_err(store_err)?;
        self.publish_unread(&db)?;
        Ok(removed)
    }
}

/// Turns chat messages from other participants into notifications.
#[derive(Clone)]
pub struct NotificationBridge {
    center: NotificationCenter,
    enabled: bool,
    events: broadcast::Sender<ChatEvent>,
}

impl NotificationBridge {
    pub fn new(
        center: NotificationCenter,
        enabled: bool,
        events: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            center,
            enabled,
            events,
        }
    }

    /// Raise a notification for `candidate` unless an unread one for the
    /// same message id is still open.
    ///
    /// Store failures are logged and swallowed; they never block a resync.
    pub fn notify(&self, candidate: &ChatMessage) -> Option<Notification> {
        if !self.enabled {
            debug!(msg_id = %candidate.id, "Notifications disabled, skipping");
            return None;
        }

        let new = NewNotification {
            kind: NotificationKind::ChatMessage,
            title: CHAT_NOTIFICATION_TITLE.to_string(),
            message: format!(
                "{}: {}",
                candidate.author.display_name(),
                preview(&candidate.message)
            ),
            meeting_id: Some(candidate.meeting_id),
            message_id: Some(candidate.id),
        };

        match self.center.add(new) {
            Ok(Some(notification)) => {
                info!(
                    msg_id = %candidate.id,
                    meeting = %candidate.meeting_id,
                    "Chat notification raised"
                );
                emit_event(
                    &self.events,
                    ChatEvent::Notified {
                        notification: notification.clone(),
                    },
                );
                Some(notification)
            }
            Ok(None) => {
                debug!(msg_id = %candidate.id, "Unread notification already open, suppressed");
                None
            }
            Err(e) => {
                warn!(msg_id = %candidate.id, error = %e, "Failed to store notification");
                None
            }
        }
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    out.push('…');
    out
}
