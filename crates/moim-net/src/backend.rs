//! The call/response contract the chat component consumes from the hosted
//! backend.

use async_trait::async_trait;
use tokio::sync::mpsc;

use moim_shared::{ChatRow, InsertEvent, MeetingId, NewChat, UserId};

use crate::error::Result;

/// Hosted backend operations used by a meeting chat.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Every chat row of a meeting, ascending by creation time, joined with
    /// the author's username.
    async fn fetch_chats(&self, meeting_id: MeetingId) -> Result<Vec<ChatRow>>;

    /// Insert one chat row. The row id and timestamp are assigned remotely.
    async fn insert_chat(&self, chat: &NewChat) -> Result<()>;

    /// Point lookup of a username in the user directory.
    async fn lookup_username(&self, user_id: UserId) -> Result<Option<String>>;

    /// Whether `user_id` is an approved participant of `meeting_id`.
    async fn is_participant(&self, meeting_id: MeetingId, user_id: UserId) -> Result<bool>;

    /// Open the insert feed of a meeting's chat rows.
    async fn subscribe(&self, meeting_id: MeetingId) -> Result<Subscription>;
}

type LeaveFn = Box<dyn FnOnce() + Send + Sync>;

/// Leaves a realtime channel when dropped or when [`unsubscribe`] is called.
///
/// [`unsubscribe`]: SubscriptionGuard::unsubscribe
pub struct SubscriptionGuard {
    topic: String,
    leave: Option<LeaveFn>,
}

impl SubscriptionGuard {
    pub fn new(topic: impl Into<String>, leave: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            topic: topic.into(),
            leave: Some(Box::new(leave)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn unsubscribe(mut self) {
        self.leave_now();
    }

    fn leave_now(&mut self) {
        if let Some(leave) = self.leave.take() {
            tracing::debug!(topic = %self.topic, "Leaving realtime channel");
            leave();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.leave_now();
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("topic", &self.topic)
            .field("active", &self.leave.is_some())
            .finish()
    }
}

/// An established insert feed.
#[derive(Debug)]
pub struct Subscription {
    pub events: mpsc::Receiver<InsertEvent>,
    pub guard: SubscriptionGuard,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<InsertEvent>, guard: SubscriptionGuard) -> Self {
        Self { events, guard }
    }

    pub fn into_parts(self) -> (mpsc::Receiver<InsertEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_guard_leaves_once() {
        let left = Arc::new(AtomicUsize::new(0));
        let counter = left.clone();
        let guard = SubscriptionGuard::new("meeting:x", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        guard.unsubscribe();
        assert_eq!(left.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_leaves_on_drop() {
        let left = Arc::new(AtomicUsize::new(0));
        let counter = left.clone();
        {
            let _guard = SubscriptionGuard::new("meeting:y", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(left.load(Ordering::SeqCst), 1);
    }
}
