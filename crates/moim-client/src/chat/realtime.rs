use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use moim_net::{ChatBackend, SubscriptionGuard};
use moim_shared::{ChatError, ChatResult, InsertEvent, MeetingId};

use crate::events::SyncSource;

use super::{SyncPipeline, SyncTrigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Unsubscribed,
    Subscribed,
}

/// Insert feed of one meeting's chat rows.
///
/// Events are forwarded to the sync consumer; the listener itself never
/// touches the stream. An instance subscribes at most once; after
/// [`unsubscribe`](Self::unsubscribe) it stays unsubscribed.
pub struct RealtimeListener {
    backend: Arc<dyn ChatBackend>,
    meeting_id: MeetingId,
    state: ListenerState,
    closed: bool,
    guard: Option<SubscriptionGuard>,
    forwarder: Option<JoinHandle<()>>,
}

impl RealtimeListener {
    pub fn new(backend: Arc<dyn ChatBackend>, meeting_id: MeetingId) -> Self {
        Self {
            backend,
            meeting_id,
            state: ListenerState::Unsubscribed,
            closed: false,
            guard: None,
            forwarder: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub(crate) async fn subscribe(&mut self, triggers: mpsc::Sender<SyncTrigger>) -> ChatResult<()> {
        if self.closed || self.state == ListenerState::Subscribed {
            return Err(ChatError::Subscribe("listener already used".into()));
        }

        let subscription = self.backend.subscribe(self.meeting_id).await.map_err(|e| {
            warn!(meeting = %self.meeting_id, error = %e, "Realtime subscribe failed");
            ChatError::Subscribe(e.to_string())
        })?;
        let (mut events, guard) = subscription.into_parts();

        let meeting_id = self.meeting_id;
        self.forwarder = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.meeting_id != meeting_id {
                    debug!(msg_id = %event.id, "Insert for another meeting ignored");
                    continue;
                }
                if triggers.send(SyncTrigger::Insert(event)).await.is_err() {
                    break;
                }
            }
            debug!(meeting = %meeting_id, "Realtime forwarder stopped");
        }));

        info!(meeting = %self.meeting_id, topic = %guard.topic(), "Subscribed to chat inserts");
        self.guard = Some(guard);
        self.state = ListenerState::Subscribed;
        Ok(())
    }

    /// Leave the channel and stop forwarding. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.unsubscribe();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        self.state = ListenerState::Unsubscribed;
        self.closed = true;
    }
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Notify for a foreign insert, then refetch the whole stream.
pub(crate) async fn handle_insert(pipeline: &SyncPipeline, event: InsertEvent) {
    debug!(msg_id = %event.id, user = %event.user_id, "Chat insert received");

    if pipeline.is_foreign(event.user_id) {
        let author = pipeline.resolve_author(event.user_id).await;
        pipeline.bridge.notify(&event.into_message(author));
    }

    // Failure is reported through the event channel and the stale stream stays.
    let _ = pipeline.resync(SyncSource::Realtime).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use moim_net::MemoryBackend;
    use moim_shared::UserId;
    use std::time::Duration;

    #[tokio::test]
    async fn test_forwards_only_own_meeting() {
        let backend = MemoryBackend::new();
        let meeting = MeetingId::new();
        let mut listener = RealtimeListener::new(Arc::new(backend.clone()), meeting);
        let (tx, mut rx) = mpsc::channel(8);

        listener.subscribe(tx).await.unwrap();
        assert_eq!(listener.state(), ListenerState::Subscribed);

        let posted = backend.post(meeting, UserId::new(), "hi");
        backend.post(MeetingId::new(), UserId::new(), "elsewhere");

        let trigger = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match trigger {
            SyncTrigger::Insert(event) => assert_eq!(event.id, posted.id),
            other => panic!("unexpected trigger {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_is_terminal() {
        let backend = MemoryBackend::new();
        let meeting = MeetingId::new();
        let mut listener = RealtimeListener::new(Arc::new(backend.clone()), meeting);
        let (tx, _rx) = mpsc::channel(8);

        listener.subscribe(tx.clone()).await.unwrap();
        assert_eq!(backend.active_subscriptions(meeting), 1);

        listener.unsubscribe();
        listener.unsubscribe();
        assert_eq!(listener.state(), ListenerState::Unsubscribed);
        assert_eq!(backend.active_subscriptions(meeting), 0);
        assert!(matches!(
            listener.subscribe(tx).await,
            Err(ChatError::Subscribe(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_failure_surfaces() {
        let backend = MemoryBackend::new();
        backend.fail_subscribe(true);
        let mut listener = RealtimeListener::new(Arc::new(backend), MeetingId::new());
        let (tx, _rx) = mpsc::channel(8);

        let err = listener.subscribe(tx).await.unwrap_err();
        assert!(matches!(err, ChatError::Subscribe(_)));
        assert_eq!(listener.state(), ListenerState::Unsubscribed);
    }
}
