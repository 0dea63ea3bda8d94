use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use moim_client::chat::ListenerState;
use moim_client::{ChatContext, ChatEvent, ChatSettings, MeetingChat, NotificationCenter, SyncSource};
use moim_net::MemoryBackend;
use moim_shared::{ChatError, MeetingId, MessageId, UserId};

const WAIT: Duration = Duration::from_secs(5);

struct Fixture {
    backend: MemoryBackend,
    center: NotificationCenter,
    meeting: MeetingId,
    me: UserId,
    mina: UserId,
}

impl Fixture {
    fn new() -> Self {
        let backend = MemoryBackend::new();
        let meeting = MeetingId::new();
        let (me, mina) = (UserId::new(), UserId::new());
        backend.add_user(me, "me");
        backend.add_user(mina, "mina");
        backend.add_participant(meeting, me);
        backend.add_participant(meeting, mina);
        Self {
            backend,
            center: NotificationCenter::in_memory().unwrap(),
            meeting,
            me,
            mina,
        }
    }

    fn settings() -> ChatSettings {
        // Long period so ticks only happen through poll_now.
        ChatSettings {
            poll_interval_secs: 3600,
            ..ChatSettings::default()
        }
    }

    async fn open(&self, is_participant: bool) -> Result<MeetingChat, ChatError> {
        MeetingChat::activate(
            Arc::new(self.backend.clone()),
            self.center.clone(),
            ChatContext::new(self.meeting, self.me, is_participant),
            &Self::settings(),
        )
        .await
    }

    fn notified_ids(&self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self
            .center
            .list()
            .unwrap()
            .into_iter()
            .filter_map(|n| n.message_id)
            .collect();
        ids.sort();
        ids
    }
}

async fn wait_for(rx: &mut broadcast::Receiver<ChatEvent>, pred: impl Fn(&ChatEvent) -> bool) {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for chat event");
}

async fn wait_synced(rx: &mut broadcast::Receiver<ChatEvent>, expected: SyncSource) {
    wait_for(rx, |e| matches!(e, ChatEvent::Synced { source, .. } if *source == expected)).await;
}

fn stream_ids(chat: &MeetingChat) -> Vec<MessageId> {
    chat.view().chats.iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn test_activation_loads_existing_messages() {
    let fx = Fixture::new();
    let old = fx.backend.post_silently(fx.meeting, fx.mina, "before");

    let chat = fx.open(true).await.unwrap();
    assert!(chat.is_active());
    assert_eq!(chat.listener_state(), ListenerState::Subscribed);
    assert_eq!(stream_ids(&chat), vec![old.id]);
    assert_eq!(fx.backend.calls().fetches, 1);
    assert_eq!(fx.backend.calls().subscribes, 1);
    assert!(chat.view().can_send);
    // Loading history raises nothing.
    assert_eq!(fx.center.unread_count(), 0);
}

#[tokio::test]
async fn test_realtime_insert_notifies_and_refetches() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();
    let mut chats = chat.subscribe_chats();

    let m1 = fx.backend.post(fx.meeting, fx.mina, "7시에 봬요");
    wait_synced(&mut events, SyncSource::Realtime).await;

    assert_eq!(fx.backend.calls().fetches, 2);
    assert_eq!(fx.backend.calls().lookups, 1);
    assert_eq!(stream_ids(&chat), vec![m1.id]);
    assert_eq!(chats.borrow_and_update().len(), 1);

    let list = fx.center.list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].message_id, Some(m1.id));
    assert_eq!(list[0].meeting_id, Some(fx.meeting));
    assert_eq!(list[0].message, "mina: 7시에 봬요");
    assert_eq!(chat.view().unread_count, 1);
}

#[tokio::test]
async fn test_own_messages_are_not_notified() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();

    chat.send_text("  hello  ").await.unwrap();
    wait_synced(&mut events, SyncSource::Realtime).await;

    let view = chat.view();
    assert_eq!(view.chats.len(), 1);
    assert_eq!(view.chats[0].message, "hello");
    assert_eq!(view.chats[0].author.display_name(), "me");
    assert!(view.draft.is_empty());
    assert!(view.last_error.is_none());
    assert_eq!(fx.center.unread_count(), 0);
    assert_eq!(fx.backend.calls().lookups, 0);
}

#[tokio::test]
async fn test_poll_notifies_only_missed_messages() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();

    let m1 = fx.backend.post(fx.meeting, fx.mina, "seen live");
    wait_synced(&mut events, SyncSource::Realtime).await;
    fx.center.mark_all_read().unwrap();

    let m2 = fx.backend.post_silently(fx.meeting, fx.mina, "missed");
    chat.poll_now().await.unwrap();

    assert_eq!(stream_ids(&chat), vec![m1.id, m2.id]);
    let unread: Vec<_> = fx
        .center
        .list()
        .unwrap()
        .into_iter()
        .filter(|n| !n.read)
        .collect();
    assert_eq!(unread.len(), 1);
    assert_eq!(unread[0].message_id, Some(m2.id));

    // Nothing new since the last render.
    chat.poll_now().await.unwrap();
    assert_eq!(fx.center.unread_count(), 1);
}

#[tokio::test]
async fn test_duplicate_while_unread_is_suppressed() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();

    let m3 = fx.backend.post(fx.meeting, fx.mina, "m3");
    wait_synced(&mut events, SyncSource::Realtime).await;

    fx.backend.redeliver(&m3);
    fx.backend.redeliver(&m3);
    wait_synced(&mut events, SyncSource::Realtime).await;
    wait_synced(&mut events, SyncSource::Realtime).await;

    assert_eq!(fx.notified_ids(), vec![m3.id]);
    assert_eq!(stream_ids(&chat), vec![m3.id]);
}

#[tokio::test]
async fn test_renotified_after_read() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();

    let m3 = fx.backend.post(fx.meeting, fx.mina, "m3");
    wait_synced(&mut events, SyncSource::Realtime).await;
    let first = fx.center.list().unwrap().remove(0);
    assert!(fx.center.mark_read(first.id).unwrap());

    fx.backend.redeliver(&m3);
    wait_synced(&mut events, SyncSource::Realtime).await;

    assert_eq!(fx.notified_ids(), vec![m3.id, m3.id]);
    assert_eq!(fx.center.unread_count(), 1);
}

#[tokio::test]
async fn test_blank_send_is_rejected_locally() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();

    let err = chat.send_text("   ").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(_)));
    assert_eq!(fx.backend.calls().inserts, 0);

    let view = chat.view();
    assert_eq!(view.draft, "   ");
    assert!(!view.sending);
    assert!(view.last_error.is_some());
}

#[tokio::test]
async fn test_write_failure_keeps_draft() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();
    fx.backend.fail_writes(true);

    let err = chat.send_text("hi").await.unwrap_err();
    assert!(matches!(err, ChatError::RemoteWrite(_)));
    wait_for(&mut events, |e| matches!(e, ChatEvent::SendFailed { .. })).await;

    let view = chat.view();
    assert_eq!(view.draft, "hi");
    assert!(view.last_error.is_some());
    assert!(view.chats.is_empty());

    fx.backend.fail_writes(false);
    chat.send().await.unwrap();
    assert!(chat.view().draft.is_empty());
    assert!(chat.view().last_error.is_none());
}

#[tokio::test]
async fn test_non_participant_view_is_inert() {
    let fx = Fixture::new();
    fx.backend.post_silently(fx.meeting, fx.mina, "private");

    let chat = fx.open(false).await.unwrap();
    let view = chat.view();
    assert!(!view.can_send);
    assert!(view.chats.is_empty());
    assert!(!chat.is_active());
    assert_eq!(chat.listener_state(), ListenerState::Unsubscribed);

    let err = chat.send_text("let me in").await.unwrap_err();
    assert_eq!(err, ChatError::NotParticipant);

    let calls = fx.backend.calls();
    assert_eq!((calls.fetches, calls.subscribes, calls.inserts), (0, 0, 0));
}

#[tokio::test]
async fn test_poll_converges_with_remote() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();

    for i in 0..3 {
        fx.backend.post_silently(fx.meeting, fx.mina, &format!("lost {i}"));
    }
    chat.poll_now().await.unwrap();

    let remote: Vec<MessageId> = fx.backend.rows(fx.meeting).iter().map(|r| r.id).collect();
    assert_eq!(stream_ids(&chat), remote);
    assert_eq!(fx.center.unread_count(), 3);
}

#[tokio::test]
async fn test_deactivate_stops_everything() {
    let fx = Fixture::new();
    let mut chat = fx.open(true).await.unwrap();
    assert_eq!(fx.backend.active_subscriptions(fx.meeting), 1);

    chat.deactivate();
    chat.deactivate();
    assert!(!chat.is_active());
    assert_eq!(chat.listener_state(), ListenerState::Unsubscribed);
    assert_eq!(fx.backend.active_subscriptions(fx.meeting), 0);
    assert!(!chat.view().can_send);

    let fetches = fx.backend.calls().fetches;
    fx.backend.post(fx.meeting, fx.mina, "after close");
    chat.poll_now().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fx.backend.calls().fetches, fetches);
    assert_eq!(fx.center.unread_count(), 0);
}

#[tokio::test]
async fn test_drop_leaves_channel() {
    let fx = Fixture::new();
    {
        let _chat = fx.open(true).await.unwrap();
        assert_eq!(fx.backend.active_subscriptions(fx.meeting), 1);
    }
    assert_eq!(fx.backend.active_subscriptions(fx.meeting), 0);
}

#[tokio::test]
async fn test_failed_fetch_keeps_stream() {
    let fx = Fixture::new();
    let m1 = fx.backend.post_silently(fx.meeting, fx.mina, "kept");
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();
    assert_eq!(stream_ids(&chat), vec![m1.id]);

    fx.backend.fail_queries(true);
    fx.backend.post(fx.meeting, fx.mina, "not yet visible");
    wait_for(&mut events, |e| {
        matches!(e, ChatEvent::SyncFailed { source: SyncSource::Realtime, .. })
    })
    .await;
    assert_eq!(stream_ids(&chat), vec![m1.id]);

    let err = chat.poll_now().await.unwrap_err();
    assert!(matches!(err, ChatError::RemoteQuery(_)));
    assert_eq!(stream_ids(&chat), vec![m1.id]);

    fx.backend.fail_queries(false);
    chat.refresh().await.unwrap();
    assert_eq!(chat.view().chats.len(), 2);
}

#[tokio::test]
async fn test_subscribe_failure_is_reported() {
    let fx = Fixture::new();
    fx.backend.fail_subscribe(true);

    let err = fx.open(true).await.err().unwrap();
    assert!(matches!(err, ChatError::Subscribe(_)));
    assert_eq!(fx.backend.calls().fetches, 0);
}

#[tokio::test]
async fn test_lookup_failure_uses_anonymous_label() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();
    fx.backend.fail_lookups(true);

    fx.backend.post(fx.meeting, fx.mina, "누구게");
    wait_synced(&mut events, SyncSource::Realtime).await;

    let list = fx.center.list().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].message, "익명: 누구게");
}

#[tokio::test]
async fn test_unknown_author_renders_anonymous() {
    let fx = Fixture::new();
    let stranger = UserId::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();

    fx.backend.post(fx.meeting, stranger, "hello");
    wait_synced(&mut events, SyncSource::Realtime).await;

    let view = chat.view();
    assert_eq!(view.chats[0].author.display_name(), "익명");
    assert!(!view.chats[0].author.is_known());
}

#[tokio::test]
async fn test_poll_skips_own_and_rendered_messages() {
    let fx = Fixture::new();
    let chat = fx.open(true).await.unwrap();
    let mut events = chat.subscribe_events();

    chat.send_text("M1").await.unwrap();
    wait_synced(&mut events, SyncSource::Realtime).await;

    let m2 = fx.backend.post_silently(fx.meeting, fx.mina, "M2");
    chat.poll_now().await.unwrap();

    assert_eq!(fx.notified_ids(), vec![m2.id]);
    assert_eq!(chat.view().chats.len(), 2);
}
