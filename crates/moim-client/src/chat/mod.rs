//! Live chat of one meeting.
//!
//! Two producers feed one consumer task through an mpsc queue:
//! the [`RealtimeListener`] forwards insert events, the [`PollingFallback`]
//! emits ticks. The consumer handles one trigger at a time, so the realtime
//! path and the poll path never run concurrently, and every trigger ends in
//! a full refetch, which makes replays harmless.

pub mod polling;
pub mod realtime;
pub mod sender;
pub mod store;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use moim_net::ChatBackend;
use moim_shared::{Author, ChatError, ChatMessage, ChatResult, InsertEvent, UserId};

use crate::events::{emit_event, ChatEvent, SyncSource};
use crate::notifications::{NotificationBridge, NotificationCenter};
use crate::settings::ChatSettings;
use crate::state::ChatContext;

pub use polling::PollingFallback;
pub use realtime::{ListenerState, RealtimeListener};
pub use sender::ChatSender;
pub use store::ChatStore;

/// Ordered messages of one meeting, ascending by creation time.
pub type ChatStream = Vec<ChatMessage>;

const TRIGGER_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 64;

type Ack = oneshot::Sender<ChatResult<()>>;

/// Work items for the sync consumer.
#[derive(Debug)]
pub(crate) enum SyncTrigger {
    Insert(InsertEvent),
    PollTick(Option<Ack>),
    Refresh(Option<Ack>),
}

/// Everything the consumer needs to turn a trigger into a resync.
pub(crate) struct SyncPipeline {
    pub(crate) store: Arc<ChatStore>,
    pub(crate) bridge: NotificationBridge,
    pub(crate) directory: Arc<dyn ChatBackend>,
    pub(crate) local_user: UserId,
    pub(crate) anonymous_label: String,
    pub(crate) events: broadcast::Sender<ChatEvent>,
}

impl SyncPipeline {
    /// Full refetch into the store.
    pub(crate) async fn resync(&self, source: SyncSource) -> ChatResult<()> {
        match self.store.fetch().await {
            Ok(stream) => {
                emit_event(
                    &self.events,
                    ChatEvent::Synced {
                        source,
                        count: stream.len(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                emit_event(
                    &self.events,
                    ChatEvent::SyncFailed {
                        source,
                        error: e.to_string(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Resolve a display name through the user directory. Failures fall
    /// back to the anonymous label.
    pub(crate) async fn resolve_author(&self, user_id: UserId) -> Author {
        match self.directory.lookup_username(user_id).await {
            Ok(name) => Author::resolve(name, &self.anonymous_label),
            Err(e) => {
                let err = ChatError::DirectoryLookup(e.to_string());
                warn!(user = %user_id, error = %err, "Using anonymous author");
                Author::Anonymous(self.anonymous_label.clone())
            }
        }
    }

    pub(crate) fn is_foreign(&self, message_author: UserId) -> bool {
        message_author != self.local_user
    }
}

async fn run_sync_loop(pipeline: SyncPipeline, mut triggers: mpsc::Receiver<SyncTrigger>) {
    debug!(meeting = %pipeline.store.meeting_id(), "Chat sync loop started");

    while let Some(trigger) = triggers.recv().await {
        match trigger {
            SyncTrigger::Insert(event) => realtime::handle_insert(&pipeline, event).await,
            SyncTrigger::PollTick(ack) => {
                let result = polling::handle_tick(&pipeline).await;
                reply(ack, result);
            }
            SyncTrigger::Refresh(ack) => {
                let result = pipeline.resync(SyncSource::Refresh).await;
                reply(ack, result);
            }
        }
    }

    debug!(meeting = %pipeline.store.meeting_id(), "Chat sync loop ended");
}

fn reply(ack: Option<Ack>, result: ChatResult<()>) {
    if let Some(ack) = ack {
        let _ = ack.send(result);
    }
}

// ---------------------------------------------------------------------------
// UI-facing session
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Composer {
    draft: String,
    sending: bool,
    last_error: Option<ChatError>,
}

/// Snapshot of everything a chat screen renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub chats: ChatStream,
    pub draft: String,
    pub sending: bool,
    /// Whether the message input is enabled.
    pub can_send: bool,
    pub last_error: Option<String>,
    pub unread_count: u32,
}

/// An active meeting chat view.
///
/// Owns the realtime subscription, the poll timer and the sync consumer.
/// All three are torn down by [`deactivate`](Self::deactivate) or on drop.
pub struct MeetingChat {
    context: ChatContext,
    store: Arc<ChatStore>,
    sender: ChatSender,
    notifications: NotificationCenter,
    events: broadcast::Sender<ChatEvent>,
    composer: Mutex<Composer>,
    listener: RealtimeListener,
    poller: Option<PollingFallback>,
    triggers: Option<mpsc::Sender<SyncTrigger>>,
    consumer: Option<JoinHandle<()>>,
}

impl MeetingChat {
    /// Open a chat view.
    ///
    /// For participants this subscribes to the realtime feed, loads the
    /// stream and starts polling. A failed subscription is returned and
    /// nothing is left running. Non-participants get an inert view with the
    /// input disabled.
    pub async fn activate(
        backend: Arc<dyn ChatBackend>,
        notifications: NotificationCenter,
        context: ChatContext,
        settings: &ChatSettings,
    ) -> ChatResult<Self> {
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let store = Arc::new(ChatStore::new(
            backend.clone(),
            context.meeting_id,
            settings.anonymous_label.clone(),
        ));

        let mut chat = Self {
            context,
            store: store.clone(),
            sender: ChatSender::new(backend.clone()),
            notifications: notifications.clone(),
            events: events.clone(),
            composer: Mutex::new(Composer::default()),
            listener: RealtimeListener::new(backend.clone(), context.meeting_id),
            poller: None,
            triggers: None,
            consumer: None,
        };

        if !context.is_participant {
            info!(
                meeting = %context.meeting_id,
                user = %context.local_user,
                "Not a participant, chat stays inactive"
            );
            return Ok(chat);
        }

        let pipeline = SyncPipeline {
            store,
            bridge: NotificationBridge::new(
                notifications,
                settings.notifications_enabled,
                events,
            ),
            directory: backend,
            local_user: context.local_user,
            anonymous_label: settings.anonymous_label.clone(),
            events: chat.events.clone(),
        };

        let (trigger_tx, trigger_rx) = mpsc::channel(TRIGGER_QUEUE);
        chat.consumer = Some(tokio::spawn(run_sync_loop(pipeline, trigger_rx)));
        chat.triggers = Some(trigger_tx.clone());

        // On error `chat` is dropped here, which aborts the consumer.
        chat.listener.subscribe(trigger_tx.clone()).await?;

        if let Err(e) = chat.refresh().await {
            debug!(error = %e, "Initial chat load failed, polling will retry");
        }

        chat.poller = Some(PollingFallback::start(settings.poll_interval(), trigger_tx));

        info!(
            meeting = %context.meeting_id,
            user = %context.local_user,
            "Meeting chat active"
        );
        Ok(chat)
    }

    /// Stop the realtime subscription, the poll timer and the consumer.
    /// Idempotent.
    pub fn deactivate(&mut self) {
        let was_active = self.is_active();

        self.listener.unsubscribe();
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        self.triggers = None;
        if let Some(consumer) = self.consumer.take() {
            consumer.abort();
        }

        if was_active {
            info!(meeting = %self.context.meeting_id, "Meeting chat deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.consumer.is_some()
    }

    pub fn context(&self) -> ChatContext {
        self.context
    }

    fn composer(&self) -> MutexGuard<'_, Composer> {
        // Composer updates cannot leave it inconsistent; recover from poison.
        self.composer.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.composer().draft = text.into();
    }

    /// Send the current draft.
    ///
    /// Non-participants are stopped here and never reach [`ChatSender`].
    /// On success the draft is cleared; the message shows up once the
    /// realtime or poll path refetches. On failure the draft is kept and
    /// the error is exposed in [`ChatView::last_error`].
    pub async fn send(&self) -> ChatResult<()> {
        if !self.context.is_participant {
            return Err(ChatError::NotParticipant);
        }
        if !self.is_active() {
            return Err(ChatError::Validation("chat is not active".into()));
        }

        let text = {
            let mut composer = self.composer();
            if composer.sending {
                return Err(ChatError::Validation("a message is already being sent".into()));
            }
            composer.sending = true;
            composer.draft.clone()
        };

        let result = self
            .sender
            .send(self.context.meeting_id, self.context.local_user, &text)
            .await;

        let mut composer = self.composer();
        composer.sending = false;
        match &result {
            Ok(()) => {
                composer.draft.clear();
                composer.last_error = None;
            }
            Err(e) => {
                composer.last_error = Some(e.clone());
                emit_event(
                    &self.events,
                    ChatEvent::SendFailed {
                        error: e.to_string(),
                    },
                );
            }
        }
        result
    }

    /// Replace the draft with `text` and send it.
    pub async fn send_text(&self, text: impl Into<String>) -> ChatResult<()> {
        self.set_draft(text);
        self.send().await
    }

    /// Refetch the stream now.
    pub async fn refresh(&self) -> ChatResult<()> {
        self.request(SyncTrigger::Refresh).await
    }

    /// Run one polling fallback tick now.
    pub async fn poll_now(&self) -> ChatResult<()> {
        self.request(SyncTrigger::PollTick).await
    }

    async fn request(&self, make: fn(Option<Ack>) -> SyncTrigger) -> ChatResult<()> {
        let Some(triggers) = self.triggers.as_ref() else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        triggers
            .send(make(Some(ack_tx)))
            .await
            .map_err(|_| ChatError::RemoteQuery("chat sync loop stopped".into()))?;
        ack_rx
            .await
            .map_err(|_| ChatError::RemoteQuery("chat sync loop stopped".into()))?
    }

    fn can_send(&self) -> bool {
        self.context.is_participant && self.is_active()
    }

    pub fn view(&self) -> ChatView {
        let composer = self.composer();
        ChatView {
            chats: self.store.snapshot(),
            draft: composer.draft.clone(),
            sending: composer.sending,
            can_send: self.can_send(),
            last_error: composer.last_error.as_ref().map(ToString::to_string),
            unread_count: self.notifications.unread_count(),
        }
    }

    pub fn subscribe_chats(&self) -> watch::Receiver<ChatStream> {
        self.store.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn listener_state(&self) -> ListenerState {
        self.listener.state()
    }
}

impl Drop for MeetingChat {
    fn drop(&mut self) {
        self.deactivate();
    }
}
