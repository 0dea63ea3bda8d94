//! In-process [`ChatBackend`].
//!
//! Keeps chat rows, the user directory and participants in memory and
//! delivers inserts to subscribers the way the realtime service does. Each
//! operation can be made to fail, and calls are counted, so chat behaviour
//! can be exercised without a hosted project.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tracing::debug;

use moim_shared::{ChatRow, InsertEvent, MeetingId, MessageId, NewChat, UserId};

use crate::backend::{ChatBackend, Subscription, SubscriptionGuard};
use crate::error::{NetError, Result};

/// Per-operation call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetches: usize,
    pub inserts: usize,
    pub lookups: usize,
    pub subscribes: usize,
}

#[derive(Debug, Default)]
struct Failures {
    queries: bool,
    writes: bool,
    lookups: bool,
    subscribe: bool,
}

#[derive(Default)]
struct MemoryState {
    chats: Vec<InsertEvent>,
    users: HashMap<UserId, String>,
    participants: HashSet<(MeetingId, UserId)>,
    subscribers: HashMap<MeetingId, Vec<(u64, mpsc::Sender<InsertEvent>)>>,
    next_subscriber: u64,
    last_created: Option<DateTime<Utc>>,
    failures: Failures,
    calls: CallCounts,
}

impl MemoryState {
    /// Creation times are strictly increasing so ordering is stable.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_created {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_created = Some(now);
        now
    }

    fn broadcast(&mut self, event: &InsertEvent) {
        if let Some(subs) = self.subscribers.get_mut(&event.meeting_id) {
            subs.retain(|(_, tx)| !tx.is_closed());
            for (_, tx) in subs.iter() {
                if tx.try_send(event.clone()).is_err() {
                    debug!(msg_id = %event.id, "Memory subscriber full, insert dropped");
                }
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_user(&self, user_id: UserId, username: impl Into<String>) {
        self.state().users.insert(user_id, username.into());
    }

    pub fn add_participant(&self, meeting_id: MeetingId, user_id: UserId) {
        self.state().participants.insert((meeting_id, user_id));
    }

    /// Insert a row as another client would, notifying subscribers.
    pub fn post(&self, meeting_id: MeetingId, user_id: UserId, message: &str) -> InsertEvent {
        let mut state = self.state();
        let event = InsertEvent {
            id: MessageId::new(),
            meeting_id,
            user_id,
            message: message.to_string(),
            created_at: state.next_timestamp(),
        };
        state.chats.push(event.clone());
        state.broadcast(&event);
        event
    }

    /// Insert a row whose realtime event is lost.
    pub fn post_silently(&self, meeting_id: MeetingId, user_id: UserId, message: &str) -> InsertEvent {
        let mut state = self.state();
        let event = InsertEvent {
            id: MessageId::new(),
            meeting_id,
            user_id,
            message: message.to_string(),
            created_at: state.next_timestamp(),
        };
        state.chats.push(event.clone());
        event
    }

    /// Deliver an insert event again, as a duplicate delivery would.
    pub fn redeliver(&self, event: &InsertEvent) {
        self.state().broadcast(event);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state().failures.queries = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().failures.writes = fail;
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.state().failures.lookups = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state().failures.subscribe = fail;
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    /// Rows of a meeting in canonical order.
    pub fn rows(&self, meeting_id: MeetingId) -> Vec<ChatRow> {
        let state = self.state();
        let mut rows: Vec<ChatRow> = state
            .chats
            .iter()
            .filter(|c| c.meeting_id == meeting_id)
            .map(|c| ChatRow {
                id: c.id,
                meeting_id: c.meeting_id,
                user_id: c.user_id,
                message: c.message.clone(),
                created_at: c.created_at,
                username: state.users.get(&c.user_id).cloned(),
            })
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows
    }

    /// Number of open subscriptions on a meeting.
    pub fn active_subscriptions(&self, meeting_id: MeetingId) -> usize {
        self.state()
            .subscribers
            .get(&meeting_id)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn fetch_chats(&self, meeting_id: MeetingId) -> Result<Vec<ChatRow>> {
        {
            let mut state = self.state();
            state.calls.fetches += 1;
            if state.failures.queries {
                return Err(NetError::Unavailable("query failure injected".into()));
            }
        }
        Ok(self.rows(meeting_id))
    }

    async fn insert_chat(&self, chat: &NewChat) -> Result<()> {
        {
            let mut state = self.state();
            state.calls.inserts += 1;
            if state.failures.writes {
                return Err(NetError::Unavailable("write failure injected".into()));
            }
        }
        self.post(chat.meeting_id, chat.user_id, &chat.message);
        Ok(())
    }

    async fn lookup_username(&self, user_id: UserId) -> Result<Option<String>> {
        let mut state = self.state();
        state.calls.lookups += 1;
        if state.failures.lookups {
            return Err(NetError::Unavailable("lookup failure injected".into()));
        }
        Ok(state.users.get(&user_id).cloned())
    }

    async fn is_participant(&self, meeting_id: MeetingId, user_id: UserId) -> Result<bool> {
        Ok(self.state().participants.contains(&(meeting_id, user_id)))
    }

    async fn subscribe(&self, meeting_id: MeetingId) -> Result<Subscription> {
        let mut state = self.state();
        state.calls.subscribes += 1;
        if state.failures.subscribe {
            return Err(NetError::JoinRejected("subscribe failure injected".into()));
        }

        let (tx, rx) = mpsc::channel(256);
        let sub_id = state.next_subscriber;
        state.next_subscriber += 1;
        state
            .subscribers
            .entry(meeting_id)
            .or_default()
            .push((sub_id, tx));

        let inner = Arc::downgrade(&self.inner);
        let guard = SubscriptionGuard::new(meeting_id.to_topic(), move || {
            if let Some(inner) = inner.upgrade() {
                let mut state = inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(subs) = state.subscribers.get_mut(&meeting_id) {
                    subs.retain(|(id, _)| *id != sub_id);
                }
            }
        });

        Ok(Subscription::new(rx, guard))
    }
}
