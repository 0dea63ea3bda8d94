use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use moim_net::ChatBackend;
use moim_shared::{ChatError, ChatMessage, ChatResult, ChatRow, MeetingId, MessageId};

use super::ChatStream;

/// Canonical ordered message list of one meeting.
///
/// Only ever replaced wholesale by a fetch result. The current value lives
/// in a `watch` channel: it is what the UI renders, and it is the reference
/// the polling diff reads, so both always see the latest replacement.
pub struct ChatStore {
    backend: Arc<dyn ChatBackend>,
    meeting_id: MeetingId,
    anonymous_label: String,
    rendered: watch::Sender<ChatStream>,
}

impl ChatStore {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        meeting_id: MeetingId,
        anonymous_label: impl Into<String>,
    ) -> Self {
        let (rendered, _) = watch::channel(Vec::new());
        Self {
            backend,
            meeting_id,
            anonymous_label: anonymous_label.into(),
            rendered,
        }
    }

    pub fn meeting_id(&self) -> MeetingId {
        self.meeting_id
    }

    /// Read the full remote list without touching the local stream.
    pub async fn load(&self) -> ChatResult<ChatStream> {
        let rows = self
            .backend
            .fetch_chats(self.meeting_id)
            .await
            .map_err(|e| ChatError::RemoteQuery(e.to_string()))?;
        Ok(normalize(rows, &self.anonymous_label))
    }

    /// Fetch the remote list and replace the local stream with it.
    ///
    /// On failure the previous stream is kept as-is.
    pub async fn fetch(&self) -> ChatResult<ChatStream> {
        match self.load().await {
            Ok(stream) => {
                self.replace(stream.clone());
                Ok(stream)
            }
            Err(e) => {
                warn!(meeting = %self.meeting_id, error = %e, "Chat fetch failed, keeping stale stream");
                Err(e)
            }
        }
    }

    pub fn replace(&self, stream: ChatStream) {
        debug!(meeting = %self.meeting_id, count = stream.len(), "Chat stream replaced");
        self.rendered.send_replace(stream);
    }

    pub fn snapshot(&self) -> ChatStream {
        self.rendered.borrow().clone()
    }

    /// Ids of the most recently rendered stream.
    pub fn rendered_ids(&self) -> HashSet<MessageId> {
        self.rendered.borrow().iter().map(|m| m.id).collect()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatStream> {
        self.rendered.subscribe()
    }
}

/// Resolve authors, order by creation time (ties by id) and drop repeated ids.
fn normalize(rows: Vec<ChatRow>, anonymous_label: &str) -> ChatStream {
    let mut stream: Vec<ChatMessage> = rows
        .into_iter()
        .map(|row| row.into_message(anonymous_label))
        .collect();
    stream.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut seen = HashSet::with_capacity(stream.len());
    stream.retain(|m| seen.insert(m.id));
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use moim_net::MemoryBackend;
    use moim_shared::{Author, UserId};

    fn row(id: MessageId, secs: i64, username: Option<&str>) -> ChatRow {
        ChatRow {
            id,
            meeting_id: MeetingId::new(),
            user_id: UserId::new(),
            message: format!("m{secs}"),
            created_at: Utc::now() + Duration::seconds(secs),
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn test_normalize_orders_and_dedups() {
        let (a, b) = (MessageId::new(), MessageId::new());
        let rows = vec![row(b, 2, Some("b")), row(a, 1, None), row(b, 2, Some("b"))];
        let stream = normalize(rows, "익명");
        assert_eq!(stream.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a, b]);
        assert_eq!(stream[0].author, Author::Anonymous("익명".into()));
        assert_eq!(stream[1].author, Author::Known("b".into()));
    }

    #[tokio::test]
    async fn test_fetch_replaces_stream() {
        let backend = MemoryBackend::new();
        let meeting = MeetingId::new();
        let store = ChatStore::new(Arc::new(backend.clone()), meeting, "익명");
        let mut rx = store.subscribe();

        backend.post(meeting, UserId::new(), "hello");
        let fetched = store.fetch().await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);
        assert_eq!(store.rendered_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_stream() {
        let backend = MemoryBackend::new();
        let meeting = MeetingId::new();
        let store = ChatStore::new(Arc::new(backend.clone()), meeting, "익명");

        backend.post(meeting, UserId::new(), "kept");
        store.fetch().await.unwrap();

        backend.fail_queries(true);
        backend.post(meeting, UserId::new(), "unseen");
        let err = store.fetch().await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteQuery(_)));
        assert_eq!(store.snapshot().len(), 1);
        assert_eq!(store.snapshot()[0].message, "kept");
    }

    #[tokio::test]
    async fn test_load_does_not_replace() {
        let backend = MemoryBackend::new();
        let meeting = MeetingId::new();
        let store = ChatStore::new(Arc::new(backend.clone()), meeting, "익명");
        backend.post(meeting, UserId::new(), "fresh");

        assert_eq!(store.load().await.unwrap().len(), 1);
        assert!(store.snapshot().is_empty());
    }
}
