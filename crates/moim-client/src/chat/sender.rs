use std::sync::Arc;

use tracing::{info, warn};

use moim_net::ChatBackend;
use moim_shared::{ChatError, ChatResult, MeetingId, NewChat, UserId};

/// Validates and writes outgoing chat messages.
///
/// Never touches the local stream; the sent row arrives through the
/// realtime or poll path like any other insert.
#[derive(Clone)]
pub struct ChatSender {
    backend: Arc<dyn ChatBackend>,
}

impl ChatSender {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn send(&self, meeting_id: MeetingId, user_id: UserId, text: &str) -> ChatResult<()> {
        let message = text.trim();
        if message.is_empty() {
            return Err(ChatError::Validation("message is empty".into()));
        }

        let chat = NewChat {
            meeting_id,
            user_id,
            message: message.to_string(),
        };
        self.backend.insert_chat(&chat).await.map_err(|e| {
            warn!(meeting = %meeting_id, error = %e, "Chat insert failed");
            ChatError::RemoteWrite(e.to_string())
        })?;

        info!(meeting = %meeting_id, len = message.chars().count(), "Chat message sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use moim_net::MemoryBackend;

    #[tokio::test]
    async fn test_blank_text_never_reaches_backend() {
        let backend = MemoryBackend::new();
        let sender = ChatSender::new(Arc::new(backend.clone()));

        for text in ["", "   ", "\n\t "] {
            let err = sender.send(MeetingId::new(), UserId::new(), text).await.unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }
        assert_eq!(backend.calls().inserts, 0);
    }

    #[tokio::test]
    async fn test_sends_trimmed_text() {
        let backend = MemoryBackend::new();
        let sender = ChatSender::new(Arc::new(backend.clone()));
        let meeting = MeetingId::new();

        sender.send(meeting, UserId::new(), "  안녕하세요 \n").await.unwrap();
        let rows = backend.rows(meeting);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "안녕하세요");
    }

    #[tokio::test]
    async fn test_write_failure_is_remote_write() {
        let backend = MemoryBackend::new();
        backend.fail_writes(true);
        let sender = ChatSender::new(Arc::new(backend.clone()));

        let err = sender.send(MeetingId::new(), UserId::new(), "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteWrite(_)));
        assert_eq!(backend.calls().inserts, 1);
    }
}
