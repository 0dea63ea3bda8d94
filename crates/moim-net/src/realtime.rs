//! Realtime channel client speaking the Phoenix websocket protocol.
//!
//! The socket runs in a dedicated tokio task. Callers talk to it through a
//! typed command channel; inserts observed on a joined topic are routed to
//! that topic's subscriber channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use moim_shared::constants::{CHAT_TABLE, DB_SCHEMA, REALTIME_HEARTBEAT};
use moim_shared::{InsertEvent, MeetingId};

use crate::backend::{Subscription, SubscriptionGuard};
use crate::error::{NetError, Result};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSCRIBER_BUFFER: usize = 256;

// ---------------------------------------------------------------------------
// Wire frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl PhoenixMessage {
    fn new(topic: &str, event: &str, payload: Value, msg_ref: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Commands sent *into* the realtime task.
#[derive(Debug)]
pub enum RealtimeCommand {
    /// Join a channel topic; inserts are forwarded to `events` once the
    /// server acknowledges the join.
    Join {
        topic: String,
        join_ref: String,
        payload: Value,
        events: mpsc::Sender<InsertEvent>,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Leave the join identified by `join_ref`. Ignored if a newer join
    /// has taken over the topic.
    Leave { topic: String, join_ref: String },
    /// Close the socket.
    Shutdown,
}

struct PendingJoin {
    topic: String,
    events: mpsc::Sender<InsertEvent>,
    reply: oneshot::Sender<Result<()>>,
}

/// The join currently receiving a topic's inserts.
struct ActiveTopic {
    join_ref: String,
    events: mpsc::Sender<InsertEvent>,
}

/// Message refs are unique per socket, shared by the client handle and the
/// event loop.
fn next_ref(refs: &AtomicU64) -> String {
    (refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
}

/// Handle to a running realtime socket.
#[derive(Clone)]
pub struct RealtimeClient {
    cmd_tx: mpsc::Sender<RealtimeCommand>,
    access_token: String,
    refs: Arc<AtomicU64>,
    join_timeout: Duration,
}

impl RealtimeClient {
    /// Open the websocket at `url` and spawn its event loop.
    pub async fn connect(url: &str, access_token: impl Into<String>) -> Result<Self> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| NetError::WebSocket(e.to_string()))?;

        info!("Realtime socket connected");

        let refs = Arc::new(AtomicU64::new(0));
        let (cmd_tx, cmd_rx) = mpsc::channel::<RealtimeCommand>(256);
        tokio::spawn(event_loop(ws_stream, cmd_rx, refs.clone()));

        Ok(Self {
            cmd_tx,
            access_token: access_token.into(),
            refs,
            join_timeout: JOIN_TIMEOUT,
        })
    }

    /// How long [`subscribe`](Self::subscribe) waits for the server's reply.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Subscribe to inserts on a meeting's chat rows.
    ///
    /// Resolves once the server has acknowledged the join, or fails with
    /// the rejection / a timeout. No retry is attempted. A timed-out join is
    /// left so a late acknowledgement cannot leave it open.
    pub async fn subscribe(&self, meeting_id: MeetingId) -> Result<Subscription> {
        let topic = channel_topic(meeting_id);
        let join_ref = next_ref(&self.refs);
        let (events_tx, events_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (reply_tx, reply_rx) = oneshot::channel();

        self.cmd_tx
            .send(RealtimeCommand::Join {
                topic: topic.clone(),
                join_ref: join_ref.clone(),
                payload: join_payload(meeting_id, &self.access_token),
                events: events_tx,
                reply: reply_tx,
            })
            .await
            .map_err(|_| NetError::ChannelClosed)?;

        match tokio::time::timeout(self.join_timeout, reply_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(NetError::ChannelClosed),
            Err(_) => {
                warn!(topic = %topic, join_ref = %join_ref, "Join timed out, abandoning");
                let _ = self
                    .cmd_tx
                    .try_send(RealtimeCommand::Leave { topic, join_ref });
                return Err(NetError::JoinTimeout);
            }
        }

        info!(topic = %topic, join_ref = %join_ref, "Realtime channel joined");

        let cmd_tx = self.cmd_tx.clone();
        let leave_topic = topic.clone();
        let guard = SubscriptionGuard::new(topic, move || {
            if cmd_tx
                .try_send(RealtimeCommand::Leave {
                    topic: leave_topic,
                    join_ref,
                })
                .is_err()
            {
                debug!("Realtime task gone, nothing to leave");
            }
        });

        Ok(Subscription::new(events_rx, guard))
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RealtimeCommand::Shutdown).await;
    }
}

/// Full channel topic for a meeting's chat feed.
pub fn channel_topic(meeting_id: MeetingId) -> String {
    format!("realtime:{}", meeting_id.to_topic())
}

fn join_payload(meeting_id: MeetingId, access_token: &str) -> Value {
    json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": "INSERT",
                "schema": DB_SCHEMA,
                "table": CHAT_TABLE,
                "filter": format!("meeting_id=eq.{}", meeting_id),
            }],
        },
        "access_token": access_token,
    })
}

/// Extract an insert from a `postgres_changes` payload.
fn decode_insert(payload: &Value) -> Option<InsertEvent> {
    let data = payload.get("data").unwrap_or(payload);
    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)?;
    if kind != "INSERT" {
        return None;
    }
    let record = data.get("record").or_else(|| data.get("new"))?;
    match serde_json::from_value::<InsertEvent>(record.clone()) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "Undecodable realtime insert record");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn event_loop<S>(
    ws_stream: S,
    mut cmd_rx: mpsc::Receiver<RealtimeCommand>,
    refs: Arc<AtomicU64>,
) where
    S: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut writer, mut reader) = ws_stream.split();
    let mut heartbeat = tokio::time::interval(REALTIME_HEARTBEAT);
    let mut pending: HashMap<String, PendingJoin> = HashMap::new();
    let mut topics: HashMap<String, ActiveTopic> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(RealtimeCommand::Join { topic, join_ref, payload, events, reply }) => {
                        let mut frame = PhoenixMessage::new(&topic, "phx_join", payload, join_ref.clone());
                        frame.join_ref = Some(join_ref.clone());
                        if let Err(e) = send_frame(&mut writer, &frame).await {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                        debug!(topic = %topic, join_ref = %join_ref, "Join sent");
                        pending.insert(join_ref, PendingJoin { topic, events, reply });
                    }
                    Some(RealtimeCommand::Leave { topic, join_ref }) => {
                        if !release_join(&topic, &join_ref, &mut pending, &mut topics) {
                            debug!(topic = %topic, join_ref = %join_ref, "Stale leave ignored");
                            continue;
                        }
                        let mut frame = PhoenixMessage::new(&topic, "phx_leave", json!({}), next_ref(&refs));
                        frame.join_ref = Some(join_ref);
                        if let Err(e) = send_frame(&mut writer, &frame).await {
                            warn!(topic = %topic, error = %e, "Leave failed");
                        }
                    }
                    Some(RealtimeCommand::Shutdown) => {
                        info!("Realtime shutdown requested");
                        let _ = writer.send(Message::Close(None)).await;
                        break;
                    }
                    None => {
                        info!("Command channel closed, shutting down realtime socket");
                        break;
                    }
                }
            }

            frame = reader.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &mut pending, &mut topics);
                    }
                    Some(Ok(Message::Close(reason))) => {
                        warn!(reason = ?reason, "Realtime socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Realtime socket error");
                        break;
                    }
                    None => {
                        warn!("Realtime socket ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                let frame = PhoenixMessage::new("phoenix", "heartbeat", json!({}), next_ref(&refs));
                if let Err(e) = send_frame(&mut writer, &frame).await {
                    error!(error = %e, "Heartbeat failed");
                    break;
                }
            }
        }
    }

    for (_, join) in pending.drain() {
        let _ = join.reply.send(Err(NetError::ChannelClosed));
    }

    info!(open_topics = topics.len(), "Realtime event loop terminated");
}

async fn send_frame<W>(writer: &mut W, frame: &PhoenixMessage) -> Result<()>
where
    W: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    writer
        .send(Message::Text(text))
        .await
        .map_err(|e| NetError::WebSocket(e.to_string()))
}

/// Drop the bookkeeping of one join. Returns whether the server should be
/// sent a `phx_leave` for it: true when the join is still the topic's
/// current one, or when it was abandoned before any join took the topic.
fn release_join(
    topic: &str,
    join_ref: &str,
    pending: &mut HashMap<String, PendingJoin>,
    topics: &mut HashMap<String, ActiveTopic>,
) -> bool {
    let abandoned = pending.remove(join_ref).is_some();
    match topics.get(topic) {
        Some(active) if active.join_ref == join_ref => {
            topics.remove(topic);
            true
        }
        Some(_) => false,
        None => abandoned,
    }
}

fn handle_frame(
    text: &str,
    pending: &mut HashMap<String, PendingJoin>,
    topics: &mut HashMap<String, ActiveTopic>,
) {
    let frame: PhoenixMessage = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable realtime frame");
            return;
        }
    };

    match frame.event.as_str() {
        "phx_reply" => {
            let Some((join_ref, join)) = frame
                .msg_ref
                .as_ref()
                .and_then(|r| pending.remove_entry(r))
            else {
                return;
            };
            let status = frame.payload.get("status").and_then(Value::as_str);
            if status == Some("ok") {
                topics.insert(
                    join.topic,
                    ActiveTopic {
                        join_ref,
                        events: join.events,
                    },
                );
                let _ = join.reply.send(Ok(()));
            } else {
                let response = frame
                    .payload
                    .get("response")
                    .map(Value::to_string)
                    .unwrap_or_default();
                warn!(topic = %join.topic, response = %response, "Join rejected");
                let _ = join.reply.send(Err(NetError::JoinRejected(response)));
            }
        }

        "postgres_changes" | "INSERT" => {
            let Some(active) = topics.get(&frame.topic) else {
                debug!(topic = %frame.topic, "Change on unknown topic");
                return;
            };
            let Some(event) = decode_insert(&frame.payload) else {
                return;
            };
            match active.events.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(event)) => {
                    // The poll tick resyncs whatever is dropped here.
                    warn!(topic = %frame.topic, msg_id = %event.id, "Subscriber lagging, insert dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    topics.remove(&frame.topic);
                }
            }
        }

        "phx_error" | "phx_close" => {
            // A close for an older join must not end the one that replaced it.
            let current = topics.get(&frame.topic).is_some_and(|active| {
                frame
                    .join_ref
                    .as_ref()
                    .map_or(true, |r| *r == active.join_ref)
            });
            if current {
                warn!(topic = %frame.topic, event = %frame.event, "Channel closed by server");
                topics.remove(&frame.topic);
            } else {
                debug!(topic = %frame.topic, event = %frame.event, "Close for a replaced join ignored");
            }
        }

        other => {
            debug!(topic = %frame.topic, event = other, "Unhandled realtime event");
        }
    }
}
