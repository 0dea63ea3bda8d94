//! # moim-chat
//!
//! Terminal client for one meeting's live chat.
//!
//! Lines typed on stdin are sent as chat messages. Commands:
//! - `/refresh` refetch the stream now
//! - `/read` mark every notification read
//! - `/view` print the current view as JSON
//! - `/quit` leave (Ctrl+C works too)

mod config;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use moim_client::{ChatContext, ChatEvent, ChatSettings, MeetingChat, NotificationCenter};
use moim_net::{ChatBackend, RestBackend, RestConfig};
use moim_shared::{ChatMessage, MessageId};
use moim_store::Database;

use crate::config::ClientConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing to stderr; stdout carries the chat
    // -----------------------------------------------------------------------
    moim_client::init_tracing();

    info!("Starting moim-chat v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration and local state
    // -----------------------------------------------------------------------
    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let user_id = config.user_id.context("MOIM_USER_ID is required")?;
    let meeting_id = config.meeting_id.context("MOIM_MEETING_ID is required")?;

    let db = match &config.notifications_db {
        Some(path) => Database::open_at(path),
        None => Database::new(),
    }
    .context("Failed to open local database")?;

    let mut settings = ChatSettings::load(&db);
    if let Some(secs) = config.poll_interval_secs {
        settings.poll_interval_secs = secs;
    }
    if let Some(label) = &config.anonymous_label {
        settings.anonymous_label = label.clone();
    }

    let center = NotificationCenter::new(db).context("Failed to load notifications")?;

    // -----------------------------------------------------------------------
    // 3. Backend and chat
    // -----------------------------------------------------------------------
    let backend = Arc::new(
        RestBackend::connect(RestConfig {
            base_url: config.base_url.clone(),
            anon_key: config.anon_key.clone(),
            access_token: config.access_token.clone(),
        })
        .await
        .context("Failed to connect to backend")?,
    );

    let is_participant = match backend.is_participant(meeting_id, user_id).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Participant check failed, chat disabled");
            false
        }
    };

    let mut chat = MeetingChat::activate(
        backend.clone(),
        center.clone(),
        ChatContext::new(meeting_id, user_id, is_participant),
        &settings,
    )
    .await?;

    if !is_participant {
        println!("-- you are not an approved participant of this meeting; chat is disabled --");
    }

    // -----------------------------------------------------------------------
    // 4. Drive the chat until /quit or Ctrl+C
    // -----------------------------------------------------------------------
    let mut printed: HashSet<MessageId> = HashSet::new();
    print_new(&mut printed, &chat.view().chats);

    let mut chats = chat.subscribe_chats();
    let mut events = chat.subscribe_events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&chat, &center, line.trim()).await {
                    break;
                }
            }
            changed = chats.changed() => {
                if changed.is_err() {
                    break;
                }
                let stream = chats.borrow_and_update().clone();
                print_new(&mut printed, &stream);
            }
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Chat events lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    chat.deactivate();
    backend.shutdown().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(chat: &MeetingChat, center: &NotificationCenter, line: &str) -> bool {
    match line {
        "/quit" => return false,
        "/refresh" => {
            if let Err(e) = chat.refresh().await {
                eprintln!("!! refresh failed: {e}");
            }
        }
        "/read" => match center.mark_all_read() {
            Ok(n) => println!("-- {n} notification(s) marked read --"),
            Err(e) => eprintln!("!! {e}"),
        },
        "/view" => match serde_json::to_string_pretty(&chat.view()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("!! {e}"),
        },
        "" => {}
        text => {
            if let Err(e) = chat.send_text(text).await {
                eprintln!("!! not sent: {e}");
            }
        }
    }
    true
}

fn print_new(printed: &mut HashSet<MessageId>, stream: &[ChatMessage]) {
    for message in stream {
        if printed.insert(message.id) {
            println!(
                "[{}] {}: {}",
                message.created_at.format("%H:%M"),
                message.author.display_name(),
                message.message
            );
        }
    }
}

fn print_event(event: &ChatEvent) {
    match event {
        ChatEvent::Notified { notification } => {
            println!("** {} ({}) **", notification.title, notification.message);
        }
        ChatEvent::SyncFailed { source, error } => {
            eprintln!("!! sync ({source:?}) failed: {error}");
        }
        ChatEvent::SendFailed { .. } | ChatEvent::Synced { .. } => {}
    }
}
