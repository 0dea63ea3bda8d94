//! PostgREST client for the hosted database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use moim_shared::constants::{
    CHAT_TABLE, PARTICIPANTS_TABLE, PARTICIPANT_APPROVED, REALTIME_VSN, USERS_TABLE,
};
use moim_shared::{ChatRow, MeetingId, MessageId, NewChat, UserId};

use crate::backend::{ChatBackend, Subscription};
use crate::error::{NetError, Result};
use crate::realtime::RealtimeClient;

const CHAT_SELECT: &str = "id,meeting_id,user_id,message,created_at,author:users(username)";

/// Connection settings for the hosted backend.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL, e.g. `https://abc.supabase.co`
    pub base_url: String,
    /// Public (anon) API key
    pub anon_key: String,
    /// Session access token of the signed-in user
    pub access_token: Option<String>,
}

impl RestConfig {
    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url.trim_end_matches('/'), table)
    }

    /// Websocket endpoint of the realtime service.
    pub fn realtime_url(&self) -> Result<String> {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(NetError::InvalidUrl(format!(
                "base_url must start with http:// or https://, got {base}"
            )));
        };
        Ok(format!(
            "{ws_base}/realtime/v1/websocket?apikey={}&vsn={REALTIME_VSN}",
            self.anon_key
        ))
    }

    fn bearer(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }
}

#[derive(Debug, Deserialize)]
struct AuthorJoin {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestChatRow {
    id: MessageId,
    meeting_id: MeetingId,
    user_id: UserId,
    message: String,
    created_at: DateTime<Utc>,
    author: Option<AuthorJoin>,
}

impl From<RestChatRow> for ChatRow {
    fn from(row: RestChatRow) -> Self {
        Self {
            id: row.id,
            meeting_id: row.meeting_id,
            user_id: row.user_id,
            message: row.message,
            created_at: row.created_at,
            username: row.author.and_then(|a| a.username),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UsernameRow {
    username: Option<String>,
}

/// [`ChatBackend`] over PostgREST plus the realtime websocket.
pub struct RestBackend {
    http: Client,
    config: RestConfig,
    realtime: RealtimeClient,
}

impl RestBackend {
    /// Build the HTTP client and open the realtime socket.
    pub async fn connect(config: RestConfig) -> Result<Self> {
        let realtime = RealtimeClient::connect(&config.realtime_url()?, config.bearer()).await?;
        Ok(Self {
            http: Client::new(),
            config,
            realtime,
        })
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.config.anon_key)
            .bearer_auth(self.config.bearer())
    }

    async fn get_rows<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let url = self.config.table_url(table);
        let resp = self
            .authorized(self.http.get(&url))
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(NetError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn shutdown(&self) {
        self.realtime.shutdown().await;
    }
}

#[async_trait]
impl ChatBackend for RestBackend {
    async fn fetch_chats(&self, meeting_id: MeetingId) -> Result<Vec<ChatRow>> {
        let rows: Vec<RestChatRow> = self
            .get_rows(
                CHAT_TABLE,
                &[
                    ("select", CHAT_SELECT.to_string()),
                    ("meeting_id", format!("eq.{meeting_id}")),
                    ("order", "created_at.asc".to_string()),
                ],
            )
            .await?;
        debug!(meeting = %meeting_id, count = rows.len(), "Fetched chat rows");
        Ok(rows.into_iter().map(ChatRow::from).collect())
    }

    async fn insert_chat(&self, chat: &NewChat) -> Result<()> {
        let url = self.config.table_url(CHAT_TABLE);
        let resp = self
            .authorized(self.http.post(&url))
            .header("Prefer", "return=minimal")
            .json(chat)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NetError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn lookup_username(&self, user_id: UserId) -> Result<Option<String>> {
        let rows: Vec<UsernameRow> = self
            .get_rows(
                USERS_TABLE,
                &[
                    ("select", "username".to_string()),
                    ("id", format!("eq.{user_id}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|r| r.username))
    }

    async fn is_participant(&self, meeting_id: MeetingId, user_id: UserId) -> Result<bool> {
        let rows: Vec<serde_json::Value> = self
            .get_rows(
                PARTICIPANTS_TABLE,
                &[
                    ("select", "user_id".to_string()),
                    ("meeting_id", format!("eq.{meeting_id}")),
                    ("user_id", format!("eq.{user_id}")),
                    ("status", format!("eq.{PARTICIPANT_APPROVED}")),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn subscribe(&self, meeting_id: MeetingId) -> Result<Subscription> {
        self.realtime.subscribe(meeting_id).await
    }
}
