//! Client configuration loaded from environment variables.

use std::path::PathBuf;

use moim_shared::{MeetingId, UserId};

/// Connection and identity settings for the terminal chat.
#[derive(Clone)]
pub struct ClientConfig {
    /// Project base URL.
    /// Env: `MOIM_URL`
    /// Default: `http://localhost:54321`
    pub base_url: String,

    /// Public API key sent with every request.
    /// Env: `MOIM_ANON_KEY`
    pub anon_key: String,

    /// Signed-in user's access token. Falls back to the anon key.
    /// Env: `MOIM_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Env: `MOIM_USER_ID`
    pub user_id: Option<UserId>,

    /// Env: `MOIM_MEETING_ID`
    pub meeting_id: Option<MeetingId>,

    /// Overrides the saved poll interval when set.
    /// Env: `MOIM_POLL_INTERVAL_SECS`
    pub poll_interval_secs: Option<u64>,

    /// Notification database file. Default: the platform data directory.
    /// Env: `MOIM_NOTIFICATIONS_DB`
    pub notifications_db: Option<PathBuf>,

    /// Overrides the saved anonymous author label when set.
    /// Env: `MOIM_ANONYMOUS_LABEL`
    pub anonymous_label: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            access_token: None,
            user_id: None,
            meeting_id: None,
            poll_interval_secs: None,
            notifications_db: None,
            anonymous_label: None,
        }
    }
}

// Keys stay out of logs.
impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("has_anon_key", &!self.anon_key.is_empty())
            .field("has_access_token", &self.access_token.is_some())
            .field("user_id", &self.user_id)
            .field("meeting_id", &self.meeting_id)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("notifications_db", &self.notifications_db)
            .field("anonymous_label", &self.anonymous_label)
            .finish()
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = non_empty(var("MOIM_URL")) {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(key) = var("MOIM_ANON_KEY") {
            config.anon_key = key;
        }

        config.access_token = non_empty(var("MOIM_ACCESS_TOKEN"));

        if let Some(val) = var("MOIM_USER_ID") {
            match val.trim().parse::<UserId>() {
                Ok(id) => config.user_id = Some(id),
                Err(_) => tracing::warn!(value = %val, "Invalid MOIM_USER_ID, ignoring"),
            }
        }

        if let Some(val) = var("MOIM_MEETING_ID") {
            match val.trim().parse::<MeetingId>() {
                Ok(id) => config.meeting_id = Some(id),
                Err(_) => tracing::warn!(value = %val, "Invalid MOIM_MEETING_ID, ignoring"),
            }
        }

        if let Some(val) = var("MOIM_POLL_INTERVAL_SECS") {
            match val.trim().parse::<u64>() {
                Ok(n) if n > 0 => config.poll_interval_secs = Some(n),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid MOIM_POLL_INTERVAL_SECS, using saved setting"
                ),
            }
        }

        config.notifications_db = non_empty(var("MOIM_NOTIFICATIONS_DB")).map(PathBuf::from);
        config.anonymous_label = non_empty(var("MOIM_ANONYMOUS_LABEL"));

        config
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
