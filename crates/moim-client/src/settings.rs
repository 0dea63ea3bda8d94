use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use moim_shared::constants::{ANONYMOUS_LABEL, POLL_INTERVAL};
use moim_store::{Database, StoreError};

/// User-tunable chat behaviour, persisted in the local database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Polling fallback period in seconds.
    pub poll_interval_secs: u64,
    /// Shown when an author's name cannot be resolved.
    pub anonymous_label: String,
    pub notifications_enabled: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: POLL_INTERVAL.as_secs(),
            anonymous_label: ANONYMOUS_LABEL.to_string(),
            notifications_enabled: true,
        }
    }
}

impl ChatSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Load saved settings, falling back to defaults on absence or corruption.
    pub fn load(db: &Database) -> Self {
        match db.load_settings_json() {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!(error = %e, "Corrupt settings JSON, using defaults");
                    Self::default()
                }
            },
            Ok(None) => Self::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read settings, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, db: &Database) -> Result<(), StoreError> {
        db.save_settings_json(&serde_json::to_string(self)?)?;
        info!(poll_secs = self.poll_interval_secs, "Settings saved");
        Ok(())
    }
}
