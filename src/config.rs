//! Client configuration from the environment

use crate::runtime::DEFAULT_ASK_TIMEOUT;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_USER_ID: &str = "local-user";

/// Where conversations and exchanges live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryBackend {
    /// The QueryMind HTTP service
    #[default]
    Remote,
    /// The local SQLite database
    Local,
}

impl HistoryBackend {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "remote" => Some(Self::Remote),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Configuration for the chat client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_url: String,
    pub user_id: String,
    pub ask_timeout: Duration,
    pub db_path: PathBuf,
    pub history: HistoryBackend,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let ask_timeout = lookup("QUERYMIND_ASK_TIMEOUT_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_ASK_TIMEOUT, Duration::from_secs);

        let history = match lookup("QUERYMIND_HISTORY") {
            Some(value) => HistoryBackend::parse(&value).unwrap_or_else(|| {
                tracing::warn!(value = %value, "Unknown QUERYMIND_HISTORY, using remote");
                HistoryBackend::Remote
            }),
            None => HistoryBackend::default(),
        };

        let db_path = lookup("QUERYMIND_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".querymind").join("querymind.db")
            },
            PathBuf::from,
        );

        Self {
            api_url: lookup("QUERYMIND_API_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_id: lookup("QUERYMIND_USER_ID")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            ask_timeout,
            db_path,
            history,
        }
    }
}
