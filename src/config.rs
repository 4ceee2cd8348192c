use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::logger::MessageLogMode;
use crate::{Error, Result};

pub const MIN_POLL_INTERVAL_SECS: u64 = 30;
pub const MAX_POLL_INTERVAL_SECS: u64 = 86_400;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_PAUSE_WINDOW_SECS: u64 = 5;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogConfig {
    pub mode: MessageLogMode,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub base_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    /// Sent with every API request.
    pub headers: BTreeMap<String, String>,
    pub poll_interval_secs: u64,
    /// Anti-race gate: poll cycles are skipped this long after any local write.
    pub pause_window_secs: u64,
    pub request_timeout_secs: u64,
    pub message_log: Option<MessageLogConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: None,
            headers: BTreeMap::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            pause_window_secs: DEFAULT_PAUSE_WINDOW_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            message_log: None,
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Missing credentials or endpoints are fatal at startup.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("baseUrl", &self.base_url),
            ("tokenUrl", &self.token_url),
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!("missing {}", missing.join(", "))));
        }
        for (name, url) in [("baseUrl", &self.base_url), ("tokenUrl", &self.token_url)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!("{name} is not an http(s) URL: {url}")));
            }
        }
        Ok(())
    }

    pub fn pause_window(&self) -> Duration {
        Duration::from_secs(self.pause_window_secs)
    }
}

pub fn clamp_poll_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS))
}
