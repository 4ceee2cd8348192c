use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or unusable startup configuration. Polling never starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// Token endpoint unconfigured, unreachable or rejecting the credentials.
    #[error("authorization failed: {0}")]
    Auth(String),

    /// Non-success answer from the vendor API. The body is kept for logging.
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Rejected local write intent; nothing was sent.
    #[error("invalid write: {0}")]
    Validation(String),

    /// The write-intent consumer has stopped.
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Api { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
