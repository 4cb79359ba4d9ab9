use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by platform adapters.
///
/// The split matters to callers: auth-kind errors mean the guardian has to
/// reconnect the account, transient errors mean "try again with a new job",
/// and neither is ever retried inside one enforcement pass.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("Vendor unavailable: {0}")]
    Unavailable(String),

    #[error("Vendor rejected request ({status}): {body}")]
    Vendor { status: StatusCode, body: String },

    #[error("Not found on vendor: {0}")]
    NotFound(String),

    #[error("Not supported by this platform: {0}")]
    Unsupported(String),

    #[error("Unexpected vendor response: {0}")]
    Decode(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl AdapterError {
    /// Credential is wrong or absent; needs guardian action.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::InvalidCredentials(_) | Self::MissingCredential(_))
    }

    /// Timeout, connection failure or 5xx; a later job may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::Unavailable(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.is_builder() {
            Self::Client(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status, e.to_string())
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}

impl AdapterError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::InvalidCredentials(body),
            StatusCode::NOT_FOUND => Self::NotFound(body),
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                Self::Unavailable(format!("{}: {}", status, body))
            }
            s if s.is_server_error() => Self::Unavailable(format!("{}: {}", status, body)),
            _ => Self::Vendor { status, body },
        }
    }
}
