use thiserror::Error;

pub type Result<T> = std::result::Result<T, HunterError>;

#[derive(Debug, Error)]
pub enum HunterError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),
}

impl HunterError {
    /// HTTP status for API errors, `None` for transport and parse failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            HunterError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HunterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HunterError::Timeout(err.to_string())
        } else if err.is_decode() {
            HunterError::Parse(err.to_string())
        } else {
            HunterError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for HunterError {
    fn from(err: serde_json::Error) -> Self {
        HunterError::Parse(err.to_string())
    }
}
