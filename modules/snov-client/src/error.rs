use thiserror::Error;

pub type Result<T> = std::result::Result<T, SnovError>;

#[derive(Debug, Error)]
pub enum SnovError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for SnovError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SnovError::Timeout(err.to_string())
        } else {
            SnovError::Network(err.to_string())
        }
    }
}
