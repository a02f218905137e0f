pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::Config;
pub use error::{
    CollectionError, CollectionErrorKind, EnrichmentError, FetchError, MalformedItem, SinkError,
    Web3ScoutError,
};
pub use retry::{RetryPolicy, Transient};
pub use types::*;
