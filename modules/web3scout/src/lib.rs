pub mod aggregator;
pub mod cancel;
pub mod collectors;
pub mod dedup;
pub mod enrichment;
pub mod fetch;
pub mod health;
pub mod orchestrator;
pub mod pacing;
pub mod sink;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use aggregator::{Aggregator, CollectPreview};
pub use cancel::CancelFlag;
pub use stats::{RunResult, RunStatus};
