//! Harvest Core - Common infrastructure for ID-addressed API harvesting
//!
//! This crate provides reusable components for long-running fetch runs:
//! shutdown handling, the shared HTTP runtime, retry policy, checkpointing
//! of processed IDs, and append-only JSONL output.

pub mod checkpoint;
pub mod error;
pub mod logging;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod stream;
pub mod work_queue;

// Re-exports for convenience
pub use checkpoint::{CandidateId, CheckpointStore};
pub use error::HttpError;
pub use logging::{IndicatifLogger, init_logging};
pub use progress::{ProgressContext, SharedProgress};
pub use retry::RetryPolicy;
pub use shutdown::Shutdown;
pub use sink::{JsonlSink, cleanup_tmp_file, write_atomic};
pub use stream::{HttpConfig, SHARED_RUNTIME, http_client, http_config, set_http_config};
pub use work_queue::WorkQueue;
