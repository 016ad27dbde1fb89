//! Harvest HH - vacancy harvester for the hh.ru API
//!
//! This crate walks a range of vacancy ids, keeps the records that match a
//! publication window and a professional-role category, and appends them
//! to JSONL with a resumable checkpoint.

pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod filter;
pub mod runner;
pub mod search;
pub mod stats;
pub mod taxonomy;

// Re-exports
pub use api::{FetchResult, HhApi, RateLimitedClient, RecordApi};
pub use auth::{AuthError, Credential, HhTokenEndpoint, TokenEndpoint, TokenManager, TokenStore};
pub use config::{Config, Endpoints};
pub use engine::{EngineError, FetchEngine, FetchOutcome};
pub use filter::{Classification, DateWindow, RecordFilter, RejectReason};
pub use runner::{run, run_search_window, token_manager};
pub use stats::Summary;
