//! Botcast - post once, reach every network a bot lives on
//!
//! This library fans a single post out to a bot's configured social network
//! destinations, keeps a durable history of what happened on each, and
//! supports replying in batches to another account's recent posts.

pub mod config;
pub mod credentials;
pub mod destinations;
pub mod error;
pub mod history;
pub mod logging;
pub mod orchestrator;
pub mod rate_limiter;
pub mod types;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use destinations::{Destination, DestinationKind, ReplyCallback};
pub use error::{BotcastError, Result};
pub use history::RecordStore;
pub use orchestrator::{Orchestrator, LOOKBACK_CEILING};
pub use rate_limiter::RateLimiter;
pub use types::{DestinationRecord, ExtraKeys, IterationRecord, PostId, RecordKind};
