//! Media Relay Service
//!
//! Chat bot backend that downloads posted media and sends it back to the
//! conversation, falling back to a size-reduced animation for large videos.
//! A per-requester daily quota is charged only after a confirmed delivery.

pub mod config;
pub mod error;
pub mod frontend;
pub mod handlers;
pub mod metrics;
pub mod services;
pub mod telegram;
pub mod workers;

// Public re-exports
pub use config::Config;
pub use error::{ErrorKind, PipelineError, ServiceError, ServiceResult};
