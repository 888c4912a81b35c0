//! Resilience helpers for stages that talk to external tools and services
//!
//! - **Timeout**: bounds a stage by a deadline while keeping the stage's own error type
//! - **Retry**: exponential backoff for failures the caller classifies as transient
//!
//! # Example: extractor call with a deadline and throttling retries
//!
//! ```rust,no_run
//! use resilience::{retry::{retry_if, RetryConfig}, timeout::{with_deadline, TimeoutError}};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RetryConfig::default();
//!
//!     let _result = retry_if(
//!         &config,
//!         |_attempt| with_deadline(Duration::from_secs(300), async {
//!             // Your extractor call
//!             Ok::<_, String>(())
//!         }),
//!         |err: &TimeoutError<String>| err.is_inner(),
//!     )
//!     .await;
//! }
//! ```

pub mod retry;
pub mod timeout;

pub use retry::{retry_if, RetryConfig};
pub use timeout::{with_deadline, TimeoutError};
