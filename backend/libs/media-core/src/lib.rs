//! Media relay core models and types
//!
//! Shared data structures for the relay service and its workers

pub mod constants;
pub mod models;

pub use models::*;
