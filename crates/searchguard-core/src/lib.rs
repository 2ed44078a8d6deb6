//! Searchguard Core
//!
//! This crate provides the shared foundation for the searchguard workspace:
//! error handling and logging setup. The policy engine itself lives in
//! `searchguard-engine`.

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use logging::init_logging;
