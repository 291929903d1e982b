//! Farol Common - shared error types, error codes, and utilities
//!
//! This crate provides the foundational pieces used across all Farol
//! components: the error enum, structured error codes, checksum and
//! glob-matching helpers, and a handful of shared constants.

pub mod error;
pub mod utils;

// Re-exports for convenience
pub use error::{ErrorCode, FarolError};
pub use utils::{glob_matches, is_valid, md5_hex, now_millis};

/// Default namespace ID used when no namespace is specified
pub const DEFAULT_NAMESPACE_ID: &str = "public";

/// Default group name
pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";

/// Default cluster name
pub const DEFAULT_CLUSTER_NAME: &str = "DEFAULT";
