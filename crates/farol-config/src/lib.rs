//! Farol Config - the configuration service
//!
//! Publish pipeline with gray channels (beta/tag/custom), CAS updates,
//! change-event notification, and md5-compare long polling. Storage sits
//! behind the `ConfigRepository` trait.

pub mod model;
pub mod repository;
pub mod service;

pub use model::gray_rule::{GrayRule, GrayRulePersistInfo};
pub use repository::{ConfigRepository, MemoryConfigRepository};
pub use service::config::ConfigService;
pub use service::longpoll::{LongPollingService, PollResult};
