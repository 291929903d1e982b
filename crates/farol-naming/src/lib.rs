//! Farol Naming - the service registry
//!
//! In-memory registry of service instances with connection-scoped ephemeral
//! entries, fuzzy-watch pattern matching, and the distro handler that
//! replicates ephemeral instances across cluster peers.

pub mod fuzzy_watch;
pub mod handler;
pub mod model;
pub mod service;

pub use fuzzy_watch::{FuzzyWatchConfig, FuzzyWatchPatternManager};
pub use handler::distro::{NAMING_INSTANCE_TYPE, NamingInstanceDistroHandler};
pub use model::{ClientOperationEvent, ServiceChangeEvent, ServiceChangeKind, ServiceKey};
pub use service::NamingService;
