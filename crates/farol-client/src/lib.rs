//! Client SDK for service discovery and configuration management
//!
//! Two facades: [`NamingClient`] for service registration, discovery,
//! subscription, and fuzzy watch; [`ConfigClient`] for publishing and
//! listening to configuration. Both are generic over a transport trait so
//! the wire layer stays pluggable.

pub mod config;
pub mod error;
pub mod naming;

pub use config::{ConfigChangeNotifyEvent, ConfigClient, ConfigListener, ConfigTransport};
pub use error::{ClientError, Result};
pub use naming::NamingClient;
pub use naming::fuzzy_watch::{FuzzyWatchEventListener, FuzzyWatchNotifyEvent, NamingFuzzyWatcher};
pub use naming::listener::{InstanceListener, InstancesChangeEvent};
pub use naming::notifier::InstancesChangeNotifier;
pub use naming::proxy::{NamingClientProxyDelegate, NamingTransport, SubscribeOutcome};
pub use naming::selector::{Balancer, InstanceSelector, select_instances};
pub use naming::service_info_holder::ServiceInfoHolder;
