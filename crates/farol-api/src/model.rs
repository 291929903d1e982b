//! Common API models and constants
//!
//! Shared constants, the cluster member model, and key-building helpers
//! used across the naming, config, and distro modules.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

// Defaults, shared with the lower layers
pub use farol_common::{DEFAULT_CLUSTER_NAME, DEFAULT_GROUP, DEFAULT_NAMESPACE_ID};

// Separators. The long-poll probe format must be preserved byte-for-byte
// for legacy client compatibility.
pub const LINE_SEPARATOR: &str = "\u{1}";
pub const WORD_SEPARATOR: &str = "\u{2}";
pub const SERVICE_INFO_SPLITER: &str = "@@";
pub const NAMING_INSTANCE_ID_SPLITTER: &str = "#";
pub const GROUP_KEY_SPLITER: &str = "+";

// Fuzzy watch
pub const ANY_PATTERN: &str = "*";
pub const FUZZY_WATCH_INIT_NOTIFY: &str = "FUZZY_WATCH_INIT_NOTIFY";
pub const FINISH_FUZZY_WATCH_INIT_NOTIFY: &str = "FINISH_FUZZY_WATCH_INIT_NOTIFY";
pub const FUZZY_WATCH_DIFF_SYNC_NOTIFY: &str = "FUZZY_WATCH_DIFF_SYNC_NOTIFY";

// Fuzzy watch change types
pub const ADD_SERVICE: &str = "ADD_SERVICE";
pub const DELETE_SERVICE: &str = "DELETE_SERVICE";

// Timeouts and intervals
pub const CONFIG_LONG_POLL_TIMEOUT: i64 = 30000;
pub const MIN_CONFIG_LONG_POLL_TIMEOUT: i64 = 10000;
pub const DEFAULT_CACHE_MILLIS: i64 = 10000;

/// Build the canonical `group@@service` join key used in caches and wire
/// protocols.
pub fn grouped_service_name(group_name: &str, service_name: &str) -> String {
    format!("{}{}{}", group_name, SERVICE_INFO_SPLITER, service_name)
}

/// Split a `group@@service` key back into (group, service).
pub fn split_grouped_service_name(grouped: &str) -> Option<(&str, &str)> {
    grouped.split_once(SERVICE_INFO_SPLITER)
}

/// Build the `dataId+group+tenant` key used by the config module.
pub fn config_group_key(data_id: &str, group: &str, tenant: &str) -> String {
    format!(
        "{}{}{}{}{}",
        data_id, GROUP_KEY_SPLITER, group, GROUP_KEY_SPLITER, tenant
    )
}

/// State of a cluster member node
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    #[default]
    Up,
    Suspicious,
    Down,
    Isolation,
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Up => write!(f, "UP"),
            NodeState::Suspicious => write!(f, "SUSPICIOUS"),
            NodeState::Down => write!(f, "DOWN"),
            NodeState::Isolation => write!(f, "ISOLATION"),
        }
    }
}

/// A server node in the cluster view
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub ip: String,
    pub port: u16,
    pub address: String,
    pub state: NodeState,
}

impl Member {
    pub fn new(ip: String, port: u16) -> Self {
        let address = format!("{}:{}", ip, port);
        Self {
            ip,
            port,
            address,
            state: NodeState::Up,
        }
    }

    /// Whether the member counts toward the distro responsibility ring.
    pub fn is_alive(&self) -> bool {
        matches!(self.state, NodeState::Up | NodeState::Suspicious)
    }
}
