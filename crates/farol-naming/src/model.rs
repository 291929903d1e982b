//! Naming registry models
//!
//! The service identity key and the tagged client-operation event that the
//! registry facade dispatches on.

use serde::{Deserialize, Serialize};

use farol_api::model::SERVICE_INFO_SPLITER;
use farol_api::naming::model::Instance;
use farol_common::{DEFAULT_GROUP, DEFAULT_NAMESPACE_ID};

/// Identity of a service in the registry
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKey {
    pub namespace: String,
    pub group_name: String,
    pub service_name: String,
}

impl ServiceKey {
    pub fn new(namespace: &str, group_name: &str, service_name: &str) -> Self {
        Self {
            namespace: if namespace.is_empty() {
                DEFAULT_NAMESPACE_ID.to_string()
            } else {
                namespace.to_string()
            },
            group_name: if group_name.is_empty() {
                DEFAULT_GROUP.to_string()
            } else {
                group_name.to_string()
            },
            service_name: service_name.to_string(),
        }
    }

    /// Registry key format: `namespace@@group@@service`.
    pub fn key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.namespace,
            self.group_name,
            self.service_name,
            sep = SERVICE_INFO_SPLITER
        )
    }

    /// `group@@service` as carried on ServiceInfo snapshots.
    pub fn grouped_name(&self) -> String {
        format!(
            "{}{}{}",
            self.group_name, SERVICE_INFO_SPLITER, self.service_name
        )
    }

    /// Parse a `namespace@@group@@service` registry key.
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, SERVICE_INFO_SPLITER);
        let namespace = parts.next()?;
        let group_name = parts.next()?;
        let service_name = parts.next()?;
        if service_name.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            group_name: group_name.to_string(),
            service_name: service_name.to_string(),
        })
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// A client-originated registry operation
///
/// One tagged enum instead of a class per operation; the registry facade
/// matches on the variant.
#[derive(Clone, Debug)]
pub enum ClientOperationEvent {
    Register {
        client_id: String,
        service: ServiceKey,
        instance: Instance,
    },
    Deregister {
        client_id: String,
        service: ServiceKey,
        instance: Instance,
    },
    Subscribe {
        client_id: String,
        service: ServiceKey,
    },
    Unsubscribe {
        client_id: String,
        service: ServiceKey,
    },
    FuzzyWatch {
        client_id: String,
        pattern: String,
    },
    CancelFuzzyWatch {
        client_id: String,
        pattern: String,
    },
    /// Connection closed; sweep everything the client published or watched.
    Release { client_id: String },
}

impl ClientOperationEvent {
    pub fn client_id(&self) -> &str {
        match self {
            ClientOperationEvent::Register { client_id, .. }
            | ClientOperationEvent::Deregister { client_id, .. }
            | ClientOperationEvent::Subscribe { client_id, .. }
            | ClientOperationEvent::Unsubscribe { client_id, .. }
            | ClientOperationEvent::FuzzyWatch { client_id, .. }
            | ClientOperationEvent::CancelFuzzyWatch { client_id, .. }
            | ClientOperationEvent::Release { client_id } => client_id,
        }
    }
}

/// Kind of change to a registered service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceChangeKind {
    /// First instance registered, service now exists
    Added,
    /// Instance set changed
    Changed,
    /// Last instance removed, service gone
    Removed,
}

/// Broadcast whenever a service's instance set changes
#[derive(Clone, Debug)]
pub struct ServiceChangeEvent {
    pub key: ServiceKey,
    pub kind: ServiceChangeKind,
}
