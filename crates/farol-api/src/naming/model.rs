//! Naming module API models for service discovery
//!
//! Defines the service instance model, the cached `ServiceInfo` snapshot,
//! and the snapshot diff used to drive change notifications.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use farol_common::{FarolError, error};

use crate::model::{
    DEFAULT_CACHE_MILLIS, DEFAULT_CLUSTER_NAME, NAMING_INSTANCE_ID_SPLITTER, grouped_service_name,
};

/// Service instance information
///
/// Instances are immutable once built; a changed instance is replaced, never
/// patched, so concurrent readers never observe a half-updated record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub ip: String,
    pub port: i32,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl Instance {
    /// Start building an instance with validated defaults.
    pub fn builder(ip: &str, port: i32) -> InstanceBuilder {
        InstanceBuilder::new(ip, port)
    }

    /// Identity key within a service: `ip#port#clusterName`.
    pub fn key(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.ip,
            NAMING_INSTANCE_ID_SPLITTER,
            self.port,
            NAMING_INSTANCE_ID_SPLITTER,
            self.cluster_name
        )
    }

    /// Whether this instance may be handed to a caller asking for healthy
    /// instances: healthy, enabled, and positive weight.
    pub fn is_selectable(&self) -> bool {
        self.healthy && self.enabled && self.weight > 0.0
    }
}

/// Builder for [`Instance`] with validation at construction time.
#[derive(Clone, Debug)]
pub struct InstanceBuilder {
    instance: Instance,
}

impl InstanceBuilder {
    pub fn new(ip: &str, port: i32) -> Self {
        Self {
            instance: Instance {
                instance_id: String::new(),
                ip: ip.to_string(),
                port,
                weight: 1.0,
                healthy: true,
                enabled: true,
                ephemeral: true,
                cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
                service_name: String::new(),
                metadata: HashMap::new(),
            },
        }
    }

    pub fn instance_id(mut self, instance_id: &str) -> Self {
        self.instance.instance_id = instance_id.to_string();
        self
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.instance.weight = weight;
        self
    }

    pub fn healthy(mut self, healthy: bool) -> Self {
        self.instance.healthy = healthy;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.instance.enabled = enabled;
        self
    }

    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.instance.ephemeral = ephemeral;
        self
    }

    pub fn cluster_name(mut self, cluster_name: &str) -> Self {
        self.instance.cluster_name = cluster_name.to_string();
        self
    }

    pub fn service_name(mut self, service_name: &str) -> Self {
        self.instance.service_name = service_name.to_string();
        self
    }

    pub fn metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.instance.metadata = metadata;
        self
    }

    /// Validate and build. Rejects empty ip, invalid port, and non-positive
    /// or non-finite weight.
    pub fn build(mut self) -> Result<Instance, FarolError> {
        if self.instance.ip.is_empty() {
            return Err(FarolError::IllegalArgument("instance ip is empty".into()));
        }
        if self.instance.port <= 0 || self.instance.port > 65535 {
            return Err(FarolError::IllegalArgument(format!(
                "instance port {} out of range",
                self.instance.port
            )));
        }
        if !self.instance.weight.is_finite() || self.instance.weight <= 0.0 {
            return Err(FarolError::api(error::WEIGHT_ERROR));
        }
        if self.instance.cluster_name.is_empty() {
            self.instance.cluster_name = DEFAULT_CLUSTER_NAME.to_string();
        }
        Ok(self.instance)
    }
}

/// A point-in-time snapshot of a service's instance list
///
/// Snapshots are replaced wholesale on refresh, never mutated in place.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceInfo {
    /// Grouped service name (`group@@service`)
    pub name: String,
    pub group_name: String,
    /// Comma-joined cluster filter this snapshot was queried with
    pub clusters: String,
    pub cache_millis: i64,
    pub hosts: Vec<Instance>,
    pub last_ref_time: i64,
    pub checksum: String,
    pub all_ips: bool,
    pub reach_protection_threshold: bool,
}

impl ServiceInfo {
    pub fn new(service_name: &str, group_name: &str, clusters: &str) -> Self {
        Self {
            name: grouped_service_name(group_name, service_name),
            group_name: group_name.to_string(),
            clusters: clusters.to_string(),
            cache_millis: DEFAULT_CACHE_MILLIS,
            ..Default::default()
        }
    }

    /// Cache key: grouped name, plus the cluster filter when present.
    pub fn key(&self) -> String {
        if self.clusters.is_empty() {
            self.name.clone()
        } else {
            format!("{}@@{}", self.name, self.clusters)
        }
    }

    pub fn ip_count(&self) -> usize {
        self.hosts.len()
    }

    /// Healthy and enabled hosts only.
    pub fn healthy_hosts(&self) -> Vec<&Instance> {
        self.hosts.iter().filter(|h| h.is_selectable()).collect()
    }

    /// An empty push carries no hosts; it must not overwrite a populated
    /// cache entry before the first successful pull.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// The difference between two `ServiceInfo` snapshots
///
/// Every instance appears in at most one of the three lists; the union of
/// added, modified, and unchanged instances from the old snapshot equals the
/// new snapshot.
#[derive(Clone, Debug, Default)]
pub struct InstancesDiff {
    pub added: Vec<Instance>,
    pub removed: Vec<Instance>,
    pub modified: Vec<Instance>,
}

impl InstancesDiff {
    /// Diff `new` against `old`, keyed by instance identity
    /// (`ip#port#clusterName`).
    pub fn between(old: Option<&ServiceInfo>, new: &ServiceInfo) -> Self {
        let old_hosts: HashMap<String, &Instance> = old
            .map(|s| s.hosts.iter().map(|h| (h.key(), h)).collect())
            .unwrap_or_default();
        let new_keys: HashSet<String> = new.hosts.iter().map(|h| h.key()).collect();

        let mut diff = InstancesDiff::default();
        for host in &new.hosts {
            match old_hosts.get(&host.key()) {
                None => diff.added.push(host.clone()),
                Some(prev) if *prev != host => diff.modified.push(host.clone()),
                Some(_) => {}
            }
        }
        for (key, host) in &old_hosts {
            if !new_keys.contains(key) {
                diff.removed.push((*host).clone());
            }
        }
        diff
    }

    pub fn has_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }
}
