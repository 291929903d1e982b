//! In-memory service registry
//!
//! Holds every registered instance, keyed `namespace@@group@@service` and
//! within a service by `ip#port#clusterName`. Ephemeral instances remember
//! the connection that published them and are swept when it goes away.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use farol_api::model::DEFAULT_CACHE_MILLIS;
use farol_api::naming::model::{Instance, ServiceInfo};
use farol_api::validation::validate_service_name;
use farol_common::{FarolError, md5_hex, now_millis};

use crate::fuzzy_watch::{FuzzyWatchConfig, FuzzyWatchPatternManager};
use crate::model::{ClientOperationEvent, ServiceChangeEvent, ServiceChangeKind, ServiceKey};

struct PublishedInstance {
    instance: Instance,
    /// Publishing connection; `None` for persistent or peer-synced entries
    client_id: Option<String>,
}

struct ServiceEntry {
    key: ServiceKey,
    instances: DashMap<String, PublishedInstance>,
    last_modified: AtomicI64,
}

impl ServiceEntry {
    fn touch(&self) {
        self.last_modified.store(now_millis(), Ordering::Release);
    }
}

/// The naming registry
pub struct NamingService {
    services: DashMap<String, Arc<ServiceEntry>>,
    /// Service keys each connection subscribes to
    subscribers: DashMap<String, HashSet<String>>,
    fuzzy_watch: Arc<FuzzyWatchPatternManager>,
    /// Healthy-ratio threshold below which snapshots carry the protection
    /// flag; 0.0 disables it
    protect_threshold: f64,
    event_tx: broadcast::Sender<ServiceChangeEvent>,
}

impl NamingService {
    pub fn new() -> Self {
        Self::with_config(0.0, FuzzyWatchConfig::default())
    }

    pub fn with_config(protect_threshold: f64, fuzzy_config: FuzzyWatchConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            services: DashMap::new(),
            subscribers: DashMap::new(),
            fuzzy_watch: Arc::new(FuzzyWatchPatternManager::new(fuzzy_config)),
            protect_threshold,
            event_tx,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ServiceChangeEvent> {
        self.event_tx.subscribe()
    }

    pub fn fuzzy_watch_manager(&self) -> Arc<FuzzyWatchPatternManager> {
        self.fuzzy_watch.clone()
    }

    /// Dispatch one client operation.
    pub fn apply(&self, event: ClientOperationEvent) -> Result<(), FarolError> {
        match event {
            ClientOperationEvent::Register {
                client_id,
                service,
                instance,
            } => self.register_instance(&service, instance, Some(&client_id)),
            ClientOperationEvent::Deregister {
                service, instance, ..
            } => {
                self.deregister_instance(&service, &instance);
                Ok(())
            }
            ClientOperationEvent::Subscribe { client_id, service } => {
                self.subscribe(&client_id, &service);
                Ok(())
            }
            ClientOperationEvent::Unsubscribe { client_id, service } => {
                self.unsubscribe(&client_id, &service);
                Ok(())
            }
            ClientOperationEvent::FuzzyWatch { client_id, pattern } => {
                let current = self.all_service_identities();
                self.fuzzy_watch
                    .add_watcher(&client_id, &pattern, &current)
                    .map(|_| ())
            }
            ClientOperationEvent::CancelFuzzyWatch { client_id, pattern } => {
                self.fuzzy_watch.remove_watcher(&client_id, &pattern);
                Ok(())
            }
            ClientOperationEvent::Release { client_id } => {
                self.release_client(&client_id);
                Ok(())
            }
        }
    }

    /// Register one instance. Registering an identical instance again is a
    /// no-op; a differing instance with the same `ip#port#cluster` key
    /// replaces the old one.
    pub fn register_instance(
        &self,
        key: &ServiceKey,
        mut instance: Instance,
        client_id: Option<&str>,
    ) -> Result<(), FarolError> {
        validate_service_name(&key.service_name)
            .map_err(|e| FarolError::IllegalArgument(e.to_string()))?;
        instance.service_name = key.grouped_name();

        let service_key = key.key();
        let created = !self.services.contains_key(&service_key);
        let entry = self
            .services
            .entry(service_key)
            .or_insert_with(|| {
                Arc::new(ServiceEntry {
                    key: key.clone(),
                    instances: DashMap::new(),
                    last_modified: AtomicI64::new(now_millis()),
                })
            })
            .clone();

        let instance_key = instance.key();
        let unchanged = entry
            .instances
            .get(&instance_key)
            .map(|existing| existing.instance == instance)
            .unwrap_or(false);
        if unchanged {
            return Ok(());
        }

        entry.instances.insert(
            instance_key,
            PublishedInstance {
                instance,
                client_id: client_id.map(|s| s.to_string()),
            },
        );
        entry.touch();

        if created {
            info!("Service created: {}", key);
            self.fuzzy_watch.on_service_added(key);
            self.emit(key, ServiceChangeKind::Added);
        }
        self.emit(key, ServiceChangeKind::Changed);
        Ok(())
    }

    /// Deregister one instance by identity key. Unknown instances and
    /// unknown services are silently accepted.
    pub fn deregister_instance(&self, key: &ServiceKey, instance: &Instance) {
        let service_key = key.key();
        let Some(entry) = self.services.get(&service_key).map(|e| e.clone()) else {
            return;
        };
        if entry.instances.remove(&instance.key()).is_none() {
            return;
        }
        entry.touch();
        debug!("Instance deregistered: {} from {}", instance.key(), key);
        self.emit(key, ServiceChangeKind::Changed);
        self.drop_if_empty(&service_key, &entry);
    }

    pub fn batch_register_instances(
        &self,
        key: &ServiceKey,
        instances: Vec<Instance>,
        client_id: Option<&str>,
    ) -> Result<(), FarolError> {
        for instance in instances {
            self.register_instance(key, instance, client_id)?;
        }
        Ok(())
    }

    pub fn batch_deregister_instances(&self, key: &ServiceKey, instances: &[Instance]) {
        for instance in instances {
            self.deregister_instance(key, instance);
        }
    }

    /// All instances of a service passing the cluster and health filters.
    /// `clusters` is a comma-joined list; empty or `*` matches everything.
    pub fn get_instances(
        &self,
        key: &ServiceKey,
        clusters: &str,
        healthy_only: bool,
    ) -> Vec<Instance> {
        let Some(entry) = self.services.get(&key.key()) else {
            return Vec::new();
        };
        let wanted: HashSet<&str> = if clusters.is_empty() || clusters == "*" {
            HashSet::new()
        } else {
            clusters.split(',').map(str::trim).collect()
        };

        let mut instances: Vec<Instance> = entry
            .instances
            .iter()
            .filter(|e| {
                let inst = &e.value().instance;
                let cluster_ok = wanted.is_empty() || wanted.contains(inst.cluster_name.as_str());
                let health_ok = !healthy_only || inst.healthy;
                cluster_ok && health_ok
            })
            .map(|e| e.value().instance.clone())
            .collect();
        instances.sort_by(|a, b| a.key().cmp(&b.key()));
        instances
    }

    /// Build a ServiceInfo snapshot for subscribers.
    pub fn get_service_info(&self, key: &ServiceKey, clusters: &str) -> ServiceInfo {
        let hosts = self.get_instances(key, clusters, false);
        let healthy = hosts.iter().filter(|h| h.healthy).count();
        let reached = self.protect_threshold > 0.0
            && !hosts.is_empty()
            && (healthy as f64 / hosts.len() as f64) < self.protect_threshold;

        let checksum = md5_hex(
            &hosts
                .iter()
                .map(|h| format!("{}:{}", h.key(), h.healthy))
                .collect::<Vec<_>>()
                .join(","),
        );

        let mut info = ServiceInfo::new(&key.service_name, &key.group_name, clusters);
        info.cache_millis = DEFAULT_CACHE_MILLIS;
        info.last_ref_time = now_millis();
        info.checksum = checksum;
        info.all_ips = clusters.is_empty() || clusters == "*";
        info.reach_protection_threshold = reached;
        info.hosts = hosts;
        info
    }

    /// Page through service names in a namespace, optionally filtered by
    /// group. Returns (total, names) with names as `group@@service`.
    pub fn list_services(
        &self,
        namespace: &str,
        group_name: &str,
        page_no: usize,
        page_size: usize,
    ) -> (usize, Vec<String>) {
        let mut names: Vec<String> = self
            .services
            .iter()
            .filter(|e| {
                let key = &e.value().key;
                key.namespace == namespace && (group_name.is_empty() || key.group_name == group_name)
            })
            .map(|e| e.value().key.grouped_name())
            .collect();
        names.sort();

        let total = names.len();
        let start = page_no.saturating_sub(1).saturating_mul(page_size);
        let page = names.into_iter().skip(start).take(page_size).collect();
        (total, page)
    }

    pub fn subscribe(&self, client_id: &str, key: &ServiceKey) {
        self.subscribers
            .entry(client_id.to_string())
            .or_default()
            .insert(key.key());
    }

    pub fn unsubscribe(&self, client_id: &str, key: &ServiceKey) {
        if let Some(mut subs) = self.subscribers.get_mut(client_id) {
            subs.remove(&key.key());
        }
    }

    /// Connections subscribed to a service.
    pub fn subscribers_of(&self, key: &ServiceKey) -> Vec<String> {
        let service_key = key.key();
        let mut clients: Vec<String> = self
            .subscribers
            .iter()
            .filter(|e| e.value().contains(&service_key))
            .map(|e| e.key().clone())
            .collect();
        clients.sort();
        clients
    }

    /// Sweep everything a disconnected client published, subscribed, or
    /// watched. Only ephemeral instances are removed.
    pub fn release_client(&self, client_id: &str) {
        self.subscribers.remove(client_id);
        self.fuzzy_watch.release_client(client_id);

        let entries: Vec<Arc<ServiceEntry>> =
            self.services.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            let stale: Vec<String> = entry
                .instances
                .iter()
                .filter(|e| {
                    e.value().instance.ephemeral
                        && e.value().client_id.as_deref() == Some(client_id)
                })
                .map(|e| e.key().clone())
                .collect();
            if stale.is_empty() {
                continue;
            }
            for instance_key in stale {
                entry.instances.remove(&instance_key);
            }
            entry.touch();
            info!("Swept instances of {} from {}", client_id, entry.key);
            self.emit(&entry.key, ServiceChangeKind::Changed);
            self.drop_if_empty(&entry.key.key(), &entry);
        }
    }

    /// All registry keys, for replication.
    pub fn all_service_keys(&self) -> Vec<String> {
        self.services.iter().map(|e| e.key().clone()).collect()
    }

    fn all_service_identities(&self) -> Vec<ServiceKey> {
        self.services
            .iter()
            .map(|e| e.value().key.clone())
            .collect()
    }

    /// Ephemeral instances of one service, sorted by identity key.
    pub fn ephemeral_instances(&self, key: &ServiceKey) -> Vec<Instance> {
        let Some(entry) = self.services.get(&key.key()) else {
            return Vec::new();
        };
        let mut instances: Vec<Instance> = entry
            .instances
            .iter()
            .filter(|e| e.value().instance.ephemeral)
            .map(|e| e.value().instance.clone())
            .collect();
        instances.sort_by(|a, b| a.key().cmp(&b.key()));
        instances
    }

    /// Replace the full ephemeral instance set of a service with a
    /// peer-synced one. Persistent instances are untouched.
    pub fn replace_ephemeral_instances(&self, key: &ServiceKey, instances: Vec<Instance>) {
        let service_key = key.key();
        if instances.is_empty() {
            if let Some(entry) = self.services.get(&service_key).map(|e| e.clone()) {
                entry.instances.retain(|_, p| !p.instance.ephemeral);
                entry.touch();
                self.emit(key, ServiceChangeKind::Changed);
                self.drop_if_empty(&service_key, &entry);
            }
            return;
        }

        let created = !self.services.contains_key(&service_key);
        let entry = self
            .services
            .entry(service_key)
            .or_insert_with(|| {
                Arc::new(ServiceEntry {
                    key: key.clone(),
                    instances: DashMap::new(),
                    last_modified: AtomicI64::new(now_millis()),
                })
            })
            .clone();

        entry.instances.retain(|_, p| !p.instance.ephemeral);
        for mut instance in instances {
            instance.service_name = key.grouped_name();
            entry.instances.insert(
                instance.key(),
                PublishedInstance {
                    instance,
                    client_id: None,
                },
            );
        }
        entry.touch();

        if created {
            self.fuzzy_watch.on_service_added(key);
            self.emit(key, ServiceChangeKind::Added);
        }
        self.emit(key, ServiceChangeKind::Changed);
    }

    /// When the service last changed, in epoch millis.
    pub fn service_last_modified(&self, key: &ServiceKey) -> Option<i64> {
        self.services
            .get(&key.key())
            .map(|e| e.last_modified.load(Ordering::Acquire))
    }

    fn drop_if_empty(&self, service_key: &str, entry: &Arc<ServiceEntry>) {
        if entry.instances.is_empty() && self.services.remove(service_key).is_some() {
            info!("Service removed: {}", entry.key);
            self.fuzzy_watch.on_service_removed(&entry.key);
            self.emit(&entry.key, ServiceChangeKind::Removed);
        }
    }

    fn emit(&self, key: &ServiceKey, kind: ServiceChangeKind) {
        let _ = self.event_tx.send(ServiceChangeEvent {
            key: key.clone(),
            kind,
        });
    }
}

impl Default for NamingService {
    fn default() -> Self {
        Self::new()
    }
}
