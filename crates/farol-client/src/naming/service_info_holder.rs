//! Local cache of service instance snapshots
//!
//! The holder owns every `ServiceInfo` the client knows about. Updates come
//! from server pushes and query responses, always through
//! `process_service_info`, which replaces entries wholesale so concurrent
//! readers never observe a torn snapshot. Each accepted update is persisted
//! to disk in the background; the snapshots double as failover data.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use farol_api::naming::model::{InstancesDiff, ServiceInfo};

use crate::error::Result;
use crate::naming::failover::FailoverReactor;
use crate::naming::listener::InstancesChangeEvent;
use crate::naming::notifier::InstancesChangeNotifier;

/// Client-side service snapshot cache
pub struct ServiceInfoHolder {
    cache: DashMap<String, ServiceInfo>,
    notifier: Arc<InstancesChangeNotifier>,
    failover: Arc<FailoverReactor>,
    persist_tx: mpsc::UnboundedSender<ServiceInfo>,
}

impl ServiceInfoHolder {
    /// Build the holder, loading any snapshots left by a previous run.
    /// Failure to set up the cache directories or the persist channel is
    /// fatal; a client without its cache wiring must not start.
    pub fn new(cache_dir: &Path, notifier: Arc<InstancesChangeNotifier>) -> Result<Arc<Self>> {
        let snapshot_dir = cache_dir.join("naming");
        std::fs::create_dir_all(&snapshot_dir)?;
        let failover = Arc::new(FailoverReactor::new(&cache_dir.join("failover"))?);

        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel::<ServiceInfo>();
        let holder = Arc::new(Self {
            cache: DashMap::new(),
            notifier,
            failover: failover.clone(),
            persist_tx,
        });
        holder.load_snapshots(&snapshot_dir);

        // Best-effort background persistence; a failed write only costs the
        // next startup its warm cache.
        tokio::spawn(async move {
            while let Some(snapshot) = persist_rx.recv().await {
                let path = snapshot_dir.join(snapshot.key());
                match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        if let Err(e) = tokio::fs::write(&path, json).await {
                            warn!("Failed to persist snapshot for {}: {}", snapshot.key(), e);
                        }
                        if let Err(e) = failover.save(&snapshot) {
                            warn!("Failed to save failover copy for {}: {}", snapshot.key(), e);
                        }
                    }
                    Err(e) => warn!("Failed to serialize snapshot: {}", e),
                }
            }
        });

        Ok(holder)
    }

    fn load_snapshots(&self, snapshot_dir: &Path) {
        let Ok(entries) = std::fs::read_dir(snapshot_dir) else {
            return;
        };
        let mut loaded = 0;
        for entry in entries.flatten() {
            match std::fs::read_to_string(entry.path())
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str::<ServiceInfo>(&raw).map_err(Into::into))
            {
                Ok(snapshot) => {
                    self.cache.insert(snapshot.key(), snapshot);
                    loaded += 1;
                }
                Err(e) => warn!("Skipping unreadable snapshot {:?}: {}", entry.file_name(), e),
            }
        }
        if loaded > 0 {
            info!("Loaded {} service snapshots from disk", loaded);
        }
    }

    /// The central update primitive. Replaces the cached snapshot wholesale
    /// and notifies listeners when something actually changed. An empty push
    /// with no cached entry is ignored so negative results never pollute the
    /// cache before the first successful pull.
    pub fn process_service_info(&self, new_info: ServiceInfo) -> ServiceInfo {
        let key = new_info.key();
        let old = self.cache.get(&key).map(|e| e.value().clone());

        if new_info.is_empty() && old.is_none() {
            debug!("Ignoring empty push for uncached service {}", key);
            return new_info;
        }

        let first = old.is_none();
        let diff = InstancesDiff::between(old.as_ref(), &new_info);
        self.cache.insert(key.clone(), new_info.clone());

        if self.persist_tx.send(new_info.clone()).is_err() {
            warn!("Snapshot persist worker gone, skipping disk write for {}", key);
        }

        if diff.has_changed() || first {
            let (group_name, service_name) = new_info
                .name
                .split_once("@@")
                .map(|(g, s)| (g.to_string(), s.to_string()))
                .unwrap_or_else(|| (new_info.group_name.clone(), new_info.name.clone()));
            self.notifier.notify(&InstancesChangeEvent {
                service_name,
                group_name,
                clusters: new_info.clusters.clone(),
                diff,
            });
        }
        new_info
    }

    /// The current snapshot for a service, honoring the failover switch.
    pub fn get_service_info(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &str,
    ) -> Option<ServiceInfo> {
        let key = ServiceInfo::new(service_name, group_name, clusters).key();
        if self.failover.is_failover_switch() {
            debug!("Failover switch on, reading {} from failover", key);
            return self.failover.get(&key);
        }
        self.cache.get(&key).map(|e| e.value().clone())
    }

    /// The failover copy regardless of the switch.
    pub fn get_failover_service_info(
        &self,
        service_name: &str,
        group_name: &str,
        clusters: &str,
    ) -> Option<ServiceInfo> {
        let key = ServiceInfo::new(service_name, group_name, clusters).key();
        self.failover.get(&key)
    }

    pub fn remove(&self, service_name: &str, group_name: &str, clusters: &str) {
        let key = ServiceInfo::new(service_name, group_name, clusters).key();
        self.cache.remove(&key);
    }

    pub fn keys(&self) -> Vec<String> {
        self.cache.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use farol_api::naming::model::Instance;

    use crate::naming::failover::FAILOVER_SWITCH_FILE;

    fn info(service: &str, ips: &[&str]) -> ServiceInfo {
        let mut info = ServiceInfo::new(service, "G1", "");
        info.hosts = ips
            .iter()
            .map(|ip| Instance::builder(ip, 80).build().unwrap())
            .collect();
        info
    }

    fn holder() -> (tempfile::TempDir, Arc<ServiceInfoHolder>, Arc<InstancesChangeNotifier>) {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(InstancesChangeNotifier::new());
        let holder = ServiceInfoHolder::new(dir.path(), notifier.clone()).unwrap();
        (dir, holder, notifier)
    }

    #[tokio::test]
    async fn test_empty_push_before_first_pull_ignored() {
        let (_dir, holder, _) = holder();
        holder.process_service_info(info("s1", &[]));
        assert!(holder.get_service_info("s1", "G1", "").is_none());
    }

    #[tokio::test]
    async fn test_empty_push_after_population_applies() {
        let (_dir, holder, _) = holder();
        holder.process_service_info(info("s1", &["1.1.1.1"]));
        holder.process_service_info(info("s1", &[]));
        let cached = holder.get_service_info("s1", "G1", "").unwrap();
        assert!(cached.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_event_on_first_population_and_changes_only() {
        let (_dir, holder, notifier) = holder();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        notifier.register_listener(
            "G1",
            "s1",
            Arc::new(move |e| sink.lock().unwrap().push(e.diff.added.len())),
        );

        holder.process_service_info(info("s1", &["1.1.1.1"]));
        assert_eq!(events.lock().unwrap().len(), 1);

        // identical snapshot: no event
        holder.process_service_info(info("s1", &["1.1.1.1"]));
        assert_eq!(events.lock().unwrap().len(), 1);

        // changed snapshot: event with the diff
        holder.process_service_info(info("s1", &["1.1.1.1", "1.1.1.2"]));
        let recorded = events.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[1], 1);
    }

    #[tokio::test]
    async fn test_wholesale_replacement() {
        let (_dir, holder, _) = holder();
        holder.process_service_info(info("s1", &["1.1.1.1", "1.1.1.2"]));
        holder.process_service_info(info("s1", &["2.2.2.2"]));

        let cached = holder.get_service_info("s1", "G1", "").unwrap();
        assert_eq!(cached.hosts.len(), 1);
        assert_eq!(cached.hosts[0].ip, "2.2.2.2");
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let notifier = Arc::new(InstancesChangeNotifier::new());
            let holder = ServiceInfoHolder::new(dir.path(), notifier).unwrap();
            holder.process_service_info(info("s1", &["1.1.1.1"]));
            // let the persist worker drain
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        let notifier = Arc::new(InstancesChangeNotifier::new());
        let reborn = ServiceInfoHolder::new(dir.path(), notifier).unwrap();
        let cached = reborn.get_service_info("s1", "G1", "").unwrap();
        assert_eq!(cached.hosts.len(), 1);
    }

    #[tokio::test]
    async fn test_failover_switch_redirects_reads() {
        let (dir, holder, _) = holder();
        holder.process_service_info(info("s1", &["1.1.1.1"]));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // rebuild failover mirror from the files the worker wrote
        let failover_dir = dir.path().join("failover");
        std::fs::write(failover_dir.join(FAILOVER_SWITCH_FILE), "1").unwrap();
        holder.failover.refresh();

        let served = holder.get_service_info("s1", "G1", "").unwrap();
        assert_eq!(served.hosts.len(), 1);
        assert!(holder.get_failover_service_info("s1", "G1", "").is_some());

        // unknown service under failover yields nothing rather than cache
        assert!(holder.get_service_info("missing", "G1", "").is_none());
    }
}
