//! Service discovery client
//!
//! `NamingClient` is the user-facing facade. It composes the change
//! notifier, the snapshot holder, the proxy delegate, and the fuzzy watch
//! manager, all sharing one transport.

pub mod failover;
pub mod fuzzy_watch;
pub mod listener;
pub mod notifier;
pub mod proxy;
pub mod selector;
pub mod service_info_holder;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use farol_api::naming::model::{Instance, InstancesDiff, ServiceInfo};

use crate::error::Result;
use crate::naming::fuzzy_watch::{FuzzyWatchEventListener, FuzzyWatcherId, NamingFuzzyWatcher};
use crate::naming::listener::{InstanceListener, InstancesChangeEvent};
use crate::naming::notifier::{InstancesChangeNotifier, ListenerId};
use crate::naming::proxy::{NamingClientProxyDelegate, NamingTransport};
use crate::naming::selector::{Balancer, InstanceSelector, select_instances};
use crate::naming::service_info_holder::ServiceInfoHolder;

/// Service discovery client facade
pub struct NamingClient {
    notifier: Arc<InstancesChangeNotifier>,
    holder: Arc<ServiceInfoHolder>,
    delegate: NamingClientProxyDelegate,
    fuzzy: NamingFuzzyWatcher,
}

impl NamingClient {
    pub fn new(
        namespace: &str,
        cache_dir: &Path,
        transport: Arc<dyn NamingTransport>,
    ) -> Result<Self> {
        let notifier = Arc::new(InstancesChangeNotifier::new());
        let holder = ServiceInfoHolder::new(cache_dir, notifier.clone())?;
        let delegate =
            NamingClientProxyDelegate::new(namespace, transport.clone(), holder.clone());
        let fuzzy = NamingFuzzyWatcher::new(namespace, transport);
        info!("Naming client ready for namespace {}", namespace);
        Ok(Self {
            notifier,
            holder,
            delegate,
            fuzzy,
        })
    }

    pub async fn register_instance(
        &self,
        group_name: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<()> {
        self.delegate
            .register_instance(group_name, service_name, instance)
            .await
    }

    pub async fn batch_register_instance(
        &self,
        group_name: &str,
        service_name: &str,
        instances: Vec<Instance>,
    ) -> Result<()> {
        self.delegate
            .batch_register_instance(group_name, service_name, instances)
            .await
    }

    pub async fn deregister_instance(
        &self,
        group_name: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<()> {
        self.delegate
            .deregister_instance(group_name, service_name, instance)
            .await
    }

    /// All instances of a service. Served from cache when available,
    /// otherwise pulled from the server and cached.
    pub async fn get_all_instances(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<Vec<Instance>> {
        let info = self
            .service_info(group_name, service_name, clusters)
            .await?;
        Ok(info.hosts)
    }

    /// Instances passing the selector, cluster-filtered.
    pub async fn select_instances(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
        selector: InstanceSelector,
    ) -> Result<Vec<Instance>> {
        let info = self
            .service_info(group_name, service_name, clusters)
            .await?;
        Ok(select_instances(&info, clusters, selector))
    }

    /// One healthy instance, chosen by weighted random.
    pub async fn select_one_healthy_instance(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<Instance> {
        let info = self
            .service_info(group_name, service_name, clusters)
            .await?;
        Balancer::select_host(&info)
    }

    async fn service_info(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<ServiceInfo> {
        if let Some(info) = self
            .holder
            .get_service_info(service_name, group_name, clusters)
        {
            return Ok(info);
        }
        self.delegate
            .query_instances(group_name, service_name, clusters)
            .await
    }

    /// Subscribe to instance changes. The first subscription for a service
    /// triggers the server RPC; later ones are served from the cache with a
    /// synthetic catch-up event.
    pub async fn subscribe(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
        listener: InstanceListener,
    ) -> Result<ListenerId> {
        let id = self
            .notifier
            .register_listener(group_name, service_name, listener.clone());

        if self.delegate.is_subscribed(group_name, service_name, clusters) {
            // already on the wire, catch this listener up locally
            if let Some(info) = self
                .holder
                .get_service_info(service_name, group_name, clusters)
            {
                listener(&InstancesChangeEvent {
                    service_name: service_name.to_string(),
                    group_name: group_name.to_string(),
                    clusters: clusters.to_string(),
                    diff: InstancesDiff::between(None, &info),
                });
            }
            return Ok(id);
        }

        // both outcomes leave the listener registered; a fallback just means
        // events start on the next successful pull or push
        let _ = self.delegate.subscribe(group_name, service_name, clusters).await;
        Ok(id)
    }

    /// Subscribe with a selector; the listener only sees instances the
    /// selector accepts, and changes invisible through it are suppressed.
    pub async fn subscribe_with_selector(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
        selector: InstanceSelector,
        listener: InstanceListener,
    ) -> Result<ListenerId> {
        let id = self.notifier.register_selector_listener(
            group_name,
            service_name,
            selector,
            listener.clone(),
        );

        if self.delegate.is_subscribed(group_name, service_name, clusters) {
            if let Some(info) = self
                .holder
                .get_service_info(service_name, group_name, clusters)
            {
                let mut diff = InstancesDiff::between(None, &info);
                diff.added.retain(|i| selector(i));
                if diff.has_changed() {
                    listener(&InstancesChangeEvent {
                        service_name: service_name.to_string(),
                        group_name: group_name.to_string(),
                        clusters: clusters.to_string(),
                        diff,
                    });
                }
            }
            return Ok(id);
        }

        let _ = self.delegate.subscribe(group_name, service_name, clusters).await;
        Ok(id)
    }

    /// Drop one listener; the last listener out unsubscribes on the wire.
    pub async fn unsubscribe(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
        id: ListenerId,
    ) -> Result<()> {
        self.notifier.deregister_listener(group_name, service_name, id);
        if !self.notifier.is_subscribed(group_name, service_name) {
            self.delegate
                .unsubscribe(group_name, service_name, clusters)
                .await?;
        }
        Ok(())
    }

    pub async fn fuzzy_watch(
        &self,
        group_pattern: &str,
        service_pattern: &str,
        listener: FuzzyWatchEventListener,
    ) -> Result<FuzzyWatcherId> {
        self.fuzzy
            .watch(group_pattern, service_pattern, listener)
            .await
    }

    pub async fn cancel_fuzzy_watch(
        &self,
        group_pattern: &str,
        service_pattern: &str,
        id: FuzzyWatcherId,
    ) -> Result<()> {
        self.fuzzy.cancel(group_pattern, service_pattern, id).await
    }

    /// Feed a pushed snapshot into the local cache, as the push channel
    /// would on receipt.
    pub fn process_push(&self, info: ServiceInfo) {
        self.holder.process_service_info(info);
    }

    /// Feed a fuzzy watch push for a pattern.
    pub fn process_fuzzy_push(&self, pattern: &str, service_key: &str, change_type: &str) {
        self.fuzzy.on_server_push(pattern, service_key, change_type);
    }

    pub async fn get_services_of_server(
        &self,
        group_name: &str,
        page_no: usize,
        page_size: usize,
    ) -> Result<(usize, Vec<String>)> {
        self.delegate
            .transport()
            .get_services_of_server(self.delegate.namespace(), group_name, page_no, page_size)
            .await
    }

    /// `UP` when the server answers health probes, `DOWN` otherwise.
    pub async fn get_server_status(&self) -> &'static str {
        if self.delegate.transport().server_healthy().await {
            "UP"
        } else {
            "DOWN"
        }
    }

    /// Replay registrations and subscriptions after a reconnect.
    pub async fn redo(&self) {
        self.delegate.redo().await;
    }

    /// Release all local listener and watch state. Server-side resources
    /// lapse with the connection; no release RPCs are issued.
    pub fn shutdown(&self) {
        info!("Naming client shutting down");
        self.notifier.clear();
        self.fuzzy.clear();
    }
}
