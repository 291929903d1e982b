//! Server proxy delegate for naming operations
//!
//! All naming RPCs go through `NamingTransport`; the delegate layers the
//! client's desired state on top. Registrations and subscriptions are
//! recorded before the RPC is attempted, so a reconnect can replay them
//! with `redo` even when the original call failed mid-flight.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use farol_api::model::grouped_service_name;
use farol_api::naming::model::{Instance, ServiceInfo};

use crate::error::Result;
use crate::naming::service_info_holder::ServiceInfoHolder;

/// Wire operations against the naming server
#[async_trait]
pub trait NamingTransport: Send + Sync {
    async fn register_instance(
        &self,
        namespace: &str,
        group_name: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<()>;

    async fn batch_register_instance(
        &self,
        namespace: &str,
        group_name: &str,
        service_name: &str,
        instances: Vec<Instance>,
    ) -> Result<()>;

    async fn deregister_instance(
        &self,
        namespace: &str,
        group_name: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<()>;

    async fn query_instances(
        &self,
        namespace: &str,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<ServiceInfo>;

    async fn subscribe(
        &self,
        namespace: &str,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<ServiceInfo>;

    async fn unsubscribe(
        &self,
        namespace: &str,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<()>;

    /// Returns the service keys initially matching the pattern.
    async fn fuzzy_watch(&self, namespace: &str, pattern: &str) -> Result<Vec<String>>;

    async fn cancel_fuzzy_watch(&self, namespace: &str, pattern: &str) -> Result<()>;

    async fn get_services_of_server(
        &self,
        namespace: &str,
        group_name: &str,
        page_no: usize,
        page_size: usize,
    ) -> Result<(usize, Vec<String>)>;

    async fn server_healthy(&self) -> bool;
}

/// Result of a subscribe attempt
///
/// A transport failure degrades to the best cached value instead of an
/// error, preserving availability over freshness.
#[derive(Clone, Debug)]
pub enum SubscribeOutcome {
    /// Server responded; the snapshot is current
    Fresh(ServiceInfo),
    /// Transport failed; whatever the cache held, possibly nothing
    CachedFallback(Option<ServiceInfo>),
}

impl SubscribeOutcome {
    pub fn service_info(&self) -> Option<&ServiceInfo> {
        match self {
            SubscribeOutcome::Fresh(info) => Some(info),
            SubscribeOutcome::CachedFallback(info) => info.as_ref(),
        }
    }
}

#[derive(Clone)]
struct RegistrationRecord {
    group_name: String,
    service_name: String,
    instance: Instance,
}

#[derive(Clone)]
struct SubscriptionRecord {
    group_name: String,
    service_name: String,
    clusters: String,
}

/// Stateful proxy over the naming transport
pub struct NamingClientProxyDelegate {
    namespace: String,
    transport: Arc<dyn NamingTransport>,
    holder: Arc<ServiceInfoHolder>,
    registrations: DashMap<String, RegistrationRecord>,
    subscriptions: DashMap<String, SubscriptionRecord>,
}

impl NamingClientProxyDelegate {
    pub fn new(
        namespace: &str,
        transport: Arc<dyn NamingTransport>,
        holder: Arc<ServiceInfoHolder>,
    ) -> Self {
        Self {
            namespace: namespace.to_string(),
            transport,
            holder,
            registrations: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }

    fn registration_key(group_name: &str, service_name: &str, instance: &Instance) -> String {
        format!(
            "{}@@{}",
            grouped_service_name(group_name, service_name),
            instance.key()
        )
    }

    fn subscription_key(group_name: &str, service_name: &str, clusters: &str) -> String {
        ServiceInfo::new(service_name, group_name, clusters).key()
    }

    /// Register one instance. The desired registration is recorded before
    /// the RPC so it survives into `redo` on failure.
    pub async fn register_instance(
        &self,
        group_name: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<()> {
        self.registrations.insert(
            Self::registration_key(group_name, service_name, &instance),
            RegistrationRecord {
                group_name: group_name.to_string(),
                service_name: service_name.to_string(),
                instance: instance.clone(),
            },
        );
        self.transport
            .register_instance(&self.namespace, group_name, service_name, instance)
            .await
    }

    pub async fn batch_register_instance(
        &self,
        group_name: &str,
        service_name: &str,
        instances: Vec<Instance>,
    ) -> Result<()> {
        for instance in &instances {
            self.registrations.insert(
                Self::registration_key(group_name, service_name, instance),
                RegistrationRecord {
                    group_name: group_name.to_string(),
                    service_name: service_name.to_string(),
                    instance: instance.clone(),
                },
            );
        }
        self.transport
            .batch_register_instance(&self.namespace, group_name, service_name, instances)
            .await
    }

    /// Deregister one instance. The desired-state record goes first so a
    /// failed RPC is not replayed as a registration on reconnect.
    pub async fn deregister_instance(
        &self,
        group_name: &str,
        service_name: &str,
        instance: Instance,
    ) -> Result<()> {
        self.registrations
            .remove(&Self::registration_key(group_name, service_name, &instance));
        self.transport
            .deregister_instance(&self.namespace, group_name, service_name, instance)
            .await
    }

    pub async fn query_instances(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<ServiceInfo> {
        let info = self
            .transport
            .query_instances(&self.namespace, group_name, service_name, clusters)
            .await?;
        Ok(self.holder.process_service_info(info))
    }

    /// Subscribe to a service. On transport failure the call degrades to
    /// the cached snapshot with a warning instead of surfacing an error.
    pub async fn subscribe(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> SubscribeOutcome {
        self.subscriptions.insert(
            Self::subscription_key(group_name, service_name, clusters),
            SubscriptionRecord {
                group_name: group_name.to_string(),
                service_name: service_name.to_string(),
                clusters: clusters.to_string(),
            },
        );
        match self
            .transport
            .subscribe(&self.namespace, group_name, service_name, clusters)
            .await
        {
            Ok(info) => SubscribeOutcome::Fresh(self.holder.process_service_info(info)),
            Err(e) => {
                warn!(
                    "Subscribe to {}@@{} failed, falling back to cache: {}",
                    group_name, service_name, e
                );
                SubscribeOutcome::CachedFallback(self.holder.get_service_info(
                    service_name,
                    group_name,
                    clusters,
                ))
            }
        }
    }

    /// Unsubscribe is idempotent: with no recorded subscription the call
    /// is a no-op and no RPC is made.
    pub async fn unsubscribe(
        &self,
        group_name: &str,
        service_name: &str,
        clusters: &str,
    ) -> Result<()> {
        if self
            .subscriptions
            .remove(&Self::subscription_key(group_name, service_name, clusters))
            .is_none()
        {
            return Ok(());
        }
        self.transport
            .unsubscribe(&self.namespace, group_name, service_name, clusters)
            .await
    }

    pub fn is_subscribed(&self, group_name: &str, service_name: &str, clusters: &str) -> bool {
        self.subscriptions
            .contains_key(&Self::subscription_key(group_name, service_name, clusters))
    }

    /// Replay every recorded registration and subscription after a
    /// reconnect. Individual failures are logged and skipped; the rest of
    /// the state still gets replayed.
    pub async fn redo(&self) {
        let registrations: Vec<RegistrationRecord> = self
            .registrations
            .iter()
            .map(|e| e.value().clone())
            .collect();
        info!(
            "Redo after reconnect: {} registrations, {} subscriptions",
            registrations.len(),
            self.subscriptions.len()
        );
        for record in registrations {
            if let Err(e) = self
                .transport
                .register_instance(
                    &self.namespace,
                    &record.group_name,
                    &record.service_name,
                    record.instance.clone(),
                )
                .await
            {
                warn!(
                    "Redo registration failed for {}@@{}: {}",
                    record.group_name, record.service_name, e
                );
            }
        }

        let subscriptions: Vec<SubscriptionRecord> = self
            .subscriptions
            .iter()
            .map(|e| e.value().clone())
            .collect();
        for record in subscriptions {
            match self
                .transport
                .subscribe(
                    &self.namespace,
                    &record.group_name,
                    &record.service_name,
                    &record.clusters,
                )
                .await
            {
                Ok(info) => {
                    self.holder.process_service_info(info);
                }
                Err(e) => {
                    warn!(
                        "Redo subscription failed for {}@@{}: {}",
                        record.group_name, record.service_name, e
                    );
                }
            }
        }
    }

    pub fn transport(&self) -> &Arc<dyn NamingTransport> {
        &self.transport
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use crate::error::ClientError;
    use crate::naming::notifier::InstancesChangeNotifier;

    #[derive(Default)]
    struct MockTransport {
        fail: AtomicBool,
        register_calls: AtomicUsize,
        subscribe_calls: AtomicUsize,
        unsubscribe_calls: AtomicUsize,
        registered: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn check(&self) -> Result<()> {
            if self.fail.load(Ordering::Acquire) {
                Err(ClientError::NotConnected)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl NamingTransport for MockTransport {
        async fn register_instance(
            &self,
            _namespace: &str,
            group_name: &str,
            service_name: &str,
            instance: Instance,
        ) -> Result<()> {
            self.register_calls.fetch_add(1, Ordering::AcqRel);
            self.check()?;
            self.registered.lock().unwrap().push(format!(
                "{}@@{}@@{}",
                group_name,
                service_name,
                instance.key()
            ));
            Ok(())
        }

        async fn batch_register_instance(
            &self,
            _namespace: &str,
            _group_name: &str,
            _service_name: &str,
            _instances: Vec<Instance>,
        ) -> Result<()> {
            self.check()
        }

        async fn deregister_instance(
            &self,
            _namespace: &str,
            _group_name: &str,
            _service_name: &str,
            _instance: Instance,
        ) -> Result<()> {
            self.check()
        }

        async fn query_instances(
            &self,
            _namespace: &str,
            group_name: &str,
            service_name: &str,
            clusters: &str,
        ) -> Result<ServiceInfo> {
            self.check()?;
            Ok(ServiceInfo::new(service_name, group_name, clusters))
        }

        async fn subscribe(
            &self,
            _namespace: &str,
            group_name: &str,
            service_name: &str,
            clusters: &str,
        ) -> Result<ServiceInfo> {
            self.subscribe_calls.fetch_add(1, Ordering::AcqRel);
            self.check()?;
            let mut info = ServiceInfo::new(service_name, group_name, clusters);
            info.hosts = vec![Instance::builder("1.1.1.1", 80).build().unwrap()];
            Ok(info)
        }

        async fn unsubscribe(
            &self,
            _namespace: &str,
            _group_name: &str,
            _service_name: &str,
            _clusters: &str,
        ) -> Result<()> {
            self.unsubscribe_calls.fetch_add(1, Ordering::AcqRel);
            self.check()
        }

        async fn fuzzy_watch(&self, _namespace: &str, _pattern: &str) -> Result<Vec<String>> {
            self.check()?;
            Ok(Vec::new())
        }

        async fn cancel_fuzzy_watch(&self, _namespace: &str, _pattern: &str) -> Result<()> {
            self.check()
        }

        async fn get_services_of_server(
            &self,
            _namespace: &str,
            _group_name: &str,
            _page_no: usize,
            _page_size: usize,
        ) -> Result<(usize, Vec<String>)> {
            self.check()?;
            Ok((0, Vec::new()))
        }

        async fn server_healthy(&self) -> bool {
            !self.fail.load(Ordering::Acquire)
        }
    }

    fn delegate() -> (
        tempfile::TempDir,
        Arc<MockTransport>,
        NamingClientProxyDelegate,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::default());
        let holder = ServiceInfoHolder::new(
            dir.path(),
            Arc::new(InstancesChangeNotifier::new()),
        )
        .unwrap();
        let delegate = NamingClientProxyDelegate::new("public", transport.clone(), holder);
        (dir, transport, delegate)
    }

    fn instance() -> Instance {
        Instance::builder("1.1.1.1", 80).build().unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_fresh_updates_cache() {
        let (_dir, _transport, delegate) = delegate();
        let outcome = delegate.subscribe("G1", "s1", "").await;
        assert!(matches!(outcome, SubscribeOutcome::Fresh(_)));
        assert_eq!(outcome.service_info().unwrap().hosts.len(), 1);
        assert!(delegate.is_subscribed("G1", "s1", ""));
    }

    #[tokio::test]
    async fn test_subscribe_failure_falls_back_to_cache() {
        let (_dir, transport, delegate) = delegate();
        // seed the cache with one successful subscribe
        delegate.subscribe("G1", "s1", "").await;

        transport.fail.store(true, Ordering::Release);
        let outcome = delegate.subscribe("G1", "s1", "").await;
        match outcome {
            SubscribeOutcome::CachedFallback(Some(info)) => assert_eq!(info.hosts.len(), 1),
            other => panic!("expected cached fallback, got {:?}", other),
        }
        // desired state recorded even though the RPC failed
        assert!(delegate.is_subscribed("G1", "s1", ""));
    }

    #[tokio::test]
    async fn test_subscribe_failure_with_cold_cache() {
        let (_dir, transport, delegate) = delegate();
        transport.fail.store(true, Ordering::Release);
        let outcome = delegate.subscribe("G1", "s1", "").await;
        assert!(matches!(outcome, SubscribeOutcome::CachedFallback(None)));
    }

    #[tokio::test]
    async fn test_unsubscribe_idempotent() {
        let (_dir, transport, delegate) = delegate();
        delegate.subscribe("G1", "s1", "").await;

        delegate.unsubscribe("G1", "s1", "").await.unwrap();
        delegate.unsubscribe("G1", "s1", "").await.unwrap();
        delegate.unsubscribe("G1", "s1", "").await.unwrap();
        // only the first removal reached the wire
        assert_eq!(transport.unsubscribe_calls.load(Ordering::Acquire), 1);
        assert!(!delegate.is_subscribed("G1", "s1", ""));
    }

    #[tokio::test]
    async fn test_redo_replays_failed_registration() {
        let (_dir, transport, delegate) = delegate();
        transport.fail.store(true, Ordering::Release);
        assert!(delegate.register_instance("G1", "s1", instance()).await.is_err());
        delegate.subscribe("G1", "s1", "").await;

        transport.fail.store(false, Ordering::Release);
        delegate.redo().await;

        assert_eq!(transport.registered.lock().unwrap().len(), 1);
        // 1 failed subscribe + 1 redo subscribe
        assert_eq!(transport.subscribe_calls.load(Ordering::Acquire), 2);
    }

    #[tokio::test]
    async fn test_deregistered_instance_not_replayed() {
        let (_dir, transport, delegate) = delegate();
        delegate.register_instance("G1", "s1", instance()).await.unwrap();
        delegate.deregister_instance("G1", "s1", instance()).await.unwrap();

        transport.registered.lock().unwrap().clear();
        delegate.redo().await;
        assert!(transport.registered.lock().unwrap().is_empty());
    }
}
