//! Distro handler for ephemeral instance replication
//!
//! Bridges the naming registry to the replication engine. One distro item
//! per service, keyed `namespace@@group@@service`, carrying the full
//! ephemeral instance set as JSON; persistent instances never travel this
//! path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use farol_api::distro::model::{DistroData, DistroKey, DistroOp};
use farol_api::naming::model::Instance;
use farol_common::md5_hex;
use farol_core::DistroDataHandler;

use crate::model::ServiceKey;
use crate::service::NamingService;

/// Distro resource type for ephemeral naming instances
pub const NAMING_INSTANCE_TYPE: &str = "NAMING_INSTANCE";

pub struct NamingInstanceDistroHandler {
    local_address: String,
    naming: Arc<NamingService>,
}

impl NamingInstanceDistroHandler {
    pub fn new(local_address: &str, naming: Arc<NamingService>) -> Self {
        Self {
            local_address: local_address.to_string(),
            naming,
        }
    }

    fn serialize_instances(&self, key: &ServiceKey) -> Option<(String, i64)> {
        let instances = self.naming.ephemeral_instances(key);
        if instances.is_empty() {
            return None;
        }
        let content = serde_json::to_string(&instances).ok()?;
        let version = self.naming.service_last_modified(key)?;
        Some((content, version))
    }
}

#[async_trait]
impl DistroDataHandler for NamingInstanceDistroHandler {
    fn resource_type(&self) -> &str {
        NAMING_INSTANCE_TYPE
    }

    async fn all_keys(&self) -> Vec<String> {
        self.naming.all_service_keys()
    }

    async fn get_data(&self, key: &str) -> Option<DistroData> {
        let service_key = ServiceKey::parse(key)?;
        let (content, version) = self.serialize_instances(&service_key)?;
        Some(DistroData {
            key: DistroKey::new(NAMING_INSTANCE_TYPE, key),
            content: Some(content),
            version,
            source: self.local_address.clone(),
        })
    }

    async fn checksum(&self, key: &str) -> Option<String> {
        let service_key = ServiceKey::parse(key)?;
        let (content, _) = self.serialize_instances(&service_key)?;
        Some(md5_hex(&content))
    }

    async fn apply(&self, op: DistroOp, data: DistroData) -> anyhow::Result<()> {
        let service_key = ServiceKey::parse(&data.key.resource_key)
            .ok_or_else(|| anyhow::anyhow!("malformed service key: {}", data.key.resource_key))?;

        // Last-writer-wins against the local copy's modification time
        if let Some(local_version) = self.naming.service_last_modified(&service_key) {
            if local_version > data.version {
                debug!(
                    "Discarding stale sync for {} (local {} > remote {})",
                    service_key, local_version, data.version
                );
                return Ok(());
            }
        }

        match op {
            DistroOp::Delete => {
                self.naming
                    .replace_ephemeral_instances(&service_key, Vec::new());
            }
            _ => {
                let content = data
                    .content
                    .ok_or_else(|| anyhow::anyhow!("sync without content for {}", service_key))?;
                let instances: Vec<Instance> = serde_json::from_str(&content)?;
                self.naming
                    .replace_ephemeral_instances(&service_key, instances);
            }
        }
        Ok(())
    }

    async fn snapshot(&self) -> Vec<DistroData> {
        let mut snapshot = Vec::new();
        for key in self.naming.all_service_keys() {
            if let Some(data) = self.get_data(&key).await {
                snapshot.push(data);
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Arc<NamingService>, NamingInstanceDistroHandler) {
        let naming = Arc::new(NamingService::new());
        let handler = NamingInstanceDistroHandler::new("127.0.0.1:8848", naming.clone());
        (naming, handler)
    }

    fn key(name: &str) -> ServiceKey {
        ServiceKey::new("public", "DEFAULT_GROUP", name)
    }

    fn instance(ip: &str) -> Instance {
        Instance::builder(ip, 8080).build().unwrap()
    }

    #[tokio::test]
    async fn test_get_data_ephemeral_only() {
        let (naming, handler) = setup();
        let k = key("s1");
        naming.register_instance(&k, instance("1.1.1.1"), None).unwrap();
        let persistent = Instance::builder("1.1.1.2", 8080).ephemeral(false).build().unwrap();
        naming.register_instance(&k, persistent, None).unwrap();

        let data = handler.get_data(&k.key()).await.unwrap();
        let instances: Vec<Instance> =
            serde_json::from_str(data.content.as_deref().unwrap()).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].ip, "1.1.1.1");
        assert!(data.version > 0);
    }

    #[tokio::test]
    async fn test_apply_replaces_instance_set() {
        let (naming, handler) = setup();
        let k = key("s1");

        let instances = vec![instance("2.2.2.1"), instance("2.2.2.2")];
        let content = serde_json::to_string(&instances).unwrap();
        let data = DistroData::new(
            DistroKey::new(NAMING_INSTANCE_TYPE, &k.key()),
            content,
            "10.0.0.2:8848",
        );
        handler.apply(DistroOp::Add, data).await.unwrap();

        assert_eq!(naming.get_instances(&k, "", false).len(), 2);
    }

    #[tokio::test]
    async fn test_apply_stale_version_discarded() {
        let (naming, handler) = setup();
        let k = key("s1");
        naming.register_instance(&k, instance("1.1.1.1"), None).unwrap();

        let instances = vec![instance("9.9.9.9")];
        let data = DistroData {
            key: DistroKey::new(NAMING_INSTANCE_TYPE, &k.key()),
            content: Some(serde_json::to_string(&instances).unwrap()),
            version: 1, // far in the past
            source: "10.0.0.2:8848".to_string(),
        };
        handler.apply(DistroOp::Change, data).await.unwrap();

        let current = naming.get_instances(&k, "", false);
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].ip, "1.1.1.1");
    }

    #[tokio::test]
    async fn test_apply_delete_clears_service() {
        let (naming, handler) = setup();
        let k = key("s1");
        naming.register_instance(&k, instance("1.1.1.1"), None).unwrap();

        let tomb = DistroData::tombstone(
            DistroKey::new(NAMING_INSTANCE_TYPE, &k.key()),
            "10.0.0.2:8848",
        );
        handler.apply(DistroOp::Delete, tomb).await.unwrap();
        assert!(naming.all_service_keys().is_empty());
    }

    #[tokio::test]
    async fn test_checksum_stable_for_same_set() {
        let (naming, handler) = setup();
        let k = key("s1");
        naming.register_instance(&k, instance("1.1.1.1"), None).unwrap();
        naming.register_instance(&k, instance("1.1.1.2"), None).unwrap();

        let a = handler.checksum(&k.key()).await.unwrap();
        let b = handler.checksum(&k.key()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_snapshot_covers_all_services() {
        let (naming, handler) = setup();
        for i in 0..3 {
            naming
                .register_instance(&key(&format!("s{}", i)), instance("1.1.1.1"), None)
                .unwrap();
        }
        let snapshot = handler.snapshot().await;
        assert_eq!(snapshot.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_key_is_error() {
        let (_naming, handler) = setup();
        let data = DistroData::new(
            DistroKey::new(NAMING_INSTANCE_TYPE, "not-a-service-key"),
            "[]".to_string(),
            "10.0.0.2:8848",
        );
        assert!(handler.apply(DistroOp::Add, data).await.is_err());
    }
}
