//! Config storage behind a trait
//!
//! The publish pipeline talks to storage only through `ConfigRepository`;
//! the in-memory implementation backs tests and single-node deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use farol_api::config::model::{ConfigGrayInfo, ConfigInfo};
use farol_api::model::config_group_key;
use farol_common::FarolError;

/// Storage operations for formal and gray config records
///
/// The CAS variants compare the stored md5 against `expected_md5` and
/// return `false` without writing on mismatch. An empty `expected_md5`
/// means "expect no existing record".
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    async fn find(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Option<ConfigInfo>, FarolError>;

    async fn insert_or_update(&self, info: &ConfigInfo) -> Result<(), FarolError>;

    async fn insert_or_update_cas(
        &self,
        info: &ConfigInfo,
        expected_md5: &str,
    ) -> Result<bool, FarolError>;

    async fn remove(&self, data_id: &str, group: &str, tenant: &str) -> Result<bool, FarolError>;

    async fn find_gray(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
        gray_name: &str,
    ) -> Result<Option<ConfigGrayInfo>, FarolError>;

    /// All gray records for one config identity.
    async fn find_grays(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Vec<ConfigGrayInfo>, FarolError>;

    async fn insert_or_update_gray(&self, info: &ConfigGrayInfo) -> Result<(), FarolError>;

    async fn insert_or_update_gray_cas(
        &self,
        info: &ConfigGrayInfo,
        expected_md5: &str,
    ) -> Result<bool, FarolError>;

    async fn remove_gray(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
        gray_name: &str,
    ) -> Result<bool, FarolError>;

    /// Full dump, for export and admin listing.
    async fn find_all(&self) -> Result<Vec<ConfigInfo>, FarolError>;
}

/// DashMap-backed repository
#[derive(Default)]
pub struct MemoryConfigRepository {
    configs: DashMap<String, ConfigInfo>,
    /// group key -> gray name -> record
    grays: DashMap<String, HashMap<String, ConfigGrayInfo>>,
}

impl MemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cas_ok(existing_md5: Option<&str>, expected_md5: &str) -> bool {
    match existing_md5 {
        Some(md5) => md5 == expected_md5,
        None => expected_md5.is_empty(),
    }
}

#[async_trait]
impl ConfigRepository for MemoryConfigRepository {
    async fn find(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Option<ConfigInfo>, FarolError> {
        let key = config_group_key(data_id, group, tenant);
        Ok(self.configs.get(&key).map(|e| e.value().clone()))
    }

    async fn insert_or_update(&self, info: &ConfigInfo) -> Result<(), FarolError> {
        self.configs.insert(info.group_key(), info.clone());
        Ok(())
    }

    async fn insert_or_update_cas(
        &self,
        info: &ConfigInfo,
        expected_md5: &str,
    ) -> Result<bool, FarolError> {
        let key = info.group_key();
        // entry() holds the shard lock so compare-and-swap is atomic
        match self.configs.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().md5 != expected_md5 {
                    return Ok(false);
                }
                entry.insert(info.clone());
                Ok(true)
            }
            Entry::Vacant(entry) => {
                if !expected_md5.is_empty() {
                    return Ok(false);
                }
                entry.insert(info.clone());
                Ok(true)
            }
        }
    }

    async fn remove(&self, data_id: &str, group: &str, tenant: &str) -> Result<bool, FarolError> {
        let key = config_group_key(data_id, group, tenant);
        self.grays.remove(&key);
        Ok(self.configs.remove(&key).is_some())
    }

    async fn find_gray(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
        gray_name: &str,
    ) -> Result<Option<ConfigGrayInfo>, FarolError> {
        let key = config_group_key(data_id, group, tenant);
        Ok(self
            .grays
            .get(&key)
            .and_then(|e| e.value().get(gray_name).cloned()))
    }

    async fn find_grays(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Vec<ConfigGrayInfo>, FarolError> {
        let key = config_group_key(data_id, group, tenant);
        Ok(self
            .grays
            .get(&key)
            .map(|e| e.value().values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_or_update_gray(&self, info: &ConfigGrayInfo) -> Result<(), FarolError> {
        self.grays
            .entry(info.config_info.group_key())
            .or_default()
            .insert(info.gray_name.clone(), info.clone());
        Ok(())
    }

    async fn insert_or_update_gray_cas(
        &self,
        info: &ConfigGrayInfo,
        expected_md5: &str,
    ) -> Result<bool, FarolError> {
        let mut grays = self.grays.entry(info.config_info.group_key()).or_default();
        let existing = grays.get(&info.gray_name).map(|g| g.config_info.md5.as_str());
        if !cas_ok(existing, expected_md5) {
            return Ok(false);
        }
        grays.insert(info.gray_name.clone(), info.clone());
        Ok(true)
    }

    async fn remove_gray(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
        gray_name: &str,
    ) -> Result<bool, FarolError> {
        let key = config_group_key(data_id, group, tenant);
        let Some(mut grays) = self.grays.get_mut(&key) else {
            return Ok(false);
        };
        Ok(grays.remove(gray_name).is_some())
    }

    async fn find_all(&self) -> Result<Vec<ConfigInfo>, FarolError> {
        let mut all: Vec<ConfigInfo> = self.configs.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.group_key().cmp(&b.group_key()));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_find_remove() {
        let repo = MemoryConfigRepository::new();
        let info = ConfigInfo::new("d1", "g1", "public", "v1");
        repo.insert_or_update(&info).await.unwrap();

        let found = repo.find("d1", "g1", "public").await.unwrap().unwrap();
        assert_eq!(found.content, "v1");

        assert!(repo.remove("d1", "g1", "public").await.unwrap());
        assert!(!repo.remove("d1", "g1", "public").await.unwrap());
        assert!(repo.find("d1", "g1", "public").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cas_semantics() {
        let repo = MemoryConfigRepository::new();
        let v1 = ConfigInfo::new("d1", "g1", "", "v1");

        // empty expectation on a vacant slot succeeds
        assert!(repo.insert_or_update_cas(&v1, "").await.unwrap());
        // empty expectation on an occupied slot fails
        let v2 = ConfigInfo::new("d1", "g1", "", "v2");
        assert!(!repo.insert_or_update_cas(&v2, "").await.unwrap());
        // correct md5 succeeds
        assert!(repo.insert_or_update_cas(&v2, &v1.md5).await.unwrap());
        // stale md5 fails and writes nothing
        let v3 = ConfigInfo::new("d1", "g1", "", "v3");
        assert!(!repo.insert_or_update_cas(&v3, &v1.md5).await.unwrap());
        assert_eq!(
            repo.find("d1", "g1", "").await.unwrap().unwrap().content,
            "v2"
        );
    }

    #[tokio::test]
    async fn test_gray_records_keyed_by_name() {
        let repo = MemoryConfigRepository::new();
        let beta = ConfigGrayInfo::new(ConfigInfo::new("d1", "g1", "", "beta-v"), "beta", "{}");
        let tag = ConfigGrayInfo::new(ConfigInfo::new("d1", "g1", "", "tag-v"), "tag_canary", "{}");
        repo.insert_or_update_gray(&beta).await.unwrap();
        repo.insert_or_update_gray(&tag).await.unwrap();

        assert_eq!(repo.find_grays("d1", "g1", "").await.unwrap().len(), 2);
        let found = repo.find_gray("d1", "g1", "", "beta").await.unwrap().unwrap();
        assert_eq!(found.config_info.content, "beta-v");

        assert!(repo.remove_gray("d1", "g1", "", "beta").await.unwrap());
        assert!(!repo.remove_gray("d1", "g1", "", "beta").await.unwrap());
        assert_eq!(repo.find_grays("d1", "g1", "").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_config_drops_grays() {
        let repo = MemoryConfigRepository::new();
        repo.insert_or_update(&ConfigInfo::new("d1", "g1", "", "v1"))
            .await
            .unwrap();
        repo.insert_or_update_gray(&ConfigGrayInfo::new(
            ConfigInfo::new("d1", "g1", "", "beta-v"),
            "beta",
            "{}",
        ))
        .await
        .unwrap();

        repo.remove("d1", "g1", "").await.unwrap();
        assert!(repo.find_grays("d1", "g1", "").await.unwrap().is_empty());
    }
}
