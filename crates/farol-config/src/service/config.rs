//! Config publish pipeline and read path
//!
//! Every write runs validate -> route -> persist -> notify -> trace. CAS
//! writes reject on md5 mismatch with nothing persisted or notified. The
//! read path resolves gray channels against the caller's labels in
//! descending rule priority before falling back to the formal record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use farol_api::config::model::{
    BETA_GRAY_NAME, ConfigChangeEvent, ConfigGrayInfo, ConfigInfo,
};
use farol_api::validation::{
    validate_content, validate_data_id, validate_group, validate_namespace_id, validate_tag,
};
use farol_common::{FarolError, error};

use crate::model::gray_rule::GrayRule;
use crate::repository::ConfigRepository;

/// Default cap on distinct gray names per config identity
pub const DEFAULT_MAX_GRAY_COUNT: usize = 10;

/// The config service
pub struct ConfigService {
    repository: Arc<dyn ConfigRepository>,
    /// New gray names beyond this cap are rejected; existing names may
    /// still be updated
    max_gray_count: usize,
    event_tx: broadcast::Sender<ConfigChangeEvent>,
}

impl ConfigService {
    pub fn new(repository: Arc<dyn ConfigRepository>) -> Self {
        Self::with_max_gray_count(repository, DEFAULT_MAX_GRAY_COUNT)
    }

    pub fn with_max_gray_count(repository: Arc<dyn ConfigRepository>, max_gray_count: usize) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            repository,
            max_gray_count,
            event_tx,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.event_tx.subscribe()
    }

    fn validate_identity(info: &ConfigInfo) -> Result<(), FarolError> {
        validate_data_id(&info.data_id)
            .map_err(|e| FarolError::IllegalArgument(e.to_string()))?;
        validate_group(&info.group).map_err(|e| FarolError::IllegalArgument(e.to_string()))?;
        validate_namespace_id(&info.tenant)
            .map_err(|e| FarolError::IllegalArgument(e.to_string()))?;
        validate_content(&info.content).map_err(|e| FarolError::IllegalArgument(e.to_string()))?;
        Ok(())
    }

    /// Publish a formal config (upsert).
    pub async fn publish_config(&self, info: ConfigInfo) -> Result<(), FarolError> {
        Self::validate_identity(&info)?;
        self.repository.insert_or_update(&info).await?;
        self.notify(&info, None);
        Ok(())
    }

    /// Publish a formal config only if the stored md5 still equals
    /// `expected_md5`. A mismatch is a conflict; nothing is persisted or
    /// notified.
    pub async fn publish_config_cas(
        &self,
        info: ConfigInfo,
        expected_md5: &str,
    ) -> Result<(), FarolError> {
        Self::validate_identity(&info)?;
        if !self
            .repository
            .insert_or_update_cas(&info, expected_md5)
            .await?
        {
            return Err(FarolError::api(error::RESOURCE_CONFLICT));
        }
        self.notify(&info, None);
        Ok(())
    }

    /// Publish a beta release visible to the listed client ips.
    pub async fn publish_beta(
        &self,
        info: ConfigInfo,
        ips: &str,
    ) -> Result<(), FarolError> {
        let rule = GrayRule::beta(ips);
        self.publish_gray_rule(info, BETA_GRAY_NAME, rule).await
    }

    /// Publish a tag release visible to clients carrying the tag.
    pub async fn publish_tag(&self, info: ConfigInfo, tag: &str) -> Result<(), FarolError> {
        validate_tag(tag).map_err(|e| FarolError::IllegalArgument(e.to_string()))?;
        let rule = GrayRule::tag(tag);
        self.publish_gray_rule(info, &ConfigGrayInfo::tag_gray_name(tag), rule)
            .await
    }

    /// Publish a gray release with an already-serialized rule.
    pub async fn publish_gray(
        &self,
        info: ConfigInfo,
        gray_name: &str,
        gray_rule_json: &str,
    ) -> Result<(), FarolError> {
        let rule = GrayRule::parse(gray_rule_json)?;
        self.publish_gray_rule(info, gray_name, rule).await
    }

    async fn publish_gray_rule(
        &self,
        info: ConfigInfo,
        gray_name: &str,
        rule: GrayRule,
    ) -> Result<(), FarolError> {
        Self::validate_identity(&info)?;
        if !rule.is_valid() {
            return Err(FarolError::api(error::CONFIG_GRAY_RULE_FORMAT_INVALID));
        }

        // The cap rejects new names only; updates to an existing gray name
        // always pass.
        let existing = self
            .repository
            .find_grays(&info.data_id, &info.group, &info.tenant)
            .await?;
        let is_new = !existing.iter().any(|g| g.gray_name == gray_name);
        if is_new && existing.len() >= self.max_gray_count {
            return Err(FarolError::api(error::CONFIG_GRAY_OVER_MAX_VERSION_COUNT));
        }

        let gray = ConfigGrayInfo::new(info, gray_name, &rule.to_persist_json());
        self.repository.insert_or_update_gray(&gray).await?;
        self.notify(&gray.config_info, Some(gray_name));
        Ok(())
    }

    /// Resolve the config a labeled client should read: highest-priority
    /// matching gray channel first, formal record as fallback.
    pub async fn get_config(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
        labels: &HashMap<String, String>,
    ) -> Result<Option<ConfigInfo>, FarolError> {
        if !labels.is_empty() {
            let mut grays: Vec<(i32, ConfigGrayInfo)> = self
                .repository
                .find_grays(data_id, group, tenant)
                .await?
                .into_iter()
                .filter_map(|g| {
                    let rule = GrayRule::parse(&g.gray_rule).ok()?;
                    rule.matches(labels).then(|| (rule.priority(), g))
                })
                .collect();
            grays.sort_by(|a, b| b.0.cmp(&a.0));
            if let Some((_, gray)) = grays.into_iter().next() {
                return Ok(Some(gray.config_info));
            }
        }
        self.repository.find(data_id, group, tenant).await
    }

    /// The formal record, ignoring gray channels.
    pub async fn get_config_formal(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Option<ConfigInfo>, FarolError> {
        self.repository.find(data_id, group, tenant).await
    }

    /// Current formal md5 for long-poll comparison.
    pub async fn current_md5(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<Option<String>, FarolError> {
        Ok(self
            .repository
            .find(data_id, group, tenant)
            .await?
            .map(|info| info.md5))
    }

    /// End a beta release.
    pub async fn stop_beta(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<bool, FarolError> {
        self.remove_gray(data_id, group, tenant, BETA_GRAY_NAME)
            .await
    }

    /// Remove one gray channel. Removing an absent channel is not an error.
    pub async fn remove_gray(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
        gray_name: &str,
    ) -> Result<bool, FarolError> {
        let removed = self
            .repository
            .remove_gray(data_id, group, tenant, gray_name)
            .await?;
        if removed {
            let event_info = ConfigInfo::new(data_id, group, tenant, "");
            self.notify(&event_info, Some(gray_name));
        }
        Ok(removed)
    }

    /// Remove the formal record and all its gray channels.
    pub async fn remove_config(
        &self,
        data_id: &str,
        group: &str,
        tenant: &str,
    ) -> Result<bool, FarolError> {
        let removed = self.repository.remove(data_id, group, tenant).await?;
        if removed {
            let event_info = ConfigInfo::new(data_id, group, tenant, "");
            self.notify(&event_info, None);
        }
        Ok(removed)
    }

    pub async fn find_all(&self) -> Result<Vec<ConfigInfo>, FarolError> {
        self.repository.find_all().await
    }

    fn notify(&self, info: &ConfigInfo, gray_name: Option<&str>) {
        info!(
            data_id = %info.data_id,
            group = %info.group,
            tenant = %info.tenant,
            gray = gray_name.unwrap_or("-"),
            md5 = %info.md5,
            "Config persisted"
        );
        let _ = self.event_tx.send(ConfigChangeEvent {
            data_id: info.data_id.clone(),
            group: info.group.clone(),
            tenant: info.tenant.clone(),
            gray_name: gray_name.map(|s| s.to_string()),
            last_modified: info.last_modified,
        });
    }
}
