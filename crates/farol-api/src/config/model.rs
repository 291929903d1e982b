//! Configuration API models
//!
//! A config identity is `(data_id, group, tenant)`. Gray variants extend the
//! identity with a gray name and carry a serialized matching rule.

use serde::{Deserialize, Serialize};

use farol_common::{md5_hex, now_millis};

use crate::model::config_group_key;

/// Fixed gray name used for beta (ip-list) releases
pub const BETA_GRAY_NAME: &str = "beta";

/// Prefix for tag gray names: `tag_<tag>`
pub const TAG_GRAY_NAME_PREFIX: &str = "tag_";

/// A published configuration document
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigInfo {
    pub data_id: String,
    pub group: String,
    /// Namespace id; the wire protocols call this "tenant"
    pub tenant: String,
    pub content: String,
    pub md5: String,
    pub r#type: String,
    pub app_name: String,
    pub encrypted_data_key: String,
    /// Last-modified timestamp in epoch millis
    pub last_modified: i64,
}

impl ConfigInfo {
    pub fn new(data_id: &str, group: &str, tenant: &str, content: &str) -> Self {
        Self {
            data_id: data_id.to_string(),
            group: group.to_string(),
            tenant: tenant.to_string(),
            content: content.to_string(),
            md5: md5_hex(content),
            last_modified: now_millis(),
            ..Default::default()
        }
    }

    /// `dataId+group+tenant` join key.
    pub fn group_key(&self) -> String {
        config_group_key(&self.data_id, &self.group, &self.tenant)
    }
}

/// A gray variant of a configuration document
///
/// At most one gray record exists per `(config identity, gray name)`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigGrayInfo {
    #[serde(flatten)]
    pub config_info: ConfigInfo,
    /// Gray channel name: "beta", "tag_xxx", or a custom name
    pub gray_name: String,
    /// Serialized gray rule (type, version, expr, priority)
    pub gray_rule: String,
}

impl ConfigGrayInfo {
    pub fn new(config_info: ConfigInfo, gray_name: &str, gray_rule: &str) -> Self {
        Self {
            config_info,
            gray_name: gray_name.to_string(),
            gray_rule: gray_rule.to_string(),
        }
    }

    /// Gray name for a tag release.
    pub fn tag_gray_name(tag: &str) -> String {
        format!("{}{}", TAG_GRAY_NAME_PREFIX, tag)
    }
}

/// A config change, published after every successful persist
///
/// Downstream long-poll handlers use this to wake blocked connections; the
/// carried timestamp becomes the new md5-comparison baseline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigChangeEvent {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    /// Gray name when a gray channel changed, `None` for formal publishes
    pub gray_name: Option<String>,
    pub last_modified: i64,
}

impl ConfigChangeEvent {
    pub fn group_key(&self) -> String {
        config_group_key(&self.data_id, &self.group, &self.tenant)
    }
}
