//! Distro protocol API models
//!
//! Request/response envelopes for server-to-server replication of ephemeral
//! registry data. All operations are idempotent at the receiver; conflicts
//! are resolved last-writer-wins by the embedded version.

use serde::{Deserialize, Serialize};

use farol_common::now_millis;

/// Distro operation kind
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistroOp {
    #[default]
    Add,
    Change,
    Delete,
    Verify,
    Snapshot,
    Query,
}

impl std::fmt::Display for DistroOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DistroOp::Add => "ADD",
            DistroOp::Change => "CHANGE",
            DistroOp::Delete => "DELETE",
            DistroOp::Verify => "VERIFY",
            DistroOp::Snapshot => "SNAPSHOT",
            DistroOp::Query => "QUERY",
        };
        write!(f, "{}", s)
    }
}

/// Responsibility key for a distro data item
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroKey {
    /// Data type name, e.g. "NAMING_INSTANCE"
    pub resource_type: String,
    /// Item key within the type, e.g. a grouped service key
    pub resource_key: String,
}

impl DistroKey {
    pub fn new(resource_type: &str, resource_key: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            resource_key: resource_key.to_string(),
        }
    }
}

/// A replicated data item, or a tombstone when `content` is `None`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroData {
    pub key: DistroKey,
    /// Serialized payload (JSON); `None` marks a deletion tombstone
    pub content: Option<String>,
    /// Version/timestamp for last-writer-wins conflict resolution
    pub version: i64,
    /// Source node address
    pub source: String,
}

impl DistroData {
    pub fn new(key: DistroKey, content: String, source: &str) -> Self {
        Self {
            key,
            content: Some(content),
            version: now_millis(),
            source: source.to_string(),
        }
    }

    pub fn tombstone(key: DistroKey, source: &str) -> Self {
        Self {
            key,
            content: None,
            version: now_millis(),
            source: source.to_string(),
        }
    }
}

/// Incremental push of one item's new state or tombstone
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroSyncRequest {
    pub op: DistroOp,
    pub data: DistroData,
}

/// "I still own key K with checksum C" assertion
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroVerifyRequest {
    pub key: DistroKey,
    pub checksum: String,
    pub version: i64,
    pub source: String,
}

/// Full dump request for one data type
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroSnapshotRequest {
    pub resource_type: String,
}

/// Pull of a specific key's current value
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroQueryRequest {
    pub key: DistroKey,
}

/// Generic distro peer response
///
/// Handler failures are carried here as an error code instead of crashing
/// the receiving handler loop.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroResponse {
    pub success: bool,
    pub error_code: i32,
    pub message: String,
}

impl DistroResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error_code: 0,
            message: String::new(),
        }
    }

    pub fn fail(error_code: i32, message: &str) -> Self {
        Self {
            success: false,
            error_code,
            message: message.to_string(),
        }
    }
}

/// Response to a snapshot request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroSnapshotResponse {
    #[serde(flatten)]
    pub response: DistroResponse,
    pub snapshot: Vec<DistroData>,
}

/// Response to a query request
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistroQueryResponse {
    #[serde(flatten)]
    pub response: DistroResponse,
    pub data: Option<DistroData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distro_op_display() {
        assert_eq!(DistroOp::Verify.to_string(), "VERIFY");
        assert_eq!(DistroOp::Snapshot.to_string(), "SNAPSHOT");
    }

    #[test]
    fn test_distro_data_versioned() {
        let key = DistroKey::new("NAMING_INSTANCE", "public@@G1@@s1");
        let data = DistroData::new(key.clone(), "{}".to_string(), "127.0.0.1:8848");
        assert!(data.version > 0);
        assert!(data.content.is_some());

        let tomb = DistroData::tombstone(key, "127.0.0.1:8848");
        assert!(tomb.content.is_none());
    }

    #[test]
    fn test_response_fail_carries_code() {
        let resp = DistroResponse::fail(30000, "handler error");
        assert!(!resp.success);
        assert_eq!(resp.error_code, 30000);

        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("errorCode"));
    }
}
