//! Gray release rules
//!
//! A gray record carries one serialized rule deciding which clients read the
//! gray content instead of the formal one. Rules are matched against the
//! connection labels in descending priority order; beta always outranks tag,
//! custom rules sit below both.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use farol_common::{FarolError, error};

/// Label key carrying the client address
pub const LABEL_CLIENT_IP: &str = "ClientIp";

/// Label key carrying the client's gray tag
pub const LABEL_TAG: &str = "vipServerTag";

/// Serialized rule format version
pub const GRAY_RULE_VERSION: &str = "1.0.0";

/// Serialized form of a gray rule, as stored alongside the gray record
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrayRulePersistInfo {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub version: String,
    pub expr: String,
    pub priority: i32,
}

/// A parsed, validated gray matching rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrayRule {
    /// Matches clients whose ip is in the list
    Beta { ips: HashSet<String> },
    /// Matches clients carrying exactly this tag
    Tag { tag: String },
    /// Matches clients whose labels contain every listed pair
    Custom {
        labels: HashMap<String, String>,
        priority: i32,
    },
}

impl GrayRule {
    /// Priority of the beta channel
    pub const BETA_PRIORITY: i32 = i32::MAX;
    /// Priority of tag channels
    pub const TAG_PRIORITY: i32 = i32::MAX - 1;

    pub fn beta(ips: &str) -> Self {
        GrayRule::Beta {
            ips: ips
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn tag(tag: &str) -> Self {
        GrayRule::Tag {
            tag: tag.trim().to_string(),
        }
    }

    /// Parse and validate a serialized rule. A structurally broken or
    /// semantically empty rule is a client error, code 20011.
    pub fn parse(json: &str) -> Result<Self, FarolError> {
        let info: GrayRulePersistInfo = serde_json::from_str(json)
            .map_err(|_| FarolError::api(error::CONFIG_GRAY_RULE_FORMAT_INVALID))?;
        let rule = match info.rule_type.as_str() {
            "beta" => GrayRule::beta(&info.expr),
            "tag" => GrayRule::tag(&info.expr),
            "custom" => {
                let labels: HashMap<String, String> = serde_json::from_str(&info.expr)
                    .map_err(|_| FarolError::api(error::CONFIG_GRAY_RULE_FORMAT_INVALID))?;
                GrayRule::Custom {
                    labels,
                    priority: info.priority,
                }
            }
            _ => return Err(FarolError::api(error::CONFIG_GRAY_RULE_FORMAT_INVALID)),
        };
        if !rule.is_valid() {
            return Err(FarolError::api(error::CONFIG_GRAY_RULE_FORMAT_INVALID));
        }
        Ok(rule)
    }

    /// Serialize for storage alongside a gray record.
    pub fn to_persist_json(&self) -> String {
        let info = match self {
            GrayRule::Beta { ips } => {
                let mut sorted: Vec<&str> = ips.iter().map(String::as_str).collect();
                sorted.sort();
                GrayRulePersistInfo {
                    rule_type: "beta".to_string(),
                    version: GRAY_RULE_VERSION.to_string(),
                    expr: sorted.join(","),
                    priority: Self::BETA_PRIORITY,
                }
            }
            GrayRule::Tag { tag } => GrayRulePersistInfo {
                rule_type: "tag".to_string(),
                version: GRAY_RULE_VERSION.to_string(),
                expr: tag.clone(),
                priority: Self::TAG_PRIORITY,
            },
            GrayRule::Custom { labels, priority } => GrayRulePersistInfo {
                rule_type: "custom".to_string(),
                version: GRAY_RULE_VERSION.to_string(),
                expr: serde_json::to_string(labels).unwrap_or_default(),
                priority: *priority,
            },
        };
        serde_json::to_string(&info).unwrap_or_default()
    }

    /// Semantic validity: an empty match set can never fire.
    pub fn is_valid(&self) -> bool {
        match self {
            GrayRule::Beta { ips } => !ips.is_empty(),
            GrayRule::Tag { tag } => !tag.is_empty(),
            GrayRule::Custom { labels, priority } => {
                !labels.is_empty() && *priority < Self::TAG_PRIORITY
            }
        }
    }

    /// Match order among concurrent gray channels; highest wins.
    pub fn priority(&self) -> i32 {
        match self {
            GrayRule::Beta { .. } => Self::BETA_PRIORITY,
            GrayRule::Tag { .. } => Self::TAG_PRIORITY,
            GrayRule::Custom { priority, .. } => *priority,
        }
    }

    /// Whether this rule selects a client with the given labels.
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        match self {
            GrayRule::Beta { ips } => labels
                .get(LABEL_CLIENT_IP)
                .is_some_and(|ip| ips.contains(ip)),
            GrayRule::Tag { tag } => labels.get(LABEL_TAG).is_some_and(|t| t == tag),
            GrayRule::Custom {
                labels: wanted, ..
            } => wanted
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|have| have == v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_beta_rule_matches_listed_ip() {
        let rule = GrayRule::beta("192.168.1.1, 192.168.1.2");
        assert!(rule.is_valid());
        assert!(rule.matches(&labels(&[(LABEL_CLIENT_IP, "192.168.1.1")])));
        assert!(!rule.matches(&labels(&[(LABEL_CLIENT_IP, "192.168.1.3")])));
        assert!(!rule.matches(&labels(&[])));
    }

    #[test]
    fn test_tag_rule_exact_match() {
        let rule = GrayRule::tag("canary");
        assert!(rule.matches(&labels(&[(LABEL_TAG, "canary")])));
        assert!(!rule.matches(&labels(&[(LABEL_TAG, "stable")])));
    }

    #[test]
    fn test_custom_rule_requires_all_labels() {
        let rule = GrayRule::Custom {
            labels: labels(&[("region", "eu"), ("env", "staging")]),
            priority: 100,
        };
        assert!(rule.matches(&labels(&[("region", "eu"), ("env", "staging"), ("x", "y")])));
        assert!(!rule.matches(&labels(&[("region", "eu")])));
    }

    #[test]
    fn test_priority_order() {
        let beta = GrayRule::beta("1.2.3.4");
        let tag = GrayRule::tag("canary");
        let custom = GrayRule::Custom {
            labels: labels(&[("k", "v")]),
            priority: 10,
        };
        assert!(beta.priority() > tag.priority());
        assert!(tag.priority() > custom.priority());
    }

    #[test]
    fn test_parse_roundtrip() {
        let rule = GrayRule::beta("1.2.3.4,5.6.7.8");
        let parsed = GrayRule::parse(&rule.to_persist_json()).unwrap();
        assert_eq!(parsed, rule);
    }

    #[test]
    fn test_invalid_rules_rejected() {
        // structurally broken
        let err = GrayRule::parse("not json").unwrap_err();
        assert_eq!(err.code(), Some(error::CONFIG_GRAY_RULE_FORMAT_INVALID.code));

        // unknown type
        assert!(
            GrayRule::parse(r#"{"type":"percent","version":"1.0.0","expr":"50","priority":1}"#)
                .is_err()
        );

        // semantically empty
        assert!(
            GrayRule::parse(r#"{"type":"beta","version":"1.0.0","expr":"","priority":1}"#).is_err()
        );
        assert!(!GrayRule::tag("  ").is_valid());
    }
}
