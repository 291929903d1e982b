//! Server-side fuzzy watch pattern matching
//!
//! Watch patterns take the form `namespace+groupPattern+servicePattern`
//! where the group and service parts may carry `*` wildcards. The manager
//! tracks which connections watch which patterns and which concrete
//! services each pattern currently matches, enforcing pattern-count and
//! match-count limits.

use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use farol_api::model::{ADD_SERVICE, DELETE_SERVICE, GROUP_KEY_SPLITER};
use farol_common::{FarolError, error, glob_matches};

use crate::model::ServiceKey;

/// Limits on fuzzy watch resource consumption
#[derive(Clone, Debug)]
pub struct FuzzyWatchConfig {
    /// Max distinct patterns held by the server
    pub max_pattern_count: usize,
    /// Max services one pattern may match
    pub max_matched_service_count: usize,
}

impl Default for FuzzyWatchConfig {
    fn default() -> Self {
        Self {
            max_pattern_count: 20,
            max_matched_service_count: 500,
        }
    }
}

/// Change pushed to fuzzy watchers when a matched service appears or goes
#[derive(Clone, Debug)]
pub struct FuzzyWatchChangeEvent {
    pub pattern: String,
    pub service: ServiceKey,
    /// ADD_SERVICE or DELETE_SERVICE
    pub change_type: &'static str,
    pub clients: Vec<String>,
}

struct PatternEntry {
    watchers: HashSet<String>,
    matched: HashSet<String>,
}

/// Build the canonical `namespace+groupPattern+servicePattern` key.
pub fn build_pattern(namespace: &str, group_pattern: &str, service_pattern: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        namespace,
        group_pattern,
        service_pattern,
        sep = GROUP_KEY_SPLITER
    )
}

/// Split a pattern key back into (namespace, groupPattern, servicePattern).
pub fn parse_pattern(pattern: &str) -> Option<(&str, &str, &str)> {
    let mut parts = pattern.splitn(3, GROUP_KEY_SPLITER);
    let namespace = parts.next()?;
    let group = parts.next()?;
    let service = parts.next()?;
    if namespace.is_empty() || group.is_empty() || service.is_empty() {
        return None;
    }
    Some((namespace, group, service))
}

/// Whether a concrete service falls under a pattern. The namespace part is
/// an exact match; group and service parts take `*` wildcards.
pub fn pattern_matches(pattern: &str, key: &ServiceKey) -> bool {
    let Some((namespace, group_pattern, service_pattern)) = parse_pattern(pattern) else {
        return false;
    };
    namespace == key.namespace
        && glob_matches(group_pattern, &key.group_name)
        && glob_matches(service_pattern, &key.service_name)
}

/// Registry of fuzzy watch patterns and their watchers
pub struct FuzzyWatchPatternManager {
    config: FuzzyWatchConfig,
    patterns: DashMap<String, PatternEntry>,
    event_tx: broadcast::Sender<FuzzyWatchChangeEvent>,
}

impl FuzzyWatchPatternManager {
    pub fn new(config: FuzzyWatchConfig) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            config,
            patterns: DashMap::new(),
            event_tx,
        }
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<FuzzyWatchChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Register a watcher for a pattern, seeding the matched set from the
    /// current service keys. Returns the matched keys so the caller can send
    /// the initial notify batch.
    pub fn add_watcher(
        &self,
        client_id: &str,
        pattern: &str,
        current_services: &[ServiceKey],
    ) -> Result<Vec<ServiceKey>, FarolError> {
        if parse_pattern(pattern).is_none() {
            return Err(FarolError::IllegalArgument(format!(
                "invalid fuzzy watch pattern: {}",
                pattern
            )));
        }
        if !self.patterns.contains_key(pattern)
            && self.patterns.len() >= self.config.max_pattern_count
        {
            return Err(FarolError::api(error::FUZZY_WATCH_PATTERN_OVER_LIMIT));
        }

        let matched: Vec<ServiceKey> = current_services
            .iter()
            .filter(|key| pattern_matches(pattern, key))
            .cloned()
            .collect();
        if matched.len() > self.config.max_matched_service_count {
            return Err(FarolError::api(
                error::FUZZY_WATCH_PATTERN_MATCH_COUNT_OVER_LIMIT,
            ));
        }

        let mut entry = self.patterns.entry(pattern.to_string()).or_insert_with(|| {
            debug!("New fuzzy watch pattern: {}", pattern);
            PatternEntry {
                watchers: HashSet::new(),
                matched: HashSet::new(),
            }
        });
        entry.watchers.insert(client_id.to_string());
        for key in &matched {
            entry.matched.insert(key.key());
        }
        Ok(matched)
    }

    /// Drop one watcher from a pattern; the pattern itself is removed when
    /// the last watcher leaves.
    pub fn remove_watcher(&self, client_id: &str, pattern: &str) {
        let remove = if let Some(mut entry) = self.patterns.get_mut(pattern) {
            entry.watchers.remove(client_id);
            entry.watchers.is_empty()
        } else {
            false
        };
        if remove {
            self.patterns.remove(pattern);
            debug!("Fuzzy watch pattern released: {}", pattern);
        }
    }

    /// Drop a disconnected client from every pattern.
    pub fn release_client(&self, client_id: &str) {
        let stale: Vec<String> = self
            .patterns
            .iter()
            .filter(|e| e.value().watchers.contains(client_id))
            .map(|e| e.key().clone())
            .collect();
        for pattern in stale {
            self.remove_watcher(client_id, &pattern);
        }
    }

    /// Clients watching any pattern that matches the given service.
    pub fn watchers_of(&self, key: &ServiceKey) -> Vec<String> {
        let mut clients: Vec<String> = self
            .patterns
            .iter()
            .filter(|e| pattern_matches(e.key(), key))
            .flat_map(|e| e.value().watchers.iter().cloned().collect::<Vec<_>>())
            .collect();
        clients.sort();
        clients.dedup();
        clients
    }

    /// Record a newly appeared service and notify matching watchers.
    pub fn on_service_added(&self, key: &ServiceKey) {
        for mut entry in self.patterns.iter_mut() {
            if !pattern_matches(entry.key(), key) {
                continue;
            }
            if entry.value().matched.len() >= self.config.max_matched_service_count {
                warn!(
                    "Pattern {} at match capacity, skipping {}",
                    entry.key(),
                    key
                );
                continue;
            }
            if entry.value_mut().matched.insert(key.key()) {
                let _ = self.event_tx.send(FuzzyWatchChangeEvent {
                    pattern: entry.key().clone(),
                    service: key.clone(),
                    change_type: ADD_SERVICE,
                    clients: entry.value().watchers.iter().cloned().collect(),
                });
            }
        }
    }

    /// Record a removed service and notify matching watchers.
    pub fn on_service_removed(&self, key: &ServiceKey) {
        for mut entry in self.patterns.iter_mut() {
            if entry.value_mut().matched.remove(&key.key()) {
                let _ = self.event_tx.send(FuzzyWatchChangeEvent {
                    pattern: entry.key().clone(),
                    service: key.clone(),
                    change_type: DELETE_SERVICE,
                    clients: entry.value().watchers.iter().cloned().collect(),
                });
            }
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for FuzzyWatchPatternManager {
    fn default() -> Self {
        Self::new(FuzzyWatchConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(service: &str) -> ServiceKey {
        ServiceKey::new("public", "DEFAULT_GROUP", service)
    }

    #[test]
    fn test_pattern_grammar() {
        let pattern = build_pattern("public", "DEFAULT_GROUP", "order-*");
        assert_eq!(pattern, "public+DEFAULT_GROUP+order-*");
        assert_eq!(
            parse_pattern(&pattern),
            Some(("public", "DEFAULT_GROUP", "order-*"))
        );
        assert!(parse_pattern("public+DEFAULT_GROUP").is_none());
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = build_pattern("public", "*", "order-*");
        assert!(pattern_matches(&pattern, &key("order-api")));
        assert!(!pattern_matches(&pattern, &key("user-api")));
        // namespace part is exact, never a wildcard
        let other_ns = ServiceKey::new("dev", "DEFAULT_GROUP", "order-api");
        assert!(!pattern_matches(&pattern, &other_ns));
    }

    #[test]
    fn test_add_watcher_seeds_matches() {
        let mgr = FuzzyWatchPatternManager::default();
        let services = vec![key("order-api"), key("order-worker"), key("user-api")];
        let pattern = build_pattern("public", "*", "order-*");

        let matched = mgr.add_watcher("conn-1", &pattern, &services).unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(mgr.watchers_of(&key("order-api")), vec!["conn-1"]);
        assert!(mgr.watchers_of(&key("user-api")).is_empty());
    }

    #[test]
    fn test_pattern_count_limit() {
        let mgr = FuzzyWatchPatternManager::new(FuzzyWatchConfig {
            max_pattern_count: 1,
            max_matched_service_count: 500,
        });
        let p1 = build_pattern("public", "*", "a-*");
        let p2 = build_pattern("public", "*", "b-*");
        mgr.add_watcher("conn-1", &p1, &[]).unwrap();

        let err = mgr.add_watcher("conn-1", &p2, &[]).unwrap_err();
        assert_eq!(err.code(), Some(error::FUZZY_WATCH_PATTERN_OVER_LIMIT.code));

        // Re-watching an existing pattern is not a new pattern
        assert!(mgr.add_watcher("conn-2", &p1, &[]).is_ok());
    }

    #[test]
    fn test_match_count_limit() {
        let mgr = FuzzyWatchPatternManager::new(FuzzyWatchConfig {
            max_pattern_count: 20,
            max_matched_service_count: 2,
        });
        let services = vec![key("s1"), key("s2"), key("s3")];
        let pattern = build_pattern("public", "*", "*");

        let err = mgr.add_watcher("conn-1", &pattern, &services).unwrap_err();
        assert_eq!(
            err.code(),
            Some(error::FUZZY_WATCH_PATTERN_MATCH_COUNT_OVER_LIMIT.code)
        );
    }

    #[test]
    fn test_service_lifecycle_events() {
        let mgr = FuzzyWatchPatternManager::default();
        let pattern = build_pattern("public", "*", "order-*");
        mgr.add_watcher("conn-1", &pattern, &[]).unwrap();
        let mut rx = mgr.subscribe_changes();

        mgr.on_service_added(&key("order-api"));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.change_type, ADD_SERVICE);
        assert_eq!(event.clients, vec!["conn-1"]);

        // duplicate add is deduplicated
        mgr.on_service_added(&key("order-api"));
        assert!(rx.try_recv().is_err());

        mgr.on_service_removed(&key("order-api"));
        let event = rx.try_recv().unwrap();
        assert_eq!(event.change_type, DELETE_SERVICE);

        // non-matching service produces nothing
        mgr.on_service_added(&key("user-api"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_last_watcher_out_releases_pattern() {
        let mgr = FuzzyWatchPatternManager::default();
        let pattern = build_pattern("public", "*", "*");
        mgr.add_watcher("conn-1", &pattern, &[]).unwrap();
        mgr.add_watcher("conn-2", &pattern, &[]).unwrap();

        mgr.remove_watcher("conn-1", &pattern);
        assert_eq!(mgr.pattern_count(), 1);
        mgr.remove_watcher("conn-2", &pattern);
        assert_eq!(mgr.pattern_count(), 0);
    }

    #[test]
    fn test_release_client_sweeps_patterns() {
        let mgr = FuzzyWatchPatternManager::default();
        mgr.add_watcher("conn-1", &build_pattern("public", "*", "a-*"), &[])
            .unwrap();
        mgr.add_watcher("conn-1", &build_pattern("public", "*", "b-*"), &[])
            .unwrap();
        mgr.add_watcher("conn-2", &build_pattern("public", "*", "a-*"), &[])
            .unwrap();

        mgr.release_client("conn-1");
        assert_eq!(mgr.pattern_count(), 1);
    }
}
