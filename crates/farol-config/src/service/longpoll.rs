//! Long polling for config changes
//!
//! Clients send a probe string listing each watched config with the md5
//! they hold; any key whose server-side md5 differs is reported back
//! immediately, otherwise the request is held until a change event or the
//! timeout. The probe wire format (`\x02` word separator, `\x01` line
//! separator) is preserved byte-for-byte for legacy client compatibility.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use farol_api::model::{DEFAULT_NAMESPACE_ID, LINE_SEPARATOR, WORD_SEPARATOR, config_group_key};

use crate::service::config::ConfigService;

/// Default number of poll requests held concurrently
pub const DEFAULT_LONG_POLL_CAPACITY: usize = 10000;

/// Parse a `Listening-Configs` probe string into `group key -> md5`.
///
/// Each line is `dataId\x02group\x02md5` or `dataId\x02group\x02md5\x02tenant`;
/// a missing tenant means the default namespace. Malformed lines are skipped.
pub fn get_client_md5_map(probe: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    for line in probe.split(LINE_SEPARATOR) {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(WORD_SEPARATOR).collect();
        match fields.as_slice() {
            [data_id, group, md5] => {
                result.insert(
                    config_group_key(data_id, group, DEFAULT_NAMESPACE_ID),
                    md5.to_string(),
                );
            }
            [data_id, group, md5, tenant] => {
                result.insert(
                    config_group_key(data_id, group, tenant),
                    md5.to_string(),
                );
            }
            _ => {
                debug!("Skipping malformed probe line with {} fields", fields.len());
            }
        }
    }
    result
}

/// Encode changed group keys in the probe's inverse wire format:
/// `dataId\x02group\x01` for the default namespace, `dataId\x02group\x02tenant\x01`
/// otherwise.
pub fn compare_md5_result_string(changed_keys: &[String]) -> String {
    let mut out = String::new();
    for key in changed_keys {
        let parts: Vec<&str> = key.split('+').collect();
        let [data_id, group, tenant] = parts.as_slice() else {
            warn!("Skipping malformed group key: {}", key);
            continue;
        };
        out.push_str(data_id);
        out.push_str(WORD_SEPARATOR);
        out.push_str(group);
        if *tenant != DEFAULT_NAMESPACE_ID && !tenant.is_empty() {
            out.push_str(WORD_SEPARATOR);
            out.push_str(tenant);
        }
        out.push_str(LINE_SEPARATOR);
    }
    out
}

/// Group keys whose server-side md5 differs from the client's.
pub async fn compare_md5(
    config: &ConfigService,
    client_md5_map: &HashMap<String, String>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (group_key, client_md5) in client_md5_map {
        let parts: Vec<&str> = group_key.split('+').collect();
        let [data_id, group, tenant] = parts.as_slice() else {
            continue;
        };
        let current = config
            .current_md5(data_id, group, tenant)
            .await
            .unwrap_or(None);
        if current.as_deref() != Some(client_md5.as_str()) {
            changed.push(group_key.clone());
        }
    }
    changed.sort();
    changed
}

/// Outcome of one long poll
#[derive(Clone, Debug, Default)]
pub struct PollResult {
    pub changed_keys: Vec<String>,
    /// Set when the server refused to hold the request; the client should
    /// retry after its normal interval
    pub retry: bool,
}

/// Holds long-poll requests until a watched config changes
pub struct LongPollingService {
    config: Arc<ConfigService>,
    capacity: usize,
    held: AtomicUsize,
}

struct HeldGuard<'a>(&'a AtomicUsize);

impl Drop for HeldGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl LongPollingService {
    pub fn new(config: Arc<ConfigService>) -> Self {
        Self::with_capacity(config, DEFAULT_LONG_POLL_CAPACITY)
    }

    pub fn with_capacity(config: Arc<ConfigService>, capacity: usize) -> Self {
        Self {
            config,
            capacity,
            held: AtomicUsize::new(0),
        }
    }

    /// Compare and, if nothing changed, hold until a change event or the
    /// timeout. Over capacity the request is not held; the client gets an
    /// empty changed set with the retry flag.
    pub async fn poll(
        &self,
        client_md5_map: HashMap<String, String>,
        timeout: Duration,
    ) -> PollResult {
        // Subscribe before the initial compare so a change landing between
        // the two is not lost.
        let mut rx = self.config.subscribe_changes();

        let changed = compare_md5(&self.config, &client_md5_map).await;
        if !changed.is_empty() {
            return PollResult {
                changed_keys: changed,
                retry: false,
            };
        }

        if self.held.fetch_add(1, Ordering::AcqRel) >= self.capacity {
            self.held.fetch_sub(1, Ordering::AcqRel);
            warn!("Long poll capacity reached, returning immediate retry");
            return PollResult {
                changed_keys: Vec::new(),
                retry: true,
            };
        }
        let _guard = HeldGuard(&self.held);

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PollResult::default();
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(event)) => {
                    if client_md5_map.contains_key(&event.group_key()) {
                        let changed = compare_md5(&self.config, &client_md5_map).await;
                        if !changed.is_empty() {
                            return PollResult {
                                changed_keys: changed,
                                retry: false,
                            };
                        }
                    }
                }
                // Lagged receivers recompare rather than miss changes
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => {
                    let changed = compare_md5(&self.config, &client_md5_map).await;
                    if !changed.is_empty() {
                        return PollResult {
                            changed_keys: changed,
                            retry: false,
                        };
                    }
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                    return PollResult::default();
                }
                Err(_) => {
                    return PollResult::default();
                }
            }
        }
    }

    /// Requests currently held open.
    pub fn held_count(&self) -> usize {
        self.held.load(Ordering::Acquire)
    }
}
