//! Configuration client
//!
//! `ConfigClient` publishes and fetches configuration and keeps listeners
//! current through a background long-poll worker. The worker sends the
//! probe payload (`dataId\x02group\x02md5[\x02tenant]\x01` per entry) and
//! re-fetches whichever keys the server reports as changed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use farol_api::model::{
    CONFIG_LONG_POLL_TIMEOUT, DEFAULT_NAMESPACE_ID, LINE_SEPARATOR, WORD_SEPARATOR,
    config_group_key,
};
use farol_common::md5_hex;

use crate::error::{ClientError, Result};

/// Pause between poll rounds when nothing is listened to
const IDLE_POLL_DELAY: Duration = Duration::from_millis(100);
/// Pause after a failed poll round
const POLL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Wire operations against the config server
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    async fn publish_config(
        &self,
        tenant: &str,
        data_id: &str,
        group: &str,
        content: &str,
        cas_md5: Option<&str>,
    ) -> Result<()>;

    async fn get_config(&self, tenant: &str, data_id: &str, group: &str)
    -> Result<Option<String>>;

    async fn remove_config(&self, tenant: &str, data_id: &str, group: &str) -> Result<()>;

    /// Long-poll with a probe payload; resolves with the raw changed-keys
    /// string (`dataId\x02group[\x02tenant]\x01` per changed entry, empty
    /// when the poll timed out unchanged).
    async fn listen_config(&self, probe: &str, timeout_ms: u64) -> Result<String>;
}

/// Delivered to config listeners when their key changes
#[derive(Clone, Debug)]
pub struct ConfigChangeNotifyEvent {
    pub data_id: String,
    pub group: String,
    pub tenant: String,
    /// Current content, `None` when the config was removed
    pub content: Option<String>,
}

/// Callback invoked on config changes
pub type ConfigListener = Arc<dyn Fn(&ConfigChangeNotifyEvent) + Send + Sync>;

/// Handle for one registered config listener
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigListenerId(u64);

struct ListenerWrapper {
    id: u64,
    listener: ConfigListener,
}

struct CacheEntry {
    data_id: String,
    group: String,
    md5: Mutex<String>,
    listeners: Mutex<Vec<ListenerWrapper>>,
}

/// One probe line: `dataId\x02group\x02md5\x01` for the default namespace,
/// `dataId\x02group\x02md5\x02tenant\x01` otherwise.
fn probe_line(data_id: &str, group: &str, md5: &str, tenant: &str) -> String {
    if tenant.is_empty() || tenant == DEFAULT_NAMESPACE_ID {
        format!(
            "{}{}{}{}{}{}",
            data_id, WORD_SEPARATOR, group, WORD_SEPARATOR, md5, LINE_SEPARATOR
        )
    } else {
        format!(
            "{}{}{}{}{}{}{}{}",
            data_id, WORD_SEPARATOR, group, WORD_SEPARATOR, md5, WORD_SEPARATOR, tenant,
            LINE_SEPARATOR
        )
    }
}

/// Parse the changed-keys response into `(data_id, group, tenant)` triples.
/// Entries without a tenant field belong to the default namespace.
fn parse_poll_result(raw: &str) -> Vec<(String, String, String)> {
    raw.split(LINE_SEPARATOR)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(WORD_SEPARATOR).collect();
            match fields.as_slice() {
                [data_id, group] => Some((
                    data_id.to_string(),
                    group.to_string(),
                    DEFAULT_NAMESPACE_ID.to_string(),
                )),
                [data_id, group, tenant] => {
                    Some((data_id.to_string(), group.to_string(), tenant.to_string()))
                }
                _ => {
                    warn!("Skipping malformed changed-key line {:?}", line);
                    None
                }
            }
        })
        .collect()
}

/// Configuration client facade
pub struct ConfigClient {
    tenant: String,
    transport: Arc<dyn ConfigTransport>,
    entries: Arc<DashMap<String, Arc<CacheEntry>>>,
    next_id: AtomicU64,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigClient {
    pub fn new(tenant: &str, transport: Arc<dyn ConfigTransport>) -> Arc<Self> {
        let client = Arc::new(Self {
            tenant: tenant.to_string(),
            transport,
            entries: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            poll_task: Mutex::new(None),
        });
        // the worker holds a weak handle so dropping the client ends it
        let worker = Arc::downgrade(&client);
        let handle = tokio::spawn(async move {
            loop {
                let Some(client) = worker.upgrade() else {
                    break;
                };
                client.poll_round().await;
            }
        });
        *client.poll_task.lock() = Some(handle);
        info!("Config client ready for tenant {}", tenant);
        client
    }

    /// Publish, overwriting any existing content.
    pub async fn publish_config(&self, data_id: &str, group: &str, content: &str) -> Result<()> {
        self.transport
            .publish_config(&self.tenant, data_id, group, content, None)
            .await
    }

    /// Publish only if the server-side md5 still matches `cas_md5`. A
    /// mismatch is a hard conflict surfaced to the caller, never retried.
    pub async fn publish_config_cas(
        &self,
        data_id: &str,
        group: &str,
        content: &str,
        cas_md5: &str,
    ) -> Result<()> {
        match self
            .transport
            .publish_config(&self.tenant, data_id, group, content, Some(cas_md5))
            .await
        {
            Err(e) if e.server_code() == Some(farol_common::error::RESOURCE_CONFLICT.code) => {
                Err(ClientError::Conflict(format!(
                    "cas publish of {} rejected, md5 moved past {}",
                    config_group_key(data_id, group, &self.tenant),
                    cas_md5
                )))
            }
            other => other,
        }
    }

    pub async fn get_config(&self, data_id: &str, group: &str) -> Result<Option<String>> {
        self.transport
            .get_config(&self.tenant, data_id, group)
            .await
    }

    pub async fn remove_config(&self, data_id: &str, group: &str) -> Result<()> {
        self.transport
            .remove_config(&self.tenant, data_id, group)
            .await
    }

    /// Register a change listener. The current content is fetched once to
    /// seed the md5 baseline; changes are then driven by the poll worker.
    pub async fn add_listener(
        &self,
        data_id: &str,
        group: &str,
        listener: ConfigListener,
    ) -> Result<ConfigListenerId> {
        let key = config_group_key(data_id, group, &self.tenant);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let entry = match self.entries.get(&key) {
            Some(existing) => existing.value().clone(),
            None => {
                let content = self.get_config(data_id, group).await?;
                let md5 = content.as_deref().map(md5_hex).unwrap_or_default();
                let entry = Arc::new(CacheEntry {
                    data_id: data_id.to_string(),
                    group: group.to_string(),
                    md5: Mutex::new(md5),
                    listeners: Mutex::new(Vec::new()),
                });
                self.entries.insert(key, entry.clone());
                entry
            }
        };
        entry.listeners.lock().push(ListenerWrapper { id, listener });
        Ok(ConfigListenerId(id))
    }

    /// Remove one listener. The key stops being polled with its last
    /// listener.
    pub fn remove_listener(&self, data_id: &str, group: &str, id: ConfigListenerId) {
        let key = config_group_key(data_id, group, &self.tenant);
        let empty = if let Some(entry) = self.entries.get(&key) {
            let mut listeners = entry.listeners.lock();
            listeners.retain(|w| w.id != id.0);
            listeners.is_empty()
        } else {
            false
        };
        if empty {
            self.entries.remove(&key);
        }
    }

    /// Stop the background poll worker.
    pub fn shutdown(&self) {
        if let Some(handle) = self.poll_task.lock().take() {
            handle.abort();
        }
    }

    fn build_probe(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                let entry = e.value();
                probe_line(&entry.data_id, &entry.group, &entry.md5.lock(), &self.tenant)
            })
            .collect()
    }

    async fn poll_round(&self) {
        if self.entries.is_empty() {
            tokio::time::sleep(IDLE_POLL_DELAY).await;
            return;
        }

        let probe = self.build_probe();
        match self
            .transport
            .listen_config(&probe, CONFIG_LONG_POLL_TIMEOUT as u64)
            .await
        {
            Ok(raw) => {
                for (data_id, group, tenant) in parse_poll_result(&raw) {
                    self.refresh_changed(&data_id, &group, &tenant).await;
                }
            }
            Err(e) => {
                warn!("Config poll round failed: {}", e);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }

    async fn refresh_changed(&self, data_id: &str, group: &str, tenant: &str) {
        let key = config_group_key(data_id, group, tenant);
        let Some(entry) = self.entries.get(&key).map(|e| e.value().clone()) else {
            debug!("Change reported for unlistened key {}", key);
            return;
        };

        let content = match self.transport.get_config(tenant, data_id, group).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Failed to fetch changed config {}: {}", key, e);
                return;
            }
        };
        *entry.md5.lock() = content.as_deref().map(md5_hex).unwrap_or_default();

        let event = ConfigChangeNotifyEvent {
            data_id: data_id.to_string(),
            group: group.to_string(),
            tenant: tenant.to_string(),
            content,
        };
        let listeners = entry.listeners.lock();
        for wrapper in listeners.iter() {
            (wrapper.listener)(&event);
        }
    }
}

impl Drop for ConfigClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
