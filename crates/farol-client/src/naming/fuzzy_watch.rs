//! Client-side fuzzy watch state
//!
//! Each watched pattern owns a context that tracks the set of service keys
//! the server has reported so far. Pushes are deduplicated against that
//! set, so replays after a reconnect do not re-notify watchers. Contexts
//! move Uninitialized -> Initializing -> Synced; a watcher joining a synced
//! context is caught up from local state without another RPC.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use farol_api::model::{
    ADD_SERVICE, DELETE_SERVICE, FUZZY_WATCH_DIFF_SYNC_NOTIFY, FUZZY_WATCH_INIT_NOTIFY,
    GROUP_KEY_SPLITER,
};

use crate::error::{ClientError, Result};
use crate::naming::proxy::NamingTransport;

/// How long watch attempts for a pattern are suppressed after the server
/// rejects it for exceeding a quota.
const PATTERN_BACKOFF: Duration = Duration::from_secs(30);

/// One service-level change under a watched pattern
#[derive(Clone, Debug)]
pub struct FuzzyWatchNotifyEvent {
    pub pattern: String,
    pub service_key: String,
    /// `ADD_SERVICE` or `DELETE_SERVICE`
    pub change_type: String,
    /// `FUZZY_WATCH_INIT_NOTIFY` for catch-up, `FUZZY_WATCH_DIFF_SYNC_NOTIFY` after
    pub sync_type: String,
}

/// Callback invoked on fuzzy watch changes
pub type FuzzyWatchEventListener = Arc<dyn Fn(&FuzzyWatchNotifyEvent) + Send + Sync>;

/// Handle for one registered watcher
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FuzzyWatcherId(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WatchState {
    Initializing,
    Synced,
}

#[derive(Clone)]
struct WatcherWrapper {
    id: u64,
    listener: FuzzyWatchEventListener,
}

struct FuzzyWatchContext {
    pattern: String,
    state: Mutex<WatchState>,
    received: Mutex<HashSet<String>>,
    watchers: Mutex<Vec<WatcherWrapper>>,
    init_tx: watch::Sender<bool>,
}

impl FuzzyWatchContext {
    fn new(pattern: &str) -> Arc<Self> {
        let (init_tx, _) = watch::channel(false);
        Arc::new(Self {
            pattern: pattern.to_string(),
            state: Mutex::new(WatchState::Initializing),
            received: Mutex::new(HashSet::new()),
            watchers: Mutex::new(Vec::new()),
            init_tx,
        })
    }

    // Snapshots the watcher list before invoking callbacks, so a callback
    // may feed further pushes or adjust watchers without self-deadlocking.
    fn deliver(&self, event: &FuzzyWatchNotifyEvent) {
        let watchers: Vec<WatcherWrapper> = self.watchers.lock().iter().cloned().collect();
        for wrapper in &watchers {
            let outcome = catch_unwind(AssertUnwindSafe(|| (wrapper.listener)(event)));
            if outcome.is_err() {
                warn!(
                    "Fuzzy watcher {} for pattern {} panicked",
                    wrapper.id, self.pattern
                );
            }
        }
    }

    fn deliver_to(&self, listener: &FuzzyWatchEventListener, event: &FuzzyWatchNotifyEvent) {
        let outcome = catch_unwind(AssertUnwindSafe(|| listener(event)));
        if outcome.is_err() {
            warn!("Fuzzy watcher for pattern {} panicked", self.pattern);
        }
    }
}

/// Manager for all fuzzy watch patterns of one client
pub struct NamingFuzzyWatcher {
    namespace: String,
    transport: Arc<dyn NamingTransport>,
    contexts: DashMap<String, Arc<FuzzyWatchContext>>,
    backoff: DashMap<String, (Instant, i32)>,
    next_id: AtomicU64,
}

impl NamingFuzzyWatcher {
    pub fn new(namespace: &str, transport: Arc<dyn NamingTransport>) -> Self {
        Self {
            namespace: namespace.to_string(),
            transport,
            contexts: DashMap::new(),
            backoff: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// `namespace+groupPattern+servicePattern`
    pub fn build_pattern(&self, group_pattern: &str, service_pattern: &str) -> String {
        format!(
            "{}{}{}{}{}",
            self.namespace, GROUP_KEY_SPLITER, group_pattern, GROUP_KEY_SPLITER, service_pattern
        )
    }

    /// Start watching a pattern. The first watcher triggers the server
    /// RPC; later watchers are caught up from the local matched set.
    pub async fn watch(
        &self,
        group_pattern: &str,
        service_pattern: &str,
        listener: FuzzyWatchEventListener,
    ) -> Result<FuzzyWatcherId> {
        let pattern = self.build_pattern(group_pattern, service_pattern);

        if let Some(entry) = self.backoff.get(&pattern) {
            let (until, code) = *entry.value();
            if Instant::now() < until {
                return Err(ClientError::server(
                    code,
                    &format!("pattern {} rejected recently, backing off", pattern),
                ));
            }
            drop(entry);
            self.backoff.remove(&pattern);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if let Some(context) = self.contexts.get(&pattern).map(|e| e.value().clone()) {
            context.watchers.lock().push(WatcherWrapper {
                id,
                listener: listener.clone(),
            });
            let mut init_rx = context.init_tx.subscribe();
            if *context.state.lock() != WatchState::Synced {
                // another caller is driving the init RPC
                let _ = init_rx.wait_for(|done| *done).await;
            }
            let keys: Vec<String> = context.received.lock().iter().cloned().collect();
            for service_key in keys {
                context.deliver_to(
                    &listener,
                    &FuzzyWatchNotifyEvent {
                        pattern: pattern.clone(),
                        service_key,
                        change_type: ADD_SERVICE.to_string(),
                        sync_type: FUZZY_WATCH_INIT_NOTIFY.to_string(),
                    },
                );
            }
            return Ok(FuzzyWatcherId(id));
        }

        let context = FuzzyWatchContext::new(&pattern);
        context.watchers.lock().push(WatcherWrapper {
            id,
            listener: listener.clone(),
        });
        self.contexts.insert(pattern.clone(), context.clone());

        match self.transport.fuzzy_watch(&self.namespace, &pattern).await {
            Ok(initial_keys) => {
                info!(
                    "Fuzzy watch established for {} with {} initial services",
                    pattern,
                    initial_keys.len()
                );
                {
                    let mut received = context.received.lock();
                    received.extend(initial_keys.iter().cloned());
                }
                for service_key in initial_keys {
                    context.deliver(&FuzzyWatchNotifyEvent {
                        pattern: pattern.clone(),
                        service_key,
                        change_type: ADD_SERVICE.to_string(),
                        sync_type: FUZZY_WATCH_INIT_NOTIFY.to_string(),
                    });
                }
                *context.state.lock() = WatchState::Synced;
                let _ = context.init_tx.send(true);
                Ok(FuzzyWatcherId(id))
            }
            Err(e) => {
                self.contexts.remove(&pattern);
                let _ = context.init_tx.send(true);
                if let Some(code @ (50310 | 50311)) = e.server_code() {
                    warn!(
                        "Server rejected fuzzy watch for {} (code {}), backing off {:?}",
                        pattern, code, PATTERN_BACKOFF
                    );
                    self.backoff
                        .insert(pattern, (Instant::now() + PATTERN_BACKOFF, code));
                }
                Err(e)
            }
        }
    }

    /// Apply one server push. Pushes for unknown patterns are dropped,
    /// which covers late pushes racing a cancel. Duplicates against the
    /// received set are dropped as well.
    pub fn on_server_push(&self, pattern: &str, service_key: &str, change_type: &str) {
        let Some(context) = self.contexts.get(pattern).map(|e| e.value().clone()) else {
            debug!("Dropping push for unwatched pattern {}", pattern);
            return;
        };

        let fresh = {
            let mut received = context.received.lock();
            match change_type {
                ADD_SERVICE => received.insert(service_key.to_string()),
                DELETE_SERVICE => received.remove(service_key),
                other => {
                    warn!("Unknown fuzzy watch change type {:?}", other);
                    return;
                }
            }
        };
        if !fresh {
            debug!("Dropping duplicate {} push for {}", change_type, service_key);
            return;
        }

        context.deliver(&FuzzyWatchNotifyEvent {
            pattern: pattern.to_string(),
            service_key: service_key.to_string(),
            change_type: change_type.to_string(),
            sync_type: FUZZY_WATCH_DIFF_SYNC_NOTIFY.to_string(),
        });
    }

    /// Remove one watcher. The last watcher out cancels the server-side
    /// watch and drops the context.
    pub async fn cancel(
        &self,
        group_pattern: &str,
        service_pattern: &str,
        id: FuzzyWatcherId,
    ) -> Result<()> {
        let pattern = self.build_pattern(group_pattern, service_pattern);
        let Some(context) = self.contexts.get(&pattern).map(|e| e.value().clone()) else {
            return Ok(());
        };

        let empty = {
            let mut watchers = context.watchers.lock();
            watchers.retain(|w| w.id != id.0);
            watchers.is_empty()
        };
        if !empty {
            return Ok(());
        }

        self.contexts.remove(&pattern);
        self.transport
            .cancel_fuzzy_watch(&self.namespace, &pattern)
            .await
    }

    pub fn watched_patterns(&self) -> Vec<String> {
        self.contexts.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop every watch context. Later pushes for the dropped patterns are
    /// discarded like any other unwatched pattern.
    pub fn clear(&self) {
        self.contexts.clear();
    }

    /// Matched service keys currently known for a pattern.
    pub fn matched_services(&self, pattern: &str) -> Vec<String> {
        self.contexts
            .get(pattern)
            .map(|e| e.received.lock().iter().cloned().collect())
            .unwrap_or_default()
    }
}
