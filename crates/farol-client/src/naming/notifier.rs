//! Listener registry and change fan-out
//!
//! Listeners are keyed `group##service`. Delivery is in registration order
//! per key, and each callback runs panic-isolated so one misbehaving
//! listener cannot block the others.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

use farol_api::naming::model::InstancesDiff;

use crate::naming::listener::{InstanceListener, InstancesChangeEvent};
use crate::naming::selector::InstanceSelector;

fn notify_key(group_name: &str, service_name: &str) -> String {
    format!("{}##{}", group_name, service_name)
}

#[derive(Clone)]
struct ListenerWrapper {
    id: u64,
    selector: Option<InstanceSelector>,
    listener: InstanceListener,
}

fn filter_diff(diff: &InstancesDiff, selector: InstanceSelector) -> InstancesDiff {
    InstancesDiff {
        added: diff.added.iter().filter(|i| selector(i)).cloned().collect(),
        removed: diff.removed.iter().filter(|i| selector(i)).cloned().collect(),
        modified: diff.modified.iter().filter(|i| selector(i)).cloned().collect(),
    }
}

/// Registered-listener handle, used to deregister
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Fan-out hub for instance change events
#[derive(Default)]
pub struct InstancesChangeNotifier {
    listeners: DashMap<String, Vec<ListenerWrapper>>,
    next_id: AtomicU64,
}

impl InstancesChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_listener(
        &self,
        group_name: &str,
        service_name: &str,
        listener: InstanceListener,
    ) -> ListenerId {
        self.register(group_name, service_name, None, listener)
    }

    /// Register a listener that only sees instances passing the selector.
    /// Changes whose selected view is empty are not delivered.
    pub fn register_selector_listener(
        &self,
        group_name: &str,
        service_name: &str,
        selector: InstanceSelector,
        listener: InstanceListener,
    ) -> ListenerId {
        self.register(group_name, service_name, Some(selector), listener)
    }

    fn register(
        &self,
        group_name: &str,
        service_name: &str,
        selector: Option<InstanceSelector>,
        listener: InstanceListener,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entry(notify_key(group_name, service_name))
            .or_default()
            .push(ListenerWrapper {
                id,
                selector,
                listener,
            });
        ListenerId(id)
    }

    /// Remove one listener. The key is dropped with its last listener.
    pub fn deregister_listener(&self, group_name: &str, service_name: &str, id: ListenerId) {
        let key = notify_key(group_name, service_name);
        let empty = if let Some(mut wrappers) = self.listeners.get_mut(&key) {
            wrappers.retain(|w| w.id != id.0);
            wrappers.is_empty()
        } else {
            false
        };
        if empty {
            self.listeners.remove(&key);
        }
    }

    /// Whether any listener is registered for the service.
    pub fn is_subscribed(&self, group_name: &str, service_name: &str) -> bool {
        self.listeners
            .contains_key(&notify_key(group_name, service_name))
    }

    /// Deliver an event to the service's listeners in registration order.
    /// Listeners are snapshotted out of the map first, so a callback may
    /// register or deregister listeners for the same key; additions take
    /// effect from the next notification.
    pub fn notify(&self, event: &InstancesChangeEvent) {
        let key = notify_key(&event.group_name, &event.service_name);
        let wrappers: Vec<ListenerWrapper> = {
            let Some(entry) = self.listeners.get(&key) else {
                debug!("No listeners for {}", key);
                return;
            };
            entry.iter().cloned().collect()
        };
        for wrapper in &wrappers {
            let selected = wrapper.selector.map(|s| filter_diff(&event.diff, s));
            if let Some(diff) = &selected {
                if !diff.has_changed() {
                    continue;
                }
            }
            let narrowed;
            let delivered = match selected {
                Some(diff) => {
                    narrowed = InstancesChangeEvent {
                        diff,
                        ..event.clone()
                    };
                    &narrowed
                }
                None => event,
            };
            // Per-listener panic isolation
            let outcome = catch_unwind(AssertUnwindSafe(|| (wrapper.listener)(delivered)));
            if outcome.is_err() {
                warn!("Listener {} for {} panicked", wrapper.id, key);
            }
        }
    }

    pub fn subscribed_services(&self) -> Vec<String> {
        self.listeners.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop every listener.
    pub fn clear(&self) {
        self.listeners.clear();
    }
}
