//! Instance change events and listener types

use std::sync::Arc;

use farol_api::naming::model::InstancesDiff;

/// Emitted when a subscribed service's instance set changes
#[derive(Clone, Debug)]
pub struct InstancesChangeEvent {
    pub service_name: String,
    pub group_name: String,
    pub clusters: String,
    pub diff: InstancesDiff,
}

/// Callback invoked on instance changes
pub type InstanceListener = Arc<dyn Fn(&InstancesChangeEvent) + Send + Sync>;
