//! Instance selection and load balancing
//!
//! Selectors are plain predicate functions composed over an instance list;
//! the balancer picks one instance by weighted random among selectable
//! hosts. An instance is selectable when healthy, enabled, and carrying
//! positive weight.

use rand::Rng;

use farol_api::naming::model::{Instance, ServiceInfo};

use crate::error::{ClientError, Result};

/// A predicate over instances
pub type InstanceSelector = fn(&Instance) -> bool;

/// Selector accepting every instance
pub fn any_instance(_: &Instance) -> bool {
    true
}

/// Selector accepting instances eligible for traffic
pub fn selectable_instance(instance: &Instance) -> bool {
    instance.is_selectable()
}

/// Filter hosts by an optional comma-joined cluster list and a selector.
pub fn select_instances(
    info: &ServiceInfo,
    clusters: &str,
    selector: InstanceSelector,
) -> Vec<Instance> {
    let wanted: Vec<&str> = if clusters.is_empty() || clusters == "*" {
        Vec::new()
    } else {
        clusters.split(',').map(str::trim).collect()
    };
    info.hosts
        .iter()
        .filter(|host| {
            (wanted.is_empty() || wanted.contains(&host.cluster_name.as_str())) && selector(host)
        })
        .cloned()
        .collect()
}

/// Weighted random load balancer
pub struct Balancer;

impl Balancer {
    /// Pick one selectable host, weighted by instance weight.
    pub fn select_host(info: &ServiceInfo) -> Result<Instance> {
        Self::random_by_weight(&info.hosts).ok_or_else(|| {
            ClientError::NoAvailableInstance(format!("no selectable host for {}", info.name))
        })
    }

    fn random_by_weight(hosts: &[Instance]) -> Option<Instance> {
        let candidates: Vec<&Instance> = hosts.iter().filter(|h| h.is_selectable()).collect();
        if candidates.is_empty() {
            return None;
        }

        let total: f64 = candidates.iter().map(|h| h.weight).sum();
        let mut rng = rand::rng();
        let point = rng.random::<f64>() * total;

        let mut acc = 0.0;
        for host in &candidates {
            acc += host.weight;
            if point <= acc {
                return Some((*host).clone());
            }
        }
        candidates.last().map(|h| (*h).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(ip: &str, weight: f64, healthy: bool, cluster: &str) -> Instance {
        let mut inst = Instance::builder(ip, 8080)
            .weight(weight)
            .cluster_name(cluster)
            .build()
            .unwrap();
        inst.healthy = healthy;
        inst
    }

    fn info(hosts: Vec<Instance>) -> ServiceInfo {
        let mut info = ServiceInfo::new("s1", "G1", "");
        info.hosts = hosts;
        info
    }

    #[test]
    fn test_select_instances_by_cluster_and_health() {
        let info = info(vec![
            instance("1.1.1.1", 1.0, true, "c1"),
            instance("1.1.1.2", 1.0, false, "c1"),
            instance("1.1.1.3", 1.0, true, "c2"),
        ]);

        assert_eq!(select_instances(&info, "c1", any_instance).len(), 2);
        assert_eq!(select_instances(&info, "c1", selectable_instance).len(), 1);
        assert_eq!(select_instances(&info, "", selectable_instance).len(), 2);
        assert_eq!(select_instances(&info, "*", any_instance).len(), 3);
    }

    #[test]
    fn test_balancer_skips_unselectable() {
        let mut disabled = instance("1.1.1.2", 10.0, true, "c1");
        disabled.enabled = false;
        let info = info(vec![instance("1.1.1.1", 1.0, true, "c1"), disabled]);

        for _ in 0..50 {
            let picked = Balancer::select_host(&info).unwrap();
            assert_eq!(picked.ip, "1.1.1.1");
        }
    }

    #[test]
    fn test_balancer_no_selectable_is_error() {
        let info = info(vec![instance("1.1.1.1", 1.0, false, "c1")]);
        assert!(matches!(
            Balancer::select_host(&info),
            Err(ClientError::NoAvailableInstance(_))
        ));
    }

    #[test]
    fn test_balancer_respects_weights() {
        let info = info(vec![
            instance("1.1.1.1", 1.0, true, "c1"),
            instance("1.1.1.2", 9.0, true, "c1"),
        ]);

        let mut heavy = 0;
        for _ in 0..1000 {
            if Balancer::select_host(&info).unwrap().ip == "1.1.1.2" {
                heavy += 1;
            }
        }
        assert!(heavy > 700, "heavy instance picked only {} times", heavy);
    }
}
