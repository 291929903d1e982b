//! Consistent-hash ring for distro data ownership
//!
//! Each data key is owned by exactly one node, picked by walking the ring
//! clockwise from the key's hash point. Virtual nodes keep the assignment
//! balanced across small clusters.

use std::collections::BTreeMap;

use md5::{Digest, Md5};

/// Virtual nodes placed on the ring per member
const VIRTUAL_NODES: usize = 64;

/// Immutable consistent-hash ring over a member address list
///
/// Rebuilt wholesale on membership change; readers hold an `Arc` snapshot so
/// ownership lookups never block on a rebuild.
#[derive(Clone, Debug, Default)]
pub struct ConsistentHashRing {
    points: BTreeMap<u64, String>,
}

impl ConsistentHashRing {
    pub fn new(addresses: &[String]) -> Self {
        let mut points = BTreeMap::new();
        for address in addresses {
            for i in 0..VIRTUAL_NODES {
                points.insert(hash_point(&format!("{}#{}", address, i)), address.clone());
            }
        }
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The address owning `key`, or `None` for an empty ring.
    pub fn owner(&self, key: &str) -> Option<&str> {
        if self.points.is_empty() {
            return None;
        }
        let point = hash_point(key);
        self.points
            .range(point..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, addr)| addr.as_str())
    }
}

fn hash_point(key: &str) -> u64 {
    let mut hasher = Md5::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("md5 digest is 16 bytes"))
}
