//! Disk failover for service discovery
//!
//! When the failover switch file contains `1`, reads are served from the
//! failover snapshots on disk instead of the live cache. Operators flip
//! the switch when the servers are unreachable or misbehaving.

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, warn};

use farol_api::naming::model::ServiceInfo;

use crate::error::Result;

/// Name of the failover switch marker file
pub const FAILOVER_SWITCH_FILE: &str = "00-00---000-VIPSRV_FAILOVER_SWITCH-000---00-00";

/// Disk-backed failover store
pub struct FailoverReactor {
    dir: PathBuf,
    cache: DashMap<String, ServiceInfo>,
}

impl FailoverReactor {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let reactor = Self {
            dir: dir.to_path_buf(),
            cache: DashMap::new(),
        };
        reactor.refresh();
        Ok(reactor)
    }

    /// Whether failover reads are switched on (`1` in the switch file).
    pub fn is_failover_switch(&self) -> bool {
        match std::fs::read_to_string(self.dir.join(FAILOVER_SWITCH_FILE)) {
            Ok(content) => content.trim() == "1",
            Err(_) => false,
        }
    }

    /// Write one failover snapshot.
    pub fn save(&self, info: &ServiceInfo) -> Result<()> {
        let path = self.dir.join(info.key());
        std::fs::write(&path, serde_json::to_string(info)?)?;
        debug!("Saved failover snapshot for {}", info.key());
        Ok(())
    }

    /// The failover copy of a service, from the in-memory mirror.
    pub fn get(&self, key: &str) -> Option<ServiceInfo> {
        self.cache.get(key).map(|e| e.value().clone())
    }

    /// Reload the in-memory mirror from disk. Unreadable files are skipped.
    pub fn refresh(&self) {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };
        self.cache.clear();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name == FAILOVER_SWITCH_FILE {
                continue;
            }
            match std::fs::read_to_string(entry.path())
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str::<ServiceInfo>(&raw).map_err(Into::into))
            {
                Ok(info) => {
                    self.cache.insert(info.key(), info);
                }
                Err(e) => {
                    warn!("Skipping unreadable failover file {:?}: {}", name, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use farol_api::naming::model::Instance;

    fn info(service: &str) -> ServiceInfo {
        let mut info = ServiceInfo::new(service, "G1", "");
        info.hosts = vec![Instance::builder("1.1.1.1", 80).build().unwrap()];
        info
    }

    #[test]
    fn test_switch_off_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let reactor = FailoverReactor::new(dir.path()).unwrap();
        assert!(!reactor.is_failover_switch());
    }

    #[test]
    fn test_switch_honors_marker_content() {
        let dir = tempfile::tempdir().unwrap();
        let reactor = FailoverReactor::new(dir.path()).unwrap();

        std::fs::write(dir.path().join(FAILOVER_SWITCH_FILE), "1\n").unwrap();
        assert!(reactor.is_failover_switch());

        std::fs::write(dir.path().join(FAILOVER_SWITCH_FILE), "0").unwrap();
        assert!(!reactor.is_failover_switch());
    }

    #[test]
    fn test_save_refresh_get() {
        let dir = tempfile::tempdir().unwrap();
        let reactor = FailoverReactor::new(dir.path()).unwrap();
        let snapshot = info("s1");
        reactor.save(&snapshot).unwrap();

        // a fresh reactor picks the snapshot up from disk
        let reborn = FailoverReactor::new(dir.path()).unwrap();
        let loaded = reborn.get(&snapshot.key()).unwrap();
        assert_eq!(loaded.hosts.len(), 1);
    }

    #[test]
    fn test_refresh_skips_switch_file_and_junk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(FAILOVER_SWITCH_FILE), "1").unwrap();
        std::fs::write(dir.path().join("G1@@junk"), "not json").unwrap();

        let reactor = FailoverReactor::new(dir.path()).unwrap();
        assert!(reactor.get(FAILOVER_SWITCH_FILE).is_none());
        assert!(reactor.get("G1@@junk").is_none());
    }
}
