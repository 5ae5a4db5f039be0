use super::BridgeConfig;
use std::sync::{Arc, RwLock};

/// Atomically swappable configuration snapshot.
///
/// Readers take an `Arc<BridgeConfig>` and keep it for the whole operation;
/// the lock is only held long enough to clone or replace the pointer, so a
/// reload never blocks behind an in-flight API call.
#[derive(Clone, Debug)]
pub struct SharedConfig {
    current: Arc<RwLock<Arc<BridgeConfig>>>,
}

impl SharedConfig {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<BridgeConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            // The pointer swap cannot leave a half-written value behind
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publishes a new snapshot. Snapshots already handed out are unaffected.
    pub fn replace(&self, config: BridgeConfig) {
        let next = Arc::new(config);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

pub fn new_shared_config(config: BridgeConfig) -> SharedConfig {
    SharedConfig::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_replace() {
        let mut initial = BridgeConfig::default();
        initial.servicenow.base_url = "https://old.service-now.com".to_string();
        let shared = new_shared_config(initial);

        let before = shared.snapshot();

        let mut updated = BridgeConfig::default();
        updated.servicenow.base_url = "https://new.service-now.com".to_string();
        shared.replace(updated);

        assert_eq!(before.servicenow.base_url, "https://old.service-now.com");
        assert_eq!(
            shared.snapshot().servicenow.base_url,
            "https://new.service-now.com"
        );
    }

    #[test]
    fn test_clones_share_state() {
        let shared = SharedConfig::new(BridgeConfig::default());
        let other = shared.clone();

        let mut updated = BridgeConfig::default();
        updated.platform.site_url = "https://chat.example.com".to_string();
        other.replace(updated);

        assert_eq!(shared.snapshot().platform.site_url, "https://chat.example.com");
    }
}
