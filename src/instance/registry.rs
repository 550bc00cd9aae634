//! Instance registry keyed by datasource UID.
//!
//! Each UID maps to the instance built from one configuration revision. A
//! lookup with a newer revision replaces the slot; the displaced instance
//! keeps serving in-flight batches and is disposed when its last reference
//! is released.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::Instance;
use crate::config::InstanceSettings;
use crate::driver::WarehouseDriver;
use crate::error::QueryError;

#[derive(Debug)]
struct Slot {
    version: i64,
    instance: Arc<Instance>,
}

/// Process-wide registry of live instances.
#[derive(Debug)]
pub struct InstanceManager {
    driver: Arc<dyn WarehouseDriver>,
    instances: RwLock<HashMap<String, Slot>>,
}

impl InstanceManager {
    pub fn new(driver: Arc<dyn WarehouseDriver>) -> Self {
        InstanceManager {
            driver,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the instance for the given settings, creating or replacing it
    /// when the configuration revision changed.
    pub fn get_or_create(
        &self,
        settings: &InstanceSettings,
    ) -> Result<Arc<Instance>, QueryError> {
        {
            let instances = self.instances.read().unwrap();
            if let Some(slot) = instances.get(&settings.uid) {
                if slot.version == settings.updated {
                    return Ok(slot.instance.clone());
                }
            }
        }

        // Built outside the lock; a concurrent creator may win the race below.
        let fresh = Instance::create(self.driver.clone(), settings)?;

        let mut instances = self.instances.write().unwrap();
        match instances.entry(settings.uid.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().version == settings.updated {
                    // Lost the race; the redundant instance disposes on drop.
                    return Ok(slot.get().instance.clone());
                }
                info!(
                    uid = %settings.uid,
                    old_version = slot.get().version,
                    new_version = settings.updated,
                    "replacing instance after configuration change"
                );
                slot.insert(Slot {
                    version: settings.updated,
                    instance: fresh.clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    version: settings.updated,
                    instance: fresh.clone(),
                });
            }
        }
        Ok(fresh)
    }

    /// Live instances, for the metrics collector.
    pub fn snapshot(&self) -> Vec<Arc<Instance>> {
        self.instances
            .read()
            .unwrap()
            .values()
            .map(|slot| slot.instance.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registered instance, disposing those with no outstanding
    /// references. Used at shutdown.
    pub fn dispose_all(&self) {
        let mut instances = self.instances.write().unwrap();
        for (_, slot) in instances.drain() {
            slot.instance.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDriver;
    use serde_json::json;

    fn settings(uid: &str, updated: i64) -> InstanceSettings {
        InstanceSettings {
            uid: uid.into(),
            name: "ds".into(),
            updated,
            json_data: json!({}),
            decrypted_secure_json_data: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_same_revision_reuses_instance() {
        let manager = InstanceManager::new(Arc::new(MockDriver::new()));
        let a = manager.get_or_create(&settings("u1", 1)).unwrap();
        let b = manager.get_or_create(&settings("u1", 1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_revision_change_replaces_instance() {
        let manager = InstanceManager::new(Arc::new(MockDriver::new()));
        let old = manager.get_or_create(&settings("u1", 1)).unwrap();
        let new = manager.get_or_create(&settings("u1", 2)).unwrap();

        assert!(!Arc::ptr_eq(&old, &new));
        assert_eq!(manager.len(), 1);

        // The held reference keeps the old instance alive until released.
        assert!(!old.is_disposed());
        drop(old);

        // New lookups resolve to the replacement.
        let again = manager.get_or_create(&settings("u1", 2)).unwrap();
        assert!(Arc::ptr_eq(&new, &again));
    }

    #[tokio::test]
    async fn test_distinct_uids_get_distinct_instances() {
        let manager = InstanceManager::new(Arc::new(MockDriver::new()));
        let a = manager.get_or_create(&settings("u1", 1)).unwrap();
        let b = manager.get_or_create(&settings("u2", 1)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let manager = InstanceManager::new(Arc::new(MockDriver::new()));
        let instance = manager.get_or_create(&settings("u1", 1)).unwrap();
        manager.dispose_all();
        assert!(manager.is_empty());
        assert!(instance.is_disposed());
    }
}
