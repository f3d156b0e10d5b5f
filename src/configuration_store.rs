use std::sync::{Arc, RwLock};

use crate::project_config::ProjectConfig;

/// `ConfigurationStore` holds the current [`ProjectConfig`] snapshot and allows concurrent access
/// for readers and writers.
///
/// Snapshots are never mutated: an update swaps in a new `Arc`, so decisions already running keep
/// the snapshot they started with.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<ProjectConfig>>>,
}

impl ConfigurationStore {
    pub fn new() -> Self {
        Self {
            configuration: RwLock::new(None),
        }
    }

    pub fn get_configuration(&self) -> Option<Arc<ProjectConfig>> {
        // A poisoned lock only means a writer panicked while swapping the pointer; treat it as
        // "no configuration" instead of crashing the app.
        let configuration = self.configuration.read().ok()?;
        configuration.clone()
    }

    /// Set new configuration, returning the previous one.
    pub fn set_configuration(&self, config: ProjectConfig) -> Option<Arc<ProjectConfig>> {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_value = Some(Arc::new(config));

        let mut configuration_slot = self.configuration.write().ok()?;
        std::mem::replace(&mut configuration_slot, new_value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::project_config::ProjectConfig;

    use super::ConfigurationStore;

    fn config(revision: &str) -> ProjectConfig {
        ProjectConfig::from_json(&format!(r#"{{"version": "4", "revision": "{revision}"}}"#))
            .unwrap()
    }

    #[test]
    fn can_set_configuration_from_another_thread() {
        let store = Arc::new(ConfigurationStore::new());
        assert!(store.get_configuration().is_none());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_configuration(config("1"));
            })
            .join();
        }

        assert_eq!(store.get_configuration().unwrap().revision, "1");
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let store = ConfigurationStore::new();
        store.set_configuration(config("1"));

        let snapshot = store.get_configuration().unwrap();
        let previous = store.set_configuration(config("2")).unwrap();

        assert!(Arc::ptr_eq(&snapshot, &previous));
        assert_eq!(snapshot.revision, "1");
        assert_eq!(store.get_configuration().unwrap().revision, "2");
    }
}
