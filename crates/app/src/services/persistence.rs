use gitagrip_core::bus::{EventBus, Subscription};
use gitagrip_core::domain::{Event, EventKind};
use gitagrip_core::ports::{AppConfig, ConfigStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info};

/// Writes the configuration whenever grouping changes
#[derive(Clone)]
pub struct PersistenceService {
    bus: Arc<EventBus>,
    store: Arc<dyn ConfigStore>,
    /// Last saved configuration; settings outside grouping are carried over
    current: Arc<Mutex<AppConfig>>,
}

impl PersistenceService {
    pub fn new(bus: Arc<EventBus>, store: Arc<dyn ConfigStore>, config: AppConfig) -> Self {
        Self {
            bus,
            store,
            current: Arc::new(Mutex::new(config)),
        }
    }

    fn current(&self) -> MutexGuard<'_, AppConfig> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription {
        let service = self.clone();
        self.bus.subscribe(EventKind::ConfigChanged, move |event| {
            if let Event::ConfigChanged { groups, group_order } = event {
                service.save(groups.clone(), group_order.clone());
            }
        })
    }

    /// Persist new grouping, publishing `ConfigSaved` or an `Error`
    pub fn save(&self, groups: BTreeMap<String, Vec<PathBuf>>, group_order: Vec<String>) {
        let mut current = self.current();
        let config = AppConfig {
            groups,
            group_order,
            ..current.clone()
        };

        match self.store.save(&config) {
            Ok(()) => {
                info!(groups = config.groups.len(), "configuration saved");
                *current = config;
                drop(current);
                self.bus.publish(Event::ConfigSaved);
            }
            Err(err) => {
                drop(current);
                error!("Failed to save configuration: {:#}", err);
                self.bus
                    .publish(Event::error("Config save failed", Some(format!("{:#}", err))));
            }
        }
    }

    pub fn config(&self) -> AppConfig {
        self.current().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::FileConfigStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn collect(bus: &EventBus) -> (Arc<Mutex<Vec<Event>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = bus.subscribe_many(&[EventKind::ConfigSaved, EventKind::Error], move |event| {
            sink.lock().unwrap().push(event.clone())
        });
        (seen, sub)
    }

    #[test]
    fn test_config_changed_is_written_and_acknowledged() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FileConfigStore::for_base_dir(temp_dir.path()));
        let mut initial = AppConfig::for_base_dir(temp_dir.path());
        initial.ui.show_ahead_behind = false;

        let bus = Arc::new(EventBus::new());
        let (seen, _events) = collect(&bus);
        let service = PersistenceService::new(bus.clone(), store.clone(), initial);
        let sub = service.subscribe();

        let mut groups = BTreeMap::new();
        groups.insert("Work".to_string(), vec![PathBuf::from("/w/api")]);
        bus.publish(Event::ConfigChanged {
            groups: groups.clone(),
            group_order: vec!["Work".into()],
        });
        assert!(bus.wait_idle(Duration::from_secs(5)));

        let saved = store.load()?;
        assert_eq!(saved.groups, groups);
        assert_eq!(saved.group_order, vec!["Work".to_string()]);
        // Non-grouping settings survive the rewrite
        assert!(!saved.ui.show_ahead_behind);
        assert_eq!(saved.base_dir, temp_dir.path());
        assert_eq!(*seen.lock().unwrap(), vec![Event::ConfigSaved]);

        sub.unsubscribe();
        bus.shutdown();
        Ok(())
    }

    #[test]
    fn test_unwritable_location_reports_error() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = Arc::new(FileConfigStore::with_path(temp_dir.path().join("missing/dir/c.toml")));
        let bus = Arc::new(EventBus::new());
        let (seen, _events) = collect(&bus);
        let service = PersistenceService::new(bus.clone(), store, AppConfig::default());

        service.save(BTreeMap::new(), Vec::new());
        assert!(bus.wait_idle(Duration::from_secs(5)));

        let events = seen.lock().unwrap().clone();
        assert!(matches!(events.as_slice(), [Event::Error { message, .. }] if message == "Config save failed"));
        bus.shutdown();
        Ok(())
    }
}
