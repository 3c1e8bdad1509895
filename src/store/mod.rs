use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod action_log;
pub mod detections;
pub mod entities;
pub mod profiles;
pub mod rules;
pub mod runtime;
pub mod system_config;

pub use action_log::ActionLogStore;
pub use detections::DetectionStore;
pub use entities::EntityStore;
pub use profiles::SettingsProfileStore;
pub use rules::RuleStore;
pub use runtime::RuleRuntimeStore;
pub use system_config::SystemConfigStore;

/// In-process state bundle with explicit init; no hidden globals.
#[derive(Clone)]
pub struct Stores {
    pub entities: Arc<EntityStore>,
    pub detections: Arc<DetectionStore>,
    pub rules: Arc<RuleStore>,
    pub runtime: Arc<RuleRuntimeStore>,
    pub action_log: Arc<ActionLogStore>,
    pub profiles: Arc<SettingsProfileStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            entities: Arc::new(EntityStore::new()),
            detections: Arc::new(DetectionStore::new()),
            rules: Arc::new(RuleStore::new()),
            runtime: Arc::new(RuleRuntimeStore::new()),
            action_log: Arc::new(ActionLogStore::new()),
            profiles: Arc::new(SettingsProfileStore::new()),
        }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn read_guard<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|err| err.into_inner())
}

pub(crate) fn write_guard<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|err| err.into_inner())
}

pub(crate) fn mutex_guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|err| err.into_inner())
}
