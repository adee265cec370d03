use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::models::EntityId;
use crate::snapshot::Snapshot;

/// Last snapshot each child's recipient has been told about.
///
/// An entity without an entry has no baseline yet. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    baselines: Arc<Mutex<HashMap<EntityId, Arc<Snapshot>>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self, id: &EntityId) -> Option<Arc<Snapshot>> {
        self.lock().get(id).cloned()
    }

    pub fn is_baselined(&self, id: &EntityId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn replace(&self, id: EntityId, snapshot: Snapshot) {
        self.lock().insert(id, Arc::new(snapshot));
    }

    /// Returns whether a baseline was present.
    pub fn evict(&self, id: &EntityId) -> bool {
        self.lock().remove(id).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityId, Arc<Snapshot>>> {
        // Never held across an await, so a poisoned map is still consistent.
        self.baselines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
