use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{Kind, ObjectStore, Revision, StoreError, Versioned};

/// In-process object store with the same revision semantics as the SQLite
/// backend. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(Kind, String), Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(Kind, String), Versioned>> {
        // A poisoned map is still structurally valid; every write replaces
        // whole entries.
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: Kind, name: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.lock().get(&(kind, name.to_string())).cloned())
    }

    async fn create(&self, kind: Kind, name: &str, data: String) -> Result<Revision, StoreError> {
        let mut objects = self.lock();
        let key = (kind, name.to_string());
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind,
                name: name.to_string(),
            });
        }
        objects.insert(key, Versioned { data, revision: 1 });
        Ok(1)
    }

    async fn update(
        &self,
        kind: Kind,
        name: &str,
        data: String,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let mut objects = self.lock();
        let current = objects
            .get_mut(&(kind, name.to_string()))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                name: name.to_string(),
            })?;

        if current.revision != expected {
            return Err(StoreError::Conflict {
                kind,
                name: name.to_string(),
                expected,
                actual: current.revision,
            });
        }

        current.data = data;
        current.revision += 1;
        Ok(current.revision)
    }

    async fn create_or_update(
        &self,
        kind: Kind,
        name: &str,
        data: String,
    ) -> Result<Revision, StoreError> {
        let mut objects = self.lock();
        let entry = objects
            .entry((kind, name.to_string()))
            .or_insert(Versioned {
                data: String::new(),
                revision: 0,
            });
        entry.data = data;
        entry.revision += 1;
        Ok(entry.revision)
    }

    async fn delete(&self, kind: Kind, name: &str) -> Result<bool, StoreError> {
        Ok(self.lock().remove(&(kind, name.to_string())).is_some())
    }

    async fn list(&self, kind: Kind) -> Result<Vec<(String, Versioned)>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect())
    }
}
