use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{SharedState, StateError};

/// In-process `SharedState` for tests. Expiry is recorded but not enforced.
#[derive(Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, (String, Option<Duration>)>>,
    lists: Mutex<HashMap<String, Vec<String>>>,
    writes: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<String>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.values.lock().unwrap().get(key).map(|(v, _)| v.clone())
    }

    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.values.lock().unwrap().get(key).and_then(|(_, t)| *t)
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.lists.lock().unwrap().get(key).cloned().unwrap_or_default()
    }

    /// Every value written to `key`, in write order.
    pub fn writes_to(&self, key: &str) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SharedState for MemoryState {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StateError> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), ttl));
        self.writes
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StateError> {
        let mut values = self.values.lock().unwrap();
        for key in keys {
            values.remove(key);
        }
        self.deletes.lock().unwrap().extend(keys.iter().cloned());
        Ok(())
    }

    async fn push(&self, key: &str, values: &[String]) -> Result<(), StateError> {
        self.lists
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(values.iter().cloned());
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StateError> {
        let mut values = self.values.lock().unwrap();
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), (value.to_string(), Some(ttl)));
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StateError> {
        let mut values = self.values.lock().unwrap();
        match values.get(key) {
            Some((stored, _)) if stored == value => {
                values.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
