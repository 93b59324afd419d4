use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Client, CustomRedisError};

/// In-memory stand-in for Redis. Keys written through `batch_set_nx_ex`
/// become visible to `exists`; TTLs are recorded, not enforced.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, (String, u64)>>>,
    exists_error: Option<CustomRedisError>,
    set_error: Option<CustomRedisError>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<MockRedisCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, u64)>> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Pre-populate a key, as if an earlier process had written it
    pub fn with_key(self, key: &str) -> Self {
        self.lock_store()
            .insert(key.to_owned(), (String::new(), 0));
        self
    }

    pub fn exists_error(mut self, err: CustomRedisError) -> Self {
        self.exists_error = Some(err);
        self
    }

    pub fn set_error(mut self, err: CustomRedisError) -> Self {
        self.set_error = Some(err);
        self
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_calls().clone()
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.lock_store().get(key).map(|(_, ttl)| *ttl)
    }

    fn record(&self, op: &str, key: &str) {
        self.lock_calls().push(MockRedisCall {
            op: op.to_string(),
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        self.record("exists", &k);
        if let Some(err) = &self.exists_error {
            return Err(err.clone());
        }
        Ok(self.lock_store().contains_key(&k))
    }

    async fn batch_set_nx_ex(
        &self,
        items: Vec<(String, String)>,
        ttl_seconds: u64,
    ) -> Result<Vec<bool>, CustomRedisError> {
        for (k, _) in &items {
            self.record("batch_set_nx_ex", k);
        }
        if let Some(err) = &self.set_error {
            return Err(err.clone());
        }
        let mut store = self.lock_store();
        Ok(items
            .into_iter()
            .map(|(k, v)| {
                if store.contains_key(&k) {
                    false
                } else {
                    store.insert(k, (v, ttl_seconds));
                    true
                }
            })
            .collect())
    }
}
