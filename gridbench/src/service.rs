//! The boundary towards the data store under test.
//!
//! Product adapters implement [`BasicOperations`]; the engine never learns
//! which store sits behind it.

#[cfg(feature = "builtins")]
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

#[cfg(feature = "builtins")]
use parking_lot::RwLock;

use crate::error::ServiceError;

/// Key-value operations every benchmarked store offers.
pub trait BasicOperations: Send + Sync {
    fn get(&self, key: i64) -> Result<Option<Vec<u8>>, ServiceError>;

    fn put(&self, key: i64, value: Vec<u8>) -> Result<(), ServiceError>;

    /// Returns the previous value.
    fn remove(&self, key: i64) -> Result<Option<Vec<u8>>, ServiceError>;

    fn contains_key(&self, key: i64) -> Result<bool, ServiceError> {
        self.get(key).map(|value| value.is_some())
    }
}

/// Map-backed store living in the benchmark process. Can be switched
/// unavailable to exercise error accounting.
#[cfg(feature = "builtins")]
#[derive(Debug)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<i64, Vec<u8>>>,
    available: AtomicBool,
}

#[cfg(feature = "builtins")]
impl Default for InMemoryCache {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

#[cfg(feature = "builtins")]
impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), ServiceError> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(ServiceError::Unavailable("in-memory cache is switched off".into()))
        }
    }
}

#[cfg(feature = "builtins")]
impl BasicOperations for InMemoryCache {
    fn get(&self, key: i64) -> Result<Option<Vec<u8>>, ServiceError> {
        self.check_available()?;
        Ok(self.entries.read().get(&key).cloned())
    }

    fn put(&self, key: i64, value: Vec<u8>) -> Result<(), ServiceError> {
        self.check_available()?;
        self.entries.write().insert(key, value);
        Ok(())
    }

    fn remove(&self, key: i64) -> Result<Option<Vec<u8>>, ServiceError> {
        self.check_available()?;
        Ok(self.entries.write().remove(&key))
    }

    fn contains_key(&self, key: i64) -> Result<bool, ServiceError> {
        self.check_available()?;
        Ok(self.entries.read().contains_key(&key))
    }
}

#[cfg(all(test, feature = "builtins"))]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let cache = InMemoryCache::new();
        cache.put(1, b"one".to_vec()).unwrap();
        assert_eq!(cache.get(1).unwrap(), Some(b"one".to_vec()));
        assert!(cache.contains_key(1).unwrap());
        assert_eq!(cache.remove(1).unwrap(), Some(b"one".to_vec()));
        assert_eq!(cache.get(1).unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn unavailable_cache_fails_every_call() {
        let cache = InMemoryCache::new();
        cache.set_available(false);
        assert!(matches!(cache.put(1, vec![]), Err(ServiceError::Unavailable(_))));
        assert!(cache.get(1).is_err());
        cache.set_available(true);
        assert!(cache.get(1).is_ok());
    }
}
