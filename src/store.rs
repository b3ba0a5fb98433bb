//! In-memory key-value store implementation with thread-safe access
//!
//! Provides a thread-safe store using Arc and RwLock for concurrent access.
//! Writers take the lock exclusively, readers share it, and the guard is never
//! held across anything but the map access itself.

use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait defining the interface for key-value storage operations
pub trait Store: Send + Sync {
    /// Insert or overwrite the value for a key
    async fn set(&self, key: String, value: String) -> Result<()>;

    /// Get a value by key, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a key, reporting whether it was present
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Get the number of stored entries
    async fn len(&self) -> Result<usize>;
}

/// Thread-safe in-memory key-value store
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with an initial mapping
    pub fn with_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Self {
            data: Arc::new(RwLock::new(entries.into_iter().collect())),
        }
    }
}

impl Store for MemoryStore {
    async fn set(&self, key: String, value: String) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(key, value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn len(&self) -> Result<usize> {
        let data = self.data.read().await;
        Ok(data.len())
    }
}
