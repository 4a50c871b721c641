//! `PersistenceStore` — the injected key-value medium behind the funnel.

use async_trait::async_trait;

use crate::error::StoreError;

/// Backend-agnostic key-value store. The funnel core treats the persistence
/// medium as opaque bytes under string keys.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Fetch a value, `None` when the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a value, replacing any existing one.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
