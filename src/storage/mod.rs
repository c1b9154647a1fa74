//! Durable key-value store shared by the background coordinator and the
//! confirmation UI.
//!
//! Values are whole JSON documents. Nothing here offers partial-field
//! updates: callers read a value, change it and write it back in full.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::core::errors::BridgeError;

mod memory;
mod sites;
mod sqlite;

pub use memory::MemoryStore;
pub use sites::AuthorizedSites;
pub use sqlite::SqliteStore;

/// Store keys. Spellings match what the extension pages persisted before,
/// so an existing profile keeps its grants.
pub mod keys {
    pub const PENDING_AUTH: &str = "pendingAuth";
    pub const PENDING_SIGNATURE: &str = "pendingSignature";
    pub const AUTHORIZED_SITES: &str = "authorizedSites";
    pub const WALLET_SESSION: &str = "wallet_session";
    pub const SELECTED_NETWORK: &str = "selectedNetwork";
    pub const CUSTOM_NETWORKS: &str = "customNetworks";
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BridgeError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), BridgeError>;

    /// Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), BridgeError>;

    /// Returns true if the store does not outlive the process.
    fn is_in_memory(&self) -> bool;
}

/// Typed view over a shared [`DurableStore`].
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn DurableStore>,
}

impl StoreHandle {
    pub fn new(inner: Arc<dyn DurableStore>) -> Self {
        Self { inner }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn raw(&self) -> &Arc<dyn DurableStore> {
        &self.inner
    }

    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BridgeError> {
        match self.inner.get(key).await? {
            Some(Value::Null) | None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Like [`load`](Self::load) but a value that no longer decodes is
    /// treated as absent and removed, so a corrupt slot cannot wedge a flow.
    pub async fn load_or_discard<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, BridgeError> {
        match self.load(key).await {
            Ok(value) => Ok(value),
            Err(BridgeError::Serialization(e)) => {
                tracing::warn!(key, error = %e, "discarding undecodable store value");
                self.inner.remove(key).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), BridgeError> {
        self.inner.set(key, serde_json::to_value(value)?).await
    }

    pub async fn remove(&self, key: &str) -> Result<(), BridgeError> {
        self.inner.remove(key).await
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").field("in_memory", &self.inner.is_in_memory()).finish()
    }
}
