use std::collections::BTreeMap;

use super::{keys, StoreHandle};
use crate::core::errors::BridgeError;

/// Persisted origin grants: hostname -> allowed.
///
/// The whole map is read and written as one value.
#[derive(Debug, Clone)]
pub struct AuthorizedSites {
    store: StoreHandle,
}

impl AuthorizedSites {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    async fn read(&self) -> Result<BTreeMap<String, bool>, BridgeError> {
        Ok(self.store.load_or_discard(keys::AUTHORIZED_SITES).await?.unwrap_or_default())
    }

    pub async fn is_authorized(&self, origin: &str) -> Result<bool, BridgeError> {
        if origin.is_empty() {
            return Ok(false);
        }
        Ok(self.read().await?.get(origin).copied().unwrap_or(false))
    }

    pub async fn authorize(&self, origin: &str) -> Result<(), BridgeError> {
        if origin.is_empty() {
            return Err(BridgeError::InvalidInput("cannot authorize an empty origin".into()));
        }
        let mut sites = self.read().await?;
        sites.insert(origin.to_string(), true);
        self.store.save(keys::AUTHORIZED_SITES, &sites).await?;
        tracing::info!(origin, "site authorized");
        Ok(())
    }

    /// Returns whether a grant existed.
    pub async fn revoke(&self, origin: &str) -> Result<bool, BridgeError> {
        let mut sites = self.read().await?;
        let existed = sites.remove(origin).is_some();
        if existed {
            self.store.save(keys::AUTHORIZED_SITES, &sites).await?;
            tracing::info!(origin, "site authorization revoked");
        }
        Ok(existed)
    }

    pub async fn list(&self) -> Result<Vec<String>, BridgeError> {
        Ok(self.read().await?.into_iter().filter(|(_, ok)| *ok).map(|(site, _)| site).collect())
    }
}
