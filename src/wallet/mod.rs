//! Wallet core: the account, its unlock session and the signing primitives
//! the confirmation UI invokes after approval.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blockchain::network::NetworkConfig;
use crate::core::errors::BridgeError;
use crate::storage::{keys, StoreHandle};

pub mod local;
pub mod mock;
pub mod payload;

pub use local::LocalWalletCore;
pub use mock::MockWalletCore;
pub use payload::{SigningPayload, TransactionParams};

/// Proof of a recent unlock. Expiry forces a new unlock; it never touches the
/// underlying key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSession {
    pub address: String,
    pub credential_ref: String,
    pub created_at: DateTime<Utc>,
}

impl WalletSession {
    pub fn is_expired(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) >= ttl
    }
}

#[async_trait]
pub trait WalletCore: Send + Sync {
    /// Address of the primary account, `None` when no wallet exists yet.
    /// Does not require an unlocked session.
    async fn primary_address(&self) -> Result<Option<String>, BridgeError>;

    async fn unlock(&self, password: &str) -> Result<WalletSession, BridgeError>;

    /// EIP-191 signature over `message`, 0x-prefixed hex.
    async fn personal_sign(
        &self,
        session: &WalletSession,
        message: &[u8],
    ) -> Result<String, BridgeError>;

    /// EIP-712 signature over a typed-data document, 0x-prefixed hex.
    async fn sign_typed_data(
        &self,
        session: &WalletSession,
        typed_data: &Value,
    ) -> Result<String, BridgeError>;

    /// Signs and broadcasts on `network`, returning the transaction hash.
    async fn send_transaction(
        &self,
        session: &WalletSession,
        network: &NetworkConfig,
        tx: &TransactionParams,
    ) -> Result<String, BridgeError>;
}

/// The persisted `wallet_session` record.
#[derive(Debug, Clone)]
pub struct WalletSessions {
    store: StoreHandle,
    ttl: chrono::Duration,
}

impl WalletSessions {
    pub fn new(store: StoreHandle, ttl: chrono::Duration) -> Self {
        Self { store, ttl }
    }

    /// The live session, if any. An expired record is removed.
    pub async fn current(&self) -> Result<Option<WalletSession>, BridgeError> {
        let Some(session) = self.store.load_or_discard::<WalletSession>(keys::WALLET_SESSION).await?
        else {
            return Ok(None);
        };
        if session.is_expired(self.ttl, Utc::now()) {
            tracing::debug!(address = %session.address, "wallet session expired");
            self.store.remove(keys::WALLET_SESSION).await?;
            return Ok(None);
        }
        Ok(Some(session))
    }

    pub async fn save(&self, session: &WalletSession) -> Result<(), BridgeError> {
        self.store.save(keys::WALLET_SESSION, session).await
    }

    pub async fn clear(&self) -> Result<(), BridgeError> {
        self.store.remove(keys::WALLET_SESSION).await
    }
}
