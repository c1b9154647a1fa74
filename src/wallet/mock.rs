use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use super::{TransactionParams, WalletCore, WalletSession};
use crate::blockchain::network::NetworkConfig;
use crate::core::errors::BridgeError;

/// Operations a [`MockWalletCore`] has performed.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletCall {
    PersonalSign(Vec<u8>),
    SignTypedData(Value),
    SendTransaction { chain_id: u64, tx: TransactionParams },
}

/// Deterministic wallet core for tests: fixed address and password, canned
/// signatures, and an optional failure for the next signing call.
#[derive(Debug)]
pub struct MockWalletCore {
    address: Option<String>,
    password: String,
    fail_next: Mutex<Option<String>>,
    calls: Mutex<Vec<WalletCall>>,
}

impl MockWalletCore {
    pub const DEFAULT_ADDRESS: &'static str = "0x71c7656ec7ab88b098defb751b7401b5f6d8976f";
    pub const PASSWORD: &'static str = "correct horse";

    pub fn new() -> Self {
        Self::with_address(Self::DEFAULT_ADDRESS)
    }

    pub fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
            password: Self::PASSWORD.to_string(),
            fail_next: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A wallet core that has never been set up.
    pub fn without_wallet() -> Self {
        Self { address: None, ..Self::new() }
    }

    /// Makes the next signing or sending call fail with `reason`.
    pub fn fail_next_signing(&self, reason: &str) {
        *self.fail_next.lock() = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<WalletCall> {
        self.calls.lock().clone()
    }

    fn check(&self, session: &WalletSession) -> Result<(), BridgeError> {
        let address = self.address.as_deref().ok_or(BridgeError::NoWallet)?;
        if session.address != address {
            return Err(BridgeError::Locked);
        }
        match self.fail_next.lock().take() {
            Some(reason) => Err(BridgeError::Signing(reason)),
            None => Ok(()),
        }
    }
}

impl Default for MockWalletCore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletCore for MockWalletCore {
    async fn primary_address(&self) -> Result<Option<String>, BridgeError> {
        Ok(self.address.clone())
    }

    async fn unlock(&self, password: &str) -> Result<WalletSession, BridgeError> {
        let address = self.address.clone().ok_or(BridgeError::NoWallet)?;
        if password != self.password {
            return Err(BridgeError::InvalidPassword);
        }
        Ok(WalletSession { address, credential_ref: "mock".into(), created_at: Utc::now() })
    }

    async fn personal_sign(
        &self,
        session: &WalletSession,
        message: &[u8],
    ) -> Result<String, BridgeError> {
        self.check(session)?;
        self.calls.lock().push(WalletCall::PersonalSign(message.to_vec()));
        Ok(format!("0x{}{}", hex::encode(message), "1b"))
    }

    async fn sign_typed_data(
        &self,
        session: &WalletSession,
        typed_data: &Value,
    ) -> Result<String, BridgeError> {
        self.check(session)?;
        self.calls.lock().push(WalletCall::SignTypedData(typed_data.clone()));
        Ok(format!("0x{}", "ab".repeat(65)))
    }

    async fn send_transaction(
        &self,
        session: &WalletSession,
        network: &NetworkConfig,
        tx: &TransactionParams,
    ) -> Result<String, BridgeError> {
        self.check(session)?;
        let mut calls = self.calls.lock();
        calls.push(WalletCall::SendTransaction { chain_id: network.chain_id, tx: tx.clone() });
        Ok(format!("0x{:064x}", calls.len()))
    }
}
