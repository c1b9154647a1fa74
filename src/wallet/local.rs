use async_trait::async_trait;
use chrono::Utc;
use ethers::{
    prelude::{Middleware, SignerMiddleware},
    providers::{Http, Provider},
    signers::{LocalWallet, Signer},
    types::{transaction::eip712::TypedData, TransactionRequest},
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{TransactionParams, WalletCore, WalletSession};
use crate::blockchain::network::NetworkConfig;
use crate::core::errors::BridgeError;

/// Single-account wallet holding a secp256k1 key in memory, gated by a
/// bcrypt password hash.
pub struct LocalWalletCore {
    signer: Option<LocalWallet>,
    password_hash: String,
    credential_ref: String,
}

impl LocalWalletCore {
    /// A wallet core with no account; every identity request sees "no wallet".
    pub fn empty() -> Self {
        Self { signer: None, password_hash: String::new(), credential_ref: String::new() }
    }

    pub fn from_private_key(private_key_hex: &str, password: &str) -> Result<Self, BridgeError> {
        Self::from_private_key_with_cost(private_key_hex, password, bcrypt::DEFAULT_COST)
    }

    pub fn from_private_key_with_cost(
        private_key_hex: &str,
        password: &str,
        cost: u32,
    ) -> Result<Self, BridgeError> {
        let digits = private_key_hex.trim().trim_start_matches("0x");
        let key = hex::decode(digits)
            .map_err(|e| BridgeError::InvalidInput(format!("private key is not hex: {e}")))?;
        // Do NOT log key material.
        if key.len() != 32 {
            return Err(BridgeError::InvalidInput("Private key must be 32 bytes".into()));
        }
        let signer = LocalWallet::from_bytes(&key)
            .map_err(|e| BridgeError::InvalidInput(format!("Invalid private key: {e}")))?;
        let password_hash = bcrypt::hash(password, cost)
            .map_err(|e| BridgeError::Signing(format!("password hashing failed: {e}")))?;

        info!(address = ?signer.address(), "local wallet loaded");
        Ok(Self {
            signer: Some(signer),
            password_hash,
            credential_ref: uuid::Uuid::new_v4().to_string(),
        })
    }

    fn address_string(signer: &LocalWallet) -> String {
        format!("{:?}", signer.address())
    }

    /// Resolves the signer for a session, refusing sessions issued for
    /// another account or credential.
    fn signer_for(&self, session: &WalletSession) -> Result<&LocalWallet, BridgeError> {
        let signer = self.signer.as_ref().ok_or(BridgeError::NoWallet)?;
        if !session.address.eq_ignore_ascii_case(&Self::address_string(signer))
            || session.credential_ref != self.credential_ref
        {
            warn!(address = %session.address, "session does not belong to this wallet");
            return Err(BridgeError::Locked);
        }
        Ok(signer)
    }
}

fn signature_hex(signature: ethers::types::Signature) -> String {
    format!("0x{}", hex::encode(signature.to_vec()))
}

#[async_trait]
impl WalletCore for LocalWalletCore {
    async fn primary_address(&self) -> Result<Option<String>, BridgeError> {
        Ok(self.signer.as_ref().map(Self::address_string))
    }

    async fn unlock(&self, password: &str) -> Result<WalletSession, BridgeError> {
        let signer = self.signer.as_ref().ok_or(BridgeError::NoWallet)?;
        let ok = bcrypt::verify(password, &self.password_hash)
            .map_err(|e| BridgeError::Signing(format!("password verification failed: {e}")))?;
        if !ok {
            warn!("wallet unlock rejected");
            return Err(BridgeError::InvalidPassword);
        }
        debug!("wallet unlocked");
        Ok(WalletSession {
            address: Self::address_string(signer),
            credential_ref: self.credential_ref.clone(),
            created_at: Utc::now(),
        })
    }

    async fn personal_sign(
        &self,
        session: &WalletSession,
        message: &[u8],
    ) -> Result<String, BridgeError> {
        let signer = self.signer_for(session)?;
        let signature = signer
            .sign_message(message)
            .await
            .map_err(|e| BridgeError::Signing(e.to_string()))?;
        Ok(signature_hex(signature))
    }

    async fn sign_typed_data(
        &self,
        session: &WalletSession,
        typed_data: &Value,
    ) -> Result<String, BridgeError> {
        let signer = self.signer_for(session)?;
        let typed: TypedData = serde_json::from_value(typed_data.clone())
            .map_err(|e| BridgeError::InvalidInput(format!("invalid typed data: {e}")))?;
        let signature = signer
            .sign_typed_data(&typed)
            .await
            .map_err(|e| BridgeError::Signing(e.to_string()))?;
        Ok(signature_hex(signature))
    }

    async fn send_transaction(
        &self,
        session: &WalletSession,
        network: &NetworkConfig,
        tx: &TransactionParams,
    ) -> Result<String, BridgeError> {
        let signer = self.signer_for(session)?.clone().with_chain_id(network.chain_id);
        if let Some(from) = tx.from_address()? {
            if from != signer.address() {
                return Err(BridgeError::InvalidInput(format!(
                    "transaction sender {from:?} is not the wallet account"
                )));
            }
        }

        let mut request = TransactionRequest::new().from(signer.address()).value(tx.value_wei()?);
        if let Some(to) = tx.to_address()? {
            request = request.to(to);
        }
        if let Some(data) = tx.calldata()? {
            request = request.data(data);
        }
        if let Some(gas) = tx.gas_limit()? {
            request = request.gas(gas);
        }
        if let Some(price) = tx.gas_price_wei()? {
            request = request.gas_price(price);
        }
        if let Some(nonce) = tx.nonce_value()? {
            request = request.nonce(nonce);
        }

        let provider = Provider::<Http>::try_from(network.rpc_url.as_str())
            .map_err(|e| BridgeError::InvalidInput(format!("invalid RPC URL: {e}")))?;
        let client = SignerMiddleware::new(provider, signer);
        let pending_tx = client
            .send_transaction(request, None)
            .await
            .map_err(|e| BridgeError::Transport(format!("Failed to send transaction: {e}")))?;

        let tx_hash = format!("0x{}", hex::encode(pending_tx.tx_hash().as_bytes()));
        info!(tx_hash = %tx_hash, chain_id = network.chain_id, "Transaction sent");
        Ok(tx_hash)
    }
}
