//! Network registry: immutable built-ins plus user-added custom networks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::traits::ChainRpc;
use crate::core::errors::BridgeError;
use crate::protocol::parse_hex_quantity;
use crate::storage::{keys, StoreHandle};

/// Blockchain network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Stable registry key, e.g. `mainnet` or `custom:10`.
    pub key: String,
    pub name: String,
    pub rpc_url: String,
    pub chain_id: u64,
    pub currency_symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_explorer: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
}

impl NetworkConfig {
    pub fn builtin_defaults() -> Vec<NetworkConfig> {
        vec![
            NetworkConfig {
                key: "mainnet".to_string(),
                name: "Mainnet".to_string(),
                rpc_url: "https://eth.llamarpc.com".to_string(),
                chain_id: 1,
                currency_symbol: "ETH".to_string(),
                block_explorer: Some("https://etherscan.io".to_string()),
                is_custom: false,
            },
            NetworkConfig {
                key: "sepolia".to_string(),
                name: "Sepolia Testnet".to_string(),
                rpc_url: "https://ethereum-sepolia.publicnode.com".to_string(),
                chain_id: 11_155_111,
                currency_symbol: "ETH".to_string(),
                block_explorer: Some("https://sepolia.etherscan.io".to_string()),
                is_custom: false,
            },
            NetworkConfig {
                key: "polygon".to_string(),
                name: "Polygon".to_string(),
                rpc_url: "https://polygon.llamarpc.com".to_string(),
                chain_id: 137,
                currency_symbol: "POL".to_string(),
                block_explorer: Some("https://polygonscan.com".to_string()),
                is_custom: false,
            },
        ]
    }

    pub fn custom_key(chain_id: u64) -> String {
        format!("custom:{chain_id}")
    }

    fn validate_fields(&self) -> Result<(), BridgeError> {
        if self.name.trim().is_empty() {
            return Err(BridgeError::InvalidInput("network name is required".into()));
        }
        if self.chain_id == 0 {
            return Err(BridgeError::InvalidInput("chain id must be a positive integer".into()));
        }
        if self.currency_symbol.trim().is_empty() {
            return Err(BridgeError::InvalidInput("currency symbol is required".into()));
        }
        validate_http_url(&self.rpc_url)?;
        if let Some(explorer) = &self.block_explorer {
            validate_http_url(explorer)?;
        }
        Ok(())
    }
}

fn validate_http_url(raw: &str) -> Result<(), BridgeError> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| BridgeError::InvalidInput(format!("invalid URL {raw:?}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(BridgeError::InvalidInput(format!("unsupported URL scheme {other:?}"))),
    }
}

/// `wallet_addEthereumChain` parameter object.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChainParams {
    pub chain_id: String,
    pub chain_name: String,
    #[serde(default)]
    pub rpc_urls: Vec<String>,
    pub native_currency: Option<NativeCurrency>,
    #[serde(default)]
    pub block_explorer_urls: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NativeCurrency {
    #[serde(default)]
    pub name: String,
    pub symbol: String,
    #[serde(default = "NativeCurrency::default_decimals")]
    pub decimals: u8,
}

impl NativeCurrency {
    fn default_decimals() -> u8 {
        18
    }
}

impl AddChainParams {
    /// Validates the payload and turns it into a custom network entry.
    pub fn into_network(self) -> Result<NetworkConfig, BridgeError> {
        let chain_id = parse_hex_quantity(&self.chain_id)?;
        let rpc_url = self
            .rpc_urls
            .into_iter()
            .map(|u| u.trim().to_string())
            .find(|u| !u.is_empty())
            .ok_or_else(|| BridgeError::InvalidInput("rpcUrls must contain at least one URL".into()))?;
        let currency = self
            .native_currency
            .ok_or_else(|| BridgeError::InvalidInput("nativeCurrency is required".into()))?;
        let network = NetworkConfig {
            key: NetworkConfig::custom_key(chain_id),
            name: self.chain_name.trim().to_string(),
            rpc_url,
            chain_id,
            currency_symbol: currency.symbol.trim().to_string(),
            block_explorer: self.block_explorer_urls.and_then(|urls| urls.into_iter().next()),
            is_custom: true,
        };
        network.validate_fields()?;
        Ok(network)
    }
}

/// `wallet_switchEthereumChain` parameter object.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchChainParams {
    pub chain_id: String,
}

/// Read/write access to known networks and the current selection.
///
/// Custom networks persist under `customNetworks`, keyed by decimal chain id.
/// Clones share one write lock; every load-modify-save of the custom map or
/// the selection runs under it.
#[derive(Debug, Clone)]
pub struct NetworkRegistry {
    store: StoreHandle,
    builtins: Arc<Vec<NetworkConfig>>,
    writes: Arc<Mutex<()>>,
}

impl NetworkRegistry {
    pub fn new(store: StoreHandle, builtins: Vec<NetworkConfig>) -> Self {
        let builtins = if builtins.is_empty() { NetworkConfig::builtin_defaults() } else { builtins };
        Self { store, builtins: Arc::new(builtins), writes: Arc::new(Mutex::new(())) }
    }

    fn fallback(&self) -> &NetworkConfig {
        &self.builtins[0]
    }

    pub fn builtins(&self) -> &[NetworkConfig] {
        &self.builtins
    }

    async fn custom_map(&self) -> Result<BTreeMap<String, NetworkConfig>, BridgeError> {
        Ok(self.store.load_or_discard(keys::CUSTOM_NETWORKS).await?.unwrap_or_default())
    }

    pub async fn custom_networks(&self) -> Result<Vec<NetworkConfig>, BridgeError> {
        let mut customs: Vec<_> = self.custom_map().await?.into_values().collect();
        customs.sort_by_key(|n| n.chain_id);
        Ok(customs)
    }

    pub async fn all_networks(&self) -> Result<Vec<NetworkConfig>, BridgeError> {
        let mut all = self.builtins.as_ref().clone();
        all.extend(self.custom_networks().await?);
        Ok(all)
    }

    pub async fn find_by_key(&self, key: &str) -> Result<Option<NetworkConfig>, BridgeError> {
        if let Some(n) = self.builtins.iter().find(|n| n.key == key) {
            return Ok(Some(n.clone()));
        }
        Ok(self.custom_map().await?.into_values().find(|n| n.key == key))
    }

    pub async fn find_by_chain_id(&self, chain_id: u64) -> Result<Option<NetworkConfig>, BridgeError> {
        if let Some(n) = self.builtins.iter().find(|n| n.chain_id == chain_id) {
            return Ok(Some(n.clone()));
        }
        Ok(self.custom_map().await?.remove(&chain_id.to_string()))
    }

    /// The selected network; a dangling selection falls back to the first
    /// built-in.
    pub async fn current_network(&self) -> Result<NetworkConfig, BridgeError> {
        let selected: Option<String> = self.store.load_or_discard(keys::SELECTED_NETWORK).await?;
        if let Some(key) = selected {
            if let Some(network) = self.find_by_key(&key).await? {
                return Ok(network);
            }
            warn!(key = %key, "selected network no longer exists, falling back");
        }
        Ok(self.fallback().clone())
    }

    pub async fn select(&self, key: &str) -> Result<NetworkConfig, BridgeError> {
        let _guard = self.writes.lock().await;
        self.select_locked(key).await
    }

    async fn select_locked(&self, key: &str) -> Result<NetworkConfig, BridgeError> {
        let network = self
            .find_by_key(key)
            .await?
            .ok_or_else(|| BridgeError::InvalidInput(format!("unknown network {key:?}")))?;
        self.store.save(keys::SELECTED_NETWORK, &network.key).await?;
        info!(network = %network.key, chain_id = network.chain_id, "network selected");
        Ok(network)
    }

    /// Selects the network serving `chain_id`. `None` when no such network is
    /// registered; the selection is then left untouched.
    pub async fn select_chain(&self, chain_id: u64) -> Result<Option<NetworkConfig>, BridgeError> {
        let _guard = self.writes.lock().await;
        match self.find_by_chain_id(chain_id).await? {
            Some(network) => self.select_locked(&network.key).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn add_custom(&self, mut network: NetworkConfig) -> Result<NetworkConfig, BridgeError> {
        network.key = NetworkConfig::custom_key(network.chain_id);
        network.is_custom = true;
        network.validate_fields()?;
        if self.builtins.iter().any(|n| n.chain_id == network.chain_id) {
            return Err(BridgeError::InvalidInput(format!(
                "chain {} is a built-in network",
                network.chain_id
            )));
        }
        let _guard = self.writes.lock().await;
        let mut customs = self.custom_map().await?;
        let slot = network.chain_id.to_string();
        if customs.contains_key(&slot) {
            return Err(BridgeError::InvalidInput(format!(
                "custom network for chain {} already exists",
                network.chain_id
            )));
        }
        customs.insert(slot, network.clone());
        self.store.save(keys::CUSTOM_NETWORKS, &customs).await?;
        info!(chain_id = network.chain_id, name = %network.name, "custom network added");
        Ok(network)
    }

    pub async fn update_custom(
        &self,
        chain_id: u64,
        mut network: NetworkConfig,
    ) -> Result<NetworkConfig, BridgeError> {
        let _guard = self.writes.lock().await;
        let mut customs = self.custom_map().await?;
        let previous = customs.remove(&chain_id.to_string()).ok_or_else(|| {
            BridgeError::InvalidInput(format!("no custom network for chain {chain_id}"))
        })?;
        network.key = NetworkConfig::custom_key(network.chain_id);
        network.is_custom = true;
        network.validate_fields()?;
        if network.chain_id != chain_id
            && (self.builtins.iter().any(|n| n.chain_id == network.chain_id)
                || customs.contains_key(&network.chain_id.to_string()))
        {
            return Err(BridgeError::InvalidInput(format!(
                "chain {} is already registered",
                network.chain_id
            )));
        }
        customs.insert(network.chain_id.to_string(), network.clone());
        self.store.save(keys::CUSTOM_NETWORKS, &customs).await?;

        let selected: Option<String> = self.store.load_or_discard(keys::SELECTED_NETWORK).await?;
        if selected.as_deref() == Some(previous.key.as_str()) {
            self.store.save(keys::SELECTED_NETWORK, &network.key).await?;
        }
        info!(chain_id = network.chain_id, "custom network updated");
        Ok(network)
    }

    /// Removing the selected network moves the selection to the first
    /// built-in.
    pub async fn remove_custom(&self, chain_id: u64) -> Result<(), BridgeError> {
        if self.builtins.iter().any(|n| n.chain_id == chain_id) {
            return Err(BridgeError::InvalidInput(format!(
                "built-in network {chain_id} cannot be removed"
            )));
        }
        let _guard = self.writes.lock().await;
        let mut customs = self.custom_map().await?;
        let removed = customs.remove(&chain_id.to_string()).ok_or_else(|| {
            BridgeError::InvalidInput(format!("no custom network for chain {chain_id}"))
        })?;
        self.store.save(keys::CUSTOM_NETWORKS, &customs).await?;

        let selected: Option<String> = self.store.load_or_discard(keys::SELECTED_NETWORK).await?;
        if selected.as_deref() == Some(removed.key.as_str()) {
            let fallback = self.fallback().key.clone();
            self.store.save(keys::SELECTED_NETWORK, &fallback).await?;
        }
        info!(chain_id, "custom network removed");
        Ok(())
    }

    /// Checks that the node at `rpc_url` really serves `chain_id`.
    pub async fn validate_network(
        &self,
        rpc: &dyn ChainRpc,
        rpc_url: &str,
        chain_id: u64,
    ) -> Result<(), BridgeError> {
        match rpc.chain_id(rpc_url).await {
            Ok(reported) if reported == chain_id => Ok(()),
            Ok(reported) => Err(BridgeError::InvalidInput(format!(
                "RPC endpoint reports chain id {reported}, expected {chain_id}"
            ))),
            Err(e) => {
                warn!(error = %e, "network validation probe failed");
                Err(BridgeError::InvalidInput("could not verify chain id of RPC endpoint".into()))
            }
        }
    }
}
