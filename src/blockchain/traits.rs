use async_trait::async_trait;
use serde_json::Value;

use super::network::NetworkConfig;
use crate::{core::errors::BridgeError, protocol::RpcError};

/// Defines the interface for talking to a chain node.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Performs one JSON-RPC call against `network`.
    ///
    /// Errors reported by the node come back verbatim; transport and decoding
    /// failures are already mapped to an internal error.
    async fn call(
        &self,
        network: &NetworkConfig,
        method: &str,
        params: &[Value],
    ) -> Result<Value, RpcError>;

    /// Asks the node at `rpc_url` which chain it serves.
    async fn chain_id(&self, rpc_url: &str) -> Result<u64, BridgeError>;
}
