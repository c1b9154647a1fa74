use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::network::NetworkConfig;
use super::traits::ChainRpc;
use crate::core::errors::BridgeError;
use crate::protocol::RpcError;

/// One recorded [`ChainRpc::call`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub chain_id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

/// In-process chain node with scripted answers.
///
/// Unscripted methods answer `eth_blockNumber`-style `"0x1"`; `eth_chainId`
/// answers from the network being called.
#[derive(Debug, Default)]
pub struct MockChainRpc {
    responses: Mutex<HashMap<String, Result<Value, RpcError>>>,
    chain_ids: Mutex<HashMap<String, u64>>,
    calls: Mutex<Vec<RecordedCall>>,
    latency: Mutex<Option<Duration>>,
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, method: &str, result: Result<Value, RpcError>) -> &Self {
        self.responses.lock().insert(method.to_string(), result);
        self
    }

    /// Sets what the node at `rpc_url` reports for `eth_chainId`.
    pub fn serve_chain(&self, rpc_url: &str, chain_id: u64) -> &Self {
        self.chain_ids.lock().insert(rpc_url.to_string(), chain_id);
        self
    }

    /// Delays every answer; pair with a paused tokio clock.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.method == method).count()
    }

    async fn wait(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn call(
        &self,
        network: &NetworkConfig,
        method: &str,
        params: &[Value],
    ) -> Result<Value, RpcError> {
        self.calls.lock().push(RecordedCall {
            chain_id: network.chain_id,
            method: method.to_string(),
            params: params.to_vec(),
        });
        self.wait().await;
        let scripted = self.responses.lock().get(method).cloned();
        match scripted {
            Some(answer) => answer,
            None if method == "eth_chainId" => Ok(json!(format!("0x{:x}", network.chain_id))),
            None => Ok(json!("0x1")),
        }
    }

    async fn chain_id(&self, rpc_url: &str) -> Result<u64, BridgeError> {
        self.wait().await;
        self.chain_ids
            .lock()
            .get(rpc_url)
            .copied()
            .ok_or_else(|| BridgeError::Transport(format!("no node at {rpc_url}")))
    }
}
