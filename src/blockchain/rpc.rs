use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::network::NetworkConfig;
use super::traits::ChainRpc;
use crate::core::errors::BridgeError;
use crate::protocol::{parse_hex_quantity, RpcError};

/// JSON-RPC over HTTP.
pub struct HttpChainRpc {
    client: Client,
    next_id: AtomicU64,
}

impl HttpChainRpc {
    pub fn new() -> Result<Self, BridgeError> {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, BridgeError> {
        // allow proxy environment vars, short timeout
        let mut builder = Client::builder().timeout(timeout);
        if let Ok(proxy) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("HTTP_PROXY")) {
            if let Ok(p) = reqwest::Proxy::all(proxy) {
                builder = builder.proxy(p);
            }
        }
        let client = builder
            .build()
            .map_err(|e| BridgeError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, next_id: AtomicU64::new(1) })
    }

    async fn post(&self, rpc_url: &str, method: &str, params: &[Value]) -> Result<Value, BridgeError> {
        let url = reqwest::Url::parse(rpc_url.trim())
            .map_err(|e| BridgeError::InvalidInput(format!("invalid RPC URL {rpc_url:?}: {e}")))?;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        debug!(method, host = url.host_str().unwrap_or(""), "chain rpc call");
        let resp = self.client.post(url).json(&payload).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() && body.get("error").is_none() {
            return Err(BridgeError::Transport(format!("rpc error status: {}", status)));
        }
        Ok(body)
    }
}

/// Splits a JSON-RPC response body into its result or error.
fn unwrap_envelope(body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error") {
        return Err(serde_json::from_value::<RpcError>(err.clone()).unwrap_or_else(|_| {
            warn!("node returned a malformed error object");
            RpcError::internal_error_with("RPC call failed")
        }));
    }
    match body.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(RpcError::internal_error_with("RPC call failed")),
    }
}

#[async_trait]
impl ChainRpc for HttpChainRpc {
    async fn call(
        &self,
        network: &NetworkConfig,
        method: &str,
        params: &[Value],
    ) -> Result<Value, RpcError> {
        match self.post(&network.rpc_url, method, params).await {
            Ok(body) => unwrap_envelope(body),
            Err(e) => {
                warn!(method, network = %network.key, error = %e, "RPC call failed");
                Err(RpcError::internal_error_with("RPC call failed"))
            }
        }
    }

    async fn chain_id(&self, rpc_url: &str) -> Result<u64, BridgeError> {
        let body = self.post(rpc_url, "eth_chainId", &[]).await?;
        let result = unwrap_envelope(body)?;
        let raw = result
            .as_str()
            .ok_or_else(|| BridgeError::Transport("eth_chainId returned a non-string".into()))?;
        parse_hex_quantity(raw)
            .map_err(|e| BridgeError::Transport(format!("eth_chainId returned {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    #[test]
    fn envelope_prefers_error() {
        let err = unwrap_envelope(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 3, "message": "execution reverted"}}))
            .unwrap_err();
        assert_eq!(err.code.code(), 3);
        assert_eq!(unwrap_envelope(json!({"result": "0x10"})).unwrap(), json!("0x10"));
        assert!(unwrap_envelope(json!({"jsonrpc": "2.0"})).is_err());

        let malformed = unwrap_envelope(json!({"error": "boom", "result": "0x1"})).unwrap_err();
        assert_eq!(malformed.code, ErrorCode::InternalError);
    }
}
