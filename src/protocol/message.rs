//! Wire messages exchanged between the page, the relay, the background
//! coordinator and the confirmation UI.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::RpcError;

/// Request id allocated by one page provider instance. Monotonic per
/// instance, not unique across tabs or documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser tab identity as seen by the background context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One loaded document. A reload or navigation inside the same tab gets a
/// fresh id, so stale responses for the previous document never match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity the relay attaches to every request it forwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOrigin {
    pub tab_id: Option<TabId>,
    pub document_id: DocumentId,
    /// Hostname of the requesting document.
    pub origin: String,
}

/// Globally unique key of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestKey {
    pub tab_id: Option<TabId>,
    pub document_id: DocumentId,
    pub id: RequestId,
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tab_id {
            Some(tab) => write!(f, "{}/{}#{}", tab, self.document_id, self.id),
            None => write!(f, "?/{}#{}", self.document_id, self.id),
        }
    }
}

/// A page request after the relay has tagged it with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub origin: RequestOrigin,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn key(&self) -> RequestKey {
        RequestKey { tab_id: self.origin.tab_id, document_id: self.origin.document_id, id: self.id }
    }

    /// Positional parameter, `None` when absent.
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index)
    }
}

/// Provider state notifications pushed to page code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "camelCase")]
pub enum ProviderEvent {
    Connect {
        #[serde(rename = "chainId")]
        chain_id: String,
    },
    ChainChanged(String),
    NetworkChanged(String),
    AccountsChanged(Vec<String>),
}

/// EIP-6963 provider descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub uuid: String,
    pub name: String,
    pub icon: String,
    pub rdns: String,
}

/// Messages posted on the page's own message channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PageMessage {
    #[serde(rename = "REQUEST")]
    Request {
        id: RequestId,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Vec<Value>>,
    },
    #[serde(rename = "RESPONSE")]
    Response {
        id: RequestId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    #[serde(rename = "EVENT")]
    Event { event: ProviderEvent },
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "PROVIDER_INITIALIZED")]
    ProviderInitialized,
    #[serde(rename = "EIP6963_REQUEST_PROVIDER")]
    RequestProvider,
    #[serde(rename = "EIP6963_ANNOUNCE_PROVIDER")]
    AnnounceProvider { info: ProviderInfo },
}

impl PageMessage {
    pub fn response(id: RequestId, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => PageMessage::Response { id, result: Some(result), error: None },
            Err(error) => PageMessage::Response { id, result: None, error: Some(error) },
        }
    }
}

/// Messages sent to the background coordinator over the runtime channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeMessage {
    #[serde(rename = "PROVIDER_REQUEST")]
    ProviderRequest { data: Request },
    #[serde(rename = "POPUP_RESPONSE")]
    PopupResponse {
        #[serde(rename = "requestId")]
        request_id: RequestKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
}

impl RuntimeMessage {
    pub fn popup_response(request_id: RequestKey, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => {
                RuntimeMessage::PopupResponse { request_id, result: Some(result), error: None }
            }
            Err(error) => RuntimeMessage::PopupResponse { request_id, result: None, error: Some(error) },
        }
    }
}

/// Messages the background coordinator delivers to a tab's relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TabMessage {
    #[serde(rename = "PROVIDER_RESPONSE")]
    Response {
        key: RequestKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    #[serde(rename = "PROVIDER_EVENT")]
    Event { event: ProviderEvent },
}

impl TabMessage {
    pub fn response(key: RequestKey, outcome: Result<Value, RpcError>) -> Self {
        match outcome {
            Ok(result) => TabMessage::Response { key, result: Some(result), error: None },
            Err(error) => TabMessage::Response { key, result: None, error: Some(error) },
        }
    }
}

/// Folds the optional `result`/`error` pair of a wire message back into a
/// `Result`. A missing result means JSON `null`.
pub fn into_outcome(result: Option<Value>, error: Option<RpcError>) -> Result<Value, RpcError> {
    match error {
        Some(err) => Err(err),
        None => Ok(result.unwrap_or(Value::Null)),
    }
}
