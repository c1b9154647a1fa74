//! Page provider: the request API page scripts use, backed by the document's
//! message channel and the relay listening on it.

use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::core::config::ProviderConfig;
use crate::protocol::{
    into_outcome, to_hex_quantity, ErrorCode, PageMessage, ProviderEvent, ProviderInfo, RequestId,
    RpcError,
};

pub mod discovery;
pub mod window;

pub use discovery::{discover_providers, luckyou_provider_info};
pub use window::{PageWindow, WindowId, WindowMessage};

/// What a page-side request can fail with.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("Request {id} timed out after {after:?}")]
    Timeout { id: RequestId, after: Duration },

    #[error("Provider disconnected")]
    Disconnected,
}

impl ProviderError {
    /// Wire error code, `None` for client-side failures.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ProviderError::Rpc(e) => Some(e.code),
            _ => None,
        }
    }
}

/// `request(args)` argument object.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestArguments {
    pub method: String,
    #[serde(default)]
    pub params: Option<Vec<Value>>,
}

impl RequestArguments {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self { method: method.into(), params: Some(params) }
    }
}

/// Provider-side view of the wallet, refreshed on READY and on events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderState {
    pub chain_id: Option<String>,
    pub network_version: Option<String>,
    pub selected_address: Option<String>,
}

type Responder = oneshot::Sender<Result<Value, RpcError>>;

pub struct PageProvider {
    window: PageWindow,
    info: ProviderInfo,
    timeout: Duration,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, Responder>>,
    state: RwLock<ProviderState>,
    events: broadcast::Sender<ProviderEvent>,
}

/// Drops the pending entry however the request future ends.
struct PendingGuard<'a> {
    provider: &'a PageProvider,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.provider.pending.lock().remove(&self.id);
    }
}

impl PageProvider {
    /// Injects a provider into `window`, or returns the one already there.
    /// Only the first injection attaches a listener and announces itself.
    pub fn inject(window: &PageWindow, config: &ProviderConfig) -> Arc<PageProvider> {
        let mut created = false;
        let provider = window
            .provider_slot()
            .get_or_init(|| {
                created = true;
                Arc::new(PageProvider::new(window.clone(), config.request_timeout()))
            })
            .clone();

        if created {
            let rx = window.subscribe();
            let listener = provider.clone();
            tokio::spawn(async move { listener.listen(rx).await });
            window.post(&PageMessage::ProviderInitialized);
            debug!(window = %window.id(), origin = window.origin(), "provider injected");
        } else {
            debug!(window = %window.id(), "provider already injected, skipping");
        }
        provider
    }

    fn new(window: PageWindow, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            window,
            info: luckyou_provider_info(),
            timeout,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            state: RwLock::new(ProviderState::default()),
            events,
        }
    }

    async fn listen(self: Arc<Self>, mut rx: broadcast::Receiver<window::WindowMessage>) {
        let unloaded = self.window.unloaded();
        loop {
            let received = tokio::select! {
                _ = unloaded.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(message) => self.on_message(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "provider listener lagged, messages lost");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        // dropping the responders fails every waiter with Disconnected
        let abandoned = std::mem::take(&mut *self.pending.lock());
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "provider detached with requests in flight");
        }
    }

    fn on_message(self: &Arc<Self>, message: WindowMessage) {
        if message.source != self.window.id() {
            debug!(source = %message.source, "ignoring message from another window");
            return;
        }
        let Ok(page) = serde_json::from_value::<PageMessage>(message.data) else {
            return;
        };
        match page {
            PageMessage::Response { id, result, error } => self.settle(id, into_outcome(result, error)),
            PageMessage::Event { event } => self.apply_event(event),
            PageMessage::Ready => {
                let this = self.clone();
                tokio::spawn(async move { this.refresh_state().await });
            }
            PageMessage::RequestProvider => {
                self.window.post(&PageMessage::AnnounceProvider { info: self.info.clone() });
            }
            PageMessage::Request { .. }
            | PageMessage::ProviderInitialized
            | PageMessage::AnnounceProvider { .. } => {}
        }
    }

    fn settle(&self, id: RequestId, outcome: Result<Value, RpcError>) {
        match self.pending.lock().remove(&id) {
            Some(responder) => {
                let _ = responder.send(outcome);
            }
            None => debug!(request_id = %id, "ignoring response for unknown or settled request"),
        }
    }

    fn apply_event(&self, event: ProviderEvent) {
        {
            let mut state = self.state.write();
            match &event {
                ProviderEvent::Connect { chain_id } | ProviderEvent::ChainChanged(chain_id) => {
                    state.chain_id = Some(chain_id.clone());
                }
                ProviderEvent::NetworkChanged(version) => {
                    state.network_version = Some(version.clone());
                }
                ProviderEvent::AccountsChanged(accounts) => {
                    state.selected_address = accounts.first().cloned();
                }
            }
        }
        let _ = self.events.send(event);
    }

    /// Re-reads chain id, network version and accounts after the relay
    /// signals it is ready.
    async fn refresh_state(&self) {
        let (chain_id, version, accounts) = futures::join!(
            self.chain_id(),
            self.network_version(),
            self.accounts(),
        );
        match (&chain_id, &version, &accounts) {
            (Ok(_), Ok(_), Ok(_)) => {}
            _ => warn!("provider state refresh incomplete"),
        }
        {
            let mut state = self.state.write();
            if let Ok(chain_id) = &chain_id {
                state.chain_id = Some(chain_id.clone());
            }
            if let Ok(version) = version {
                state.network_version = Some(version);
            }
            if let Ok(accounts) = accounts {
                state.selected_address = accounts.into_iter().next();
            }
        }
        if let Ok(chain_id) = chain_id {
            let _ = self.events.send(ProviderEvent::Connect { chain_id });
        }
    }

    /// Sends one request and waits for its response, at most the configured
    /// timeout. A response arriving after the timeout is ignored.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
        if method.trim().is_empty() {
            return Err(RpcError::invalid_params("method is required").into());
        }
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard { provider: self, id };

        debug!(request_id = %id, method, "provider request");
        self.window.post(&PageMessage::Request {
            id,
            method: method.to_string(),
            params: Some(params),
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome.map_err(ProviderError::Rpc),
            Ok(Err(_)) => Err(ProviderError::Disconnected),
            Err(_) => {
                warn!(request_id = %id, method, "provider request timed out");
                Err(ProviderError::Timeout { id, after: self.timeout })
            }
        }
    }

    pub async fn request_args(&self, args: RequestArguments) -> Result<Value, ProviderError> {
        self.request(&args.method, args.params.unwrap_or_default()).await
    }

    /// Issues every request concurrently; fails with the first error.
    pub async fn request_batch(
        &self,
        batch: Vec<RequestArguments>,
    ) -> Result<Vec<Value>, ProviderError> {
        try_join_all(batch.into_iter().map(|args| self.request_args(args))).await
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, ProviderError> {
        serde_json::from_value(value)
            .map_err(|e| RpcError::internal_error_with(format!("unexpected response: {e}")).into())
    }

    pub async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        let accounts: Vec<String> = Self::decode(self.request("eth_requestAccounts", vec![]).await?)?;
        self.state.write().selected_address = accounts.first().cloned();
        Ok(accounts)
    }

    /// Legacy alias of [`request_accounts`](Self::request_accounts).
    pub async fn enable(&self) -> Result<Vec<String>, ProviderError> {
        self.request_accounts().await
    }

    pub async fn accounts(&self) -> Result<Vec<String>, ProviderError> {
        Self::decode(self.request("eth_accounts", vec![]).await?)
    }

    pub async fn chain_id(&self) -> Result<String, ProviderError> {
        Self::decode(self.request("eth_chainId", vec![]).await?)
    }

    pub async fn network_version(&self) -> Result<String, ProviderError> {
        Self::decode(self.request("net_version", vec![]).await?)
    }

    pub async fn personal_sign(&self, message: &str, address: &str) -> Result<String, ProviderError> {
        Self::decode(self.request("personal_sign", vec![json!(message), json!(address)]).await?)
    }

    pub async fn sign_typed_data(
        &self,
        address: &str,
        typed_data: &Value,
    ) -> Result<String, ProviderError> {
        let params = vec![json!(address), json!(typed_data.to_string())];
        Self::decode(self.request("eth_signTypedData_v4", params).await?)
    }

    pub async fn send_transaction(&self, tx: Value) -> Result<String, ProviderError> {
        Self::decode(self.request("eth_sendTransaction", vec![tx]).await?)
    }

    pub async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError> {
        let hex = to_hex_quantity(chain_id);
        self.request("wallet_switchEthereumChain", vec![json!({ "chainId": hex })]).await?;
        self.state.write().chain_id = Some(hex);
        Ok(())
    }

    pub async fn add_chain(&self, params: Value) -> Result<(), ProviderError> {
        self.request("wallet_addEthereumChain", vec![params]).await?;
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ProviderState {
        self.state.read().clone()
    }

    pub fn info(&self) -> &ProviderInfo {
        &self.info
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }
}

impl std::fmt::Debug for PageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageProvider")
            .field("window", &self.window.id())
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}
