//! Background coordinator: classifies every provider request, answers what
//! it can at once and routes the rest through the confirmation UI.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blockchain::network::NetworkRegistry;
use crate::blockchain::traits::ChainRpc;
use crate::core::config::CoordinatorConfig;
use crate::protocol::{
    into_outcome, Method, ProviderEvent, Request, RequestKey, RpcError, RuntimeMessage,
};
use crate::storage::{AuthorizedSites, StoreHandle};
use crate::wallet::WalletCore;

pub mod confirmations;
mod dispatch;
pub mod pending;
pub mod router;

pub use confirmations::{Confirmation, ConfirmationBook, PendingAuthorization, PendingSignature};
pub use pending::{PendingTable, Stage, Subtask};
pub use router::{ExtensionHost, ResponseRouter};

use confirmations::Completion;
use dispatch::Dispatch;

/// External collaborators of the coordinator.
pub struct CoordinatorDeps {
    pub store: StoreHandle,
    pub networks: NetworkRegistry,
    pub wallet: Arc<dyn WalletCore>,
    pub chain: Arc<dyn ChainRpc>,
    pub host: Arc<dyn ExtensionHost>,
}

pub(crate) struct CoordinatorInner {
    config: CoordinatorConfig,
    sites: AuthorizedSites,
    networks: NetworkRegistry,
    wallet: Arc<dyn WalletCore>,
    chain: Arc<dyn ChainRpc>,
    router: ResponseRouter,
    // never held across an await
    pending: Mutex<PendingTable>,
    book: tokio::sync::Mutex<ConfirmationBook>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct BackgroundCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl BackgroundCoordinator {
    pub fn new(config: CoordinatorConfig, deps: CoordinatorDeps) -> Self {
        let book = ConfirmationBook::new(deps.store.clone(), config.max_queued_confirmations);
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                sites: AuthorizedSites::new(deps.store),
                networks: deps.networks,
                wallet: deps.wallet,
                chain: deps.chain,
                router: ResponseRouter::new(deps.host),
                pending: Mutex::new(PendingTable::new()),
                book: tokio::sync::Mutex::new(book),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Starts the message loop and the expiry sweep. Each message is handled
    /// on its own task so a slow chain call never holds up the others.
    pub fn spawn(&self, mut inbox: mpsc::UnboundedReceiver<RuntimeMessage>) -> JoinHandle<()> {
        let token = self.inner.shutdown.clone();

        let sweeper = self.clone();
        let sweep_token = token.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweeper.inner.config.sweep_interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = sweep_token.cancelled() => break,
                    _ = interval.tick() => {
                        sweeper.sweep_expired().await;
                    }
                }
            }
        });

        let this = self.clone();
        tokio::spawn(async move {
            info!("background coordinator started");
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => break,
                    message = inbox.recv() => message,
                };
                let Some(message) = message else { break };
                let worker = this.clone();
                tokio::spawn(async move { worker.handle(message).await });
            }
            info!("background coordinator stopped");
        })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub async fn handle(&self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::ProviderRequest { data } => self.inner.on_request(data).await,
            RuntimeMessage::PopupResponse { request_id, result, error } => {
                self.inner.on_popup_response(request_id, into_outcome(result, error)).await
            }
        }
    }

    /// Drops requests older than the pending TTL without answering them.
    /// Returns how many were dropped.
    pub async fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired().await
    }

    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn pending_stage(&self, key: &RequestKey) -> Option<Stage> {
        self.inner.pending.lock().stage(key)
    }

    /// Key of the confirmation currently presented.
    pub async fn active_confirmation(&self) -> Option<RequestKey> {
        self.inner.book.lock().await.active().map(Confirmation::key)
    }

    pub async fn queued_confirmations(&self) -> usize {
        self.inner.book.lock().await.queued()
    }
}

impl CoordinatorInner {
    fn advance(&self, key: &RequestKey, stage: Stage) -> bool {
        self.pending.lock().advance(key, stage)
    }

    async fn on_request(&self, request: Request) {
        let key = request.key();
        if !self.pending.lock().insert(request.clone(), Instant::now()) {
            warn!(key = %key, method = %request.method, "duplicate request ignored");
            return;
        }
        let class = Method::parse(&request.method).class();
        self.advance(&key, Stage::Classified(class));
        debug!(key = %key, method = %request.method, origin = %request.origin.origin, ?class, "request received");

        match self.dispatch(&request, class).await {
            Dispatch::Respond(outcome) => {
                self.respond(key, outcome).await;
            }
            Dispatch::Deferred => {}
        }
    }

    /// Sends the one response for `key`. Returns false when the request was
    /// already answered or swept.
    async fn respond(&self, key: RequestKey, outcome: Result<Value, RpcError>) -> bool {
        let entry = self.pending.lock().take(&key);
        match entry {
            Some(entry) => {
                if let Err(e) = &outcome {
                    debug!(key = %key, method = %entry.request.method, code = e.code.code(), "responding with error");
                }
                self.router.deliver(key, outcome).await;
                true
            }
            None => {
                warn!(key = %key, "no pending request, response dropped");
                false
            }
        }
    }

    async fn on_popup_response(&self, key: RequestKey, outcome: Result<Value, RpcError>) {
        if self.pending.lock().stage(&key) != Some(Stage::Awaiting(Subtask::Confirmation)) {
            warn!(key = %key, "confirmation result for a request not awaiting one");
            return;
        }
        let completion = match self.book.lock().await.complete(&key).await {
            Ok(completion) => completion,
            Err(e) => {
                error!(key = %key, error = %e, "failed to clear confirmation");
                Completion::default()
            }
        };

        let accounts = match (&completion.finished, &outcome) {
            (Some(Confirmation::Authorization(_)), Ok(value)) => {
                serde_json::from_value::<Vec<String>>(value.clone()).ok()
            }
            _ => None,
        };
        if self.respond(key, outcome).await {
            if let (Some(accounts), Some(tab)) = (accounts, key.tab_id) {
                self.router.event_to_tab(tab, ProviderEvent::AccountsChanged(accounts)).await;
            }
        }
        self.present(completion.promoted).await;
    }

    /// Activates the UI for a freshly promoted confirmation. An authorization
    /// whose origin was approved while it waited is answered directly.
    async fn present(&self, promoted: Option<Confirmation>) {
        let mut next = promoted;
        while let Some(confirmation) = next.take() {
            let Some(outcome) = self.resolve_without_prompt(&confirmation).await else {
                info!(key = %confirmation.key(), "next confirmation pending, activating UI");
                self.router.open_confirmation().await;
                return;
            };
            let key = confirmation.key();
            self.respond(key, Ok(outcome)).await;
            next = match self.book.lock().await.complete(&key).await {
                Ok(completion) => completion.promoted,
                Err(e) => {
                    error!(key = %key, error = %e, "failed to advance confirmation queue");
                    None
                }
            };
        }
    }

    async fn resolve_without_prompt(&self, confirmation: &Confirmation) -> Option<Value> {
        let Confirmation::Authorization(auth) = confirmation else {
            return None;
        };
        let authorized = self.sites.is_authorized(&auth.origin).await.ok()?;
        let address = self.wallet.primary_address().await.ok()??;
        if authorized {
            debug!(origin = %auth.origin, "queued authorization already granted");
            Some(serde_json::json!([address]))
        } else {
            None
        }
    }

    async fn sweep_expired(&self) -> usize {
        let expired = self.pending.lock().sweep(Instant::now(), self.config.pending_ttl());
        if expired.is_empty() {
            return 0;
        }
        for entry in &expired {
            warn!(key = %entry.request.key(), method = %entry.request.method, stage = ?entry.stage, "pending request expired");
        }

        let promoted = {
            let mut book = self.book.lock().await;
            let before = book.active().map(Confirmation::key);
            for entry in &expired {
                if let Err(e) = book.complete(&entry.request.key()).await {
                    error!(key = %entry.request.key(), error = %e, "failed to clear expired confirmation");
                }
            }
            match book.active() {
                Some(active) if Some(active.key()) != before => Some(active.clone()),
                _ => None,
            }
        };
        self.present(promoted).await;
        expired.len()
    }
}
