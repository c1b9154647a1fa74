//! Confirmation UI: the ephemeral surface where the user approves or rejects
//! what the background coordinator parked in the durable store.
//!
//! Nothing survives in memory between openings. Every open starts from the
//! store, stale records are dropped unseen, and each presented confirmation
//! gets exactly one `POPUP_RESPONSE`.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::background::confirmations::clear_slot_if;
use crate::background::{Confirmation, PendingAuthorization, PendingSignature};
use crate::blockchain::network::NetworkRegistry;
use crate::core::config::{ConfirmationConfig, SessionConfig};
use crate::core::errors::BridgeError;
use crate::protocol::{Method, MethodClass, RpcError, RuntimeMessage};
use crate::storage::{keys, AuthorizedSites, StoreHandle};
use crate::wallet::{SigningPayload, WalletCore, WalletSession, WalletSessions};

pub mod prompt;

pub use prompt::Prompt;

#[derive(Debug, Clone, PartialEq)]
pub enum UiState {
    Closed,
    Rehydrating,
    /// A confirmation is waiting but the wallet must be unlocked first.
    Unlocking(Confirmation),
    Presenting(Confirmation),
    /// Nothing to confirm.
    Home,
}

pub struct UiDeps {
    pub store: StoreHandle,
    pub networks: NetworkRegistry,
    pub wallet: Arc<dyn WalletCore>,
    pub runtime: mpsc::UnboundedSender<RuntimeMessage>,
}

pub struct ConfirmationUi {
    store: StoreHandle,
    sessions: WalletSessions,
    sites: AuthorizedSites,
    networks: NetworkRegistry,
    wallet: Arc<dyn WalletCore>,
    runtime: mpsc::UnboundedSender<RuntimeMessage>,
    ttl: chrono::Duration,
    state: UiState,
}

impl ConfirmationUi {
    pub fn new(confirmation: &ConfirmationConfig, session: &SessionConfig, deps: UiDeps) -> Self {
        Self {
            sessions: WalletSessions::new(deps.store.clone(), session.ttl()),
            sites: AuthorizedSites::new(deps.store.clone()),
            store: deps.store,
            networks: deps.networks,
            wallet: deps.wallet,
            runtime: deps.runtime,
            ttl: confirmation.ttl(),
            state: UiState::Closed,
        }
    }

    pub fn state(&self) -> &UiState {
        &self.state
    }

    /// The confirmation on screen or waiting behind the unlock step.
    pub fn pending(&self) -> Option<&Confirmation> {
        match &self.state {
            UiState::Presenting(c) | UiState::Unlocking(c) => Some(c),
            _ => None,
        }
    }

    /// What the user is asked, once presentable.
    pub fn prompt(&self) -> Option<Result<Prompt, BridgeError>> {
        match &self.state {
            UiState::Presenting(c) => Some(Prompt::describe(c)),
            _ => None,
        }
    }

    pub async fn open(&mut self) -> Result<&UiState, BridgeError> {
        self.state = UiState::Rehydrating;
        let next = match self.rehydrate().await {
            Ok(Some(confirmation)) => match self.sessions.current().await {
                Ok(Some(_)) => Ok(UiState::Presenting(confirmation)),
                Ok(None) => Ok(UiState::Unlocking(confirmation)),
                Err(e) => Err(e),
            },
            Ok(None) => Ok(UiState::Home),
            Err(e) => Err(e),
        };
        match next {
            Ok(state) => self.state = state,
            Err(e) => {
                self.state = UiState::Home;
                return Err(e);
            }
        }
        debug!(
            state = self.state_name(),
            key = ?self.pending().map(Confirmation::key),
            "confirmation UI opened"
        );
        Ok(&self.state)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            UiState::Closed => "closed",
            UiState::Rehydrating => "rehydrating",
            UiState::Unlocking(_) => "unlocking",
            UiState::Presenting(_) => "presenting",
            UiState::Home => "home",
        }
    }

    /// Reads both slots, discarding records past their age bound.
    async fn rehydrate(&self) -> Result<Option<Confirmation>, BridgeError> {
        let now = Utc::now();
        let auth = self
            .store
            .load_or_discard::<PendingAuthorization>(keys::PENDING_AUTH)
            .await?
            .map(Confirmation::Authorization);
        let signature = self
            .store
            .load_or_discard::<PendingSignature>(keys::PENDING_SIGNATURE)
            .await?
            .map(Confirmation::Signature);

        let mut live = None;
        for confirmation in [auth, signature].into_iter().flatten() {
            if confirmation.is_stale(self.ttl, now) {
                warn!(key = %confirmation.key(), slot = confirmation.slot(), "discarding stale confirmation");
                clear_slot_if(&self.store, confirmation.slot(), &confirmation.key()).await?;
                continue;
            }
            if live.is_none() {
                live = Some(confirmation);
            }
        }
        Ok(live)
    }

    /// Unlocks the wallet, then looks for a pending confirmation again
    /// before presenting anything.
    pub async fn unlock(&mut self, password: &str) -> Result<&UiState, BridgeError> {
        let session = self.wallet.unlock(password).await?;
        self.sessions.save(&session).await?;
        info!(address = %session.address, "wallet unlocked");
        self.state = match self.rehydrate().await? {
            Some(confirmation) => UiState::Presenting(confirmation),
            None => UiState::Home,
        };
        Ok(&self.state)
    }

    pub async fn approve(&mut self) -> Result<(), BridgeError> {
        let confirmation = match std::mem::replace(&mut self.state, UiState::Home) {
            UiState::Presenting(c) => c,
            other => {
                self.state = other;
                return Err(BridgeError::InvalidInput("nothing to approve".into()));
            }
        };
        let session = match self.sessions.current().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!(key = %confirmation.key(), "session expired before approval");
                self.state = UiState::Unlocking(confirmation);
                return Err(BridgeError::Locked);
            }
            Err(e) => {
                self.state = UiState::Presenting(confirmation);
                return Err(e);
            }
        };
        let outcome = self.execute(&confirmation, &session).await;
        self.finish(confirmation, outcome).await
    }

    pub async fn reject(&mut self) -> Result<(), BridgeError> {
        let confirmation = match std::mem::replace(&mut self.state, UiState::Home) {
            UiState::Presenting(c) | UiState::Unlocking(c) => c,
            other => {
                self.state = other;
                return Err(BridgeError::InvalidInput("nothing to reject".into()));
            }
        };
        info!(key = %confirmation.key(), origin = confirmation.origin(), "user rejected request");
        self.finish(confirmation, Err(RpcError::user_rejected())).await
    }

    /// Closing leaves the pending record in place for the next open.
    pub fn close(&mut self) {
        self.state = UiState::Closed;
    }

    async fn execute(
        &self,
        confirmation: &Confirmation,
        session: &WalletSession,
    ) -> Result<Value, RpcError> {
        match confirmation {
            Confirmation::Authorization(auth) => {
                self.sites.authorize(&auth.origin).await?;
                Ok(json!([session.address]))
            }
            Confirmation::Signature(pending) => {
                let request = &pending.request;
                let MethodClass::Signing(kind) = Method::parse(&request.method).class() else {
                    return Err(RpcError::internal_error_with("not a signing request"));
                };
                let signed = match SigningPayload::from_params(kind, &request.params)? {
                    SigningPayload::Message(message) => {
                        self.wallet.personal_sign(session, &message).await
                    }
                    SigningPayload::TypedData(doc) => self.wallet.sign_typed_data(session, &doc).await,
                    SigningPayload::Transaction(tx) => {
                        let network = self.networks.current_network().await?;
                        self.wallet.send_transaction(session, &network, &tx).await
                    }
                }?;
                Ok(json!(signed))
            }
        }
    }

    /// Clears the slot and reports the outcome. The one place a response
    /// leaves the UI.
    async fn finish(
        &mut self,
        confirmation: Confirmation,
        outcome: Result<Value, RpcError>,
    ) -> Result<(), BridgeError> {
        let key = confirmation.key();
        if let Err(e) = clear_slot_if(&self.store, confirmation.slot(), &key).await {
            warn!(key = %key, error = %e, "failed to clear confirmation slot");
        }
        self.state = UiState::Home;
        debug!(key = %key, ok = outcome.is_ok(), "reporting confirmation result");
        self.runtime
            .send(RuntimeMessage::popup_response(key, outcome))
            .map_err(|_| BridgeError::ChannelClosed("background"))
    }
}
