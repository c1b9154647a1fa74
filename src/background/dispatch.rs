//! Per-class request handlers.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::confirmations::{Admission, Confirmation};
use super::pending::{Stage, Subtask};
use super::CoordinatorInner;
use crate::blockchain::network::{AddChainParams, SwitchChainParams};
use crate::core::errors::BridgeError;
use crate::protocol::{
    parse_hex_quantity, to_hex_quantity, DisclosureKind, InfoKind, MethodClass, MutationKind,
    ProviderEvent, Request, RpcError, SignKind,
};
use crate::wallet::SigningPayload;

/// What dispatch decided for a request.
pub(super) enum Dispatch {
    /// Answer now.
    Respond(Result<Value, RpcError>),
    /// A confirmation will answer later.
    Deferred,
}

impl From<Result<Value, BridgeError>> for Dispatch {
    fn from(outcome: Result<Value, BridgeError>) -> Self {
        Dispatch::Respond(outcome.map_err(RpcError::from))
    }
}

fn first_param<T: DeserializeOwned>(request: &Request) -> Result<T, BridgeError> {
    let raw = request
        .param(0)
        .ok_or_else(|| BridgeError::InvalidInput(format!("{} expects one parameter", request.method)))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| BridgeError::InvalidInput(format!("invalid {} parameter: {e}", request.method)))
}

impl CoordinatorInner {
    pub(super) async fn dispatch(&self, request: &Request, class: MethodClass) -> Dispatch {
        match class {
            MethodClass::CachedInfo(kind) => self.cached_info(kind).await.into(),
            MethodClass::DirectRpc => Dispatch::Respond(self.direct_rpc(request).await),
            MethodClass::Disclosure(DisclosureKind::Silent) => {
                self.silent_accounts(&request.origin.origin).await.into()
            }
            MethodClass::Disclosure(DisclosureKind::Request) => {
                let outcome = self.request_accounts(request).await;
                outcome.unwrap_or_else(|e| Dispatch::from(Err::<Value, _>(e)))
            }
            MethodClass::Signing(kind) => {
                let outcome = self.request_signature(request, kind).await;
                outcome.unwrap_or_else(|e| Dispatch::from(Err::<Value, _>(e)))
            }
            MethodClass::NetworkMutation(MutationKind::SwitchChain) => {
                self.switch_chain(request).await.into()
            }
            MethodClass::NetworkMutation(MutationKind::AddChain) => self.add_chain(request).await.into(),
        }
    }

    async fn cached_info(&self, kind: InfoKind) -> Result<Value, BridgeError> {
        let network = self.networks.current_network().await?;
        Ok(match kind {
            InfoKind::ChainId => json!(to_hex_quantity(network.chain_id)),
            InfoKind::NetVersion => json!(network.chain_id.to_string()),
        })
    }

    async fn direct_rpc(&self, request: &Request) -> Result<Value, RpcError> {
        let network = self.networks.current_network().await?;
        self.advance(&request.key(), Stage::Awaiting(Subtask::ChainRpc));
        self.chain.call(&network, &request.method, &request.params).await
    }

    /// `eth_accounts`: never prompts.
    async fn silent_accounts(&self, origin: &str) -> Result<Value, BridgeError> {
        let Some(address) = self.wallet.primary_address().await? else {
            return Ok(json!([]));
        };
        if self.sites.is_authorized(origin).await? {
            Ok(json!([address]))
        } else {
            Ok(json!([]))
        }
    }

    async fn request_accounts(&self, request: &Request) -> Result<Dispatch, BridgeError> {
        let address = self.wallet.primary_address().await?.ok_or(BridgeError::NoWallet)?;
        if self.sites.is_authorized(&request.origin.origin).await? {
            debug!(origin = %request.origin.origin, "origin already authorized");
            return Ok(Dispatch::Respond(Ok(json!([address]))));
        }
        self.enqueue(Confirmation::authorization(request)).await
    }

    async fn request_signature(&self, request: &Request, kind: SignKind) -> Result<Dispatch, BridgeError> {
        if self.wallet.primary_address().await?.is_none() {
            return Err(BridgeError::NoWallet);
        }
        SigningPayload::from_params(kind, &request.params)?;
        self.enqueue(Confirmation::signature(request)).await
    }

    async fn enqueue(&self, confirmation: Confirmation) -> Result<Dispatch, BridgeError> {
        let key = confirmation.key();
        let admission = {
            let mut book = self.book.lock().await;
            if !self.advance(&key, Stage::Awaiting(Subtask::Confirmation)) {
                // swept while being classified
                return Ok(Dispatch::Deferred);
            }
            book.admit(confirmation).await?
        };
        match admission {
            Admission::Presented => {
                info!(key = %key, "confirmation pending, activating UI");
                self.router.open_confirmation().await;
                Ok(Dispatch::Deferred)
            }
            Admission::Queued { position } => {
                debug!(key = %key, position, "confirmation queued");
                Ok(Dispatch::Deferred)
            }
            Admission::Full => {
                warn!(key = %key, "confirmation backlog full, refusing request");
                Ok(Dispatch::Respond(Err(RpcError::resource_unavailable(
                    "Too many confirmations pending, try again later",
                ))))
            }
        }
    }

    async fn switch_chain(&self, request: &Request) -> Result<Value, BridgeError> {
        let params: SwitchChainParams = first_param(request)?;
        let chain_id = parse_hex_quantity(&params.chain_id)?;
        if self.networks.current_network().await?.chain_id == chain_id {
            return Ok(Value::Null);
        }
        match self.networks.select_chain(chain_id).await? {
            Some(network) => {
                info!(chain_id, network = %network.key, "switched network");
                self.router.broadcast_event(ProviderEvent::ChainChanged(to_hex_quantity(chain_id))).await;
                self.router.broadcast_event(ProviderEvent::NetworkChanged(chain_id.to_string())).await;
                Ok(Value::Null)
            }
            None => {
                debug!(chain_id, "switch to unknown chain refused");
                Err(RpcError::unrecognized_chain(chain_id).into())
            }
        }
    }

    async fn add_chain(&self, request: &Request) -> Result<Value, BridgeError> {
        let params: AddChainParams = first_param(request)?;
        let network = params.into_network()?;
        if self.networks.find_by_chain_id(network.chain_id).await?.is_some() {
            debug!(chain_id = network.chain_id, "chain already registered");
            return Ok(Value::Null);
        }
        self.advance(&request.key(), Stage::Awaiting(Subtask::NetworkProbe));
        self.networks.validate_network(self.chain.as_ref(), &network.rpc_url, network.chain_id).await?;
        let added = self.networks.add_custom(network).await?;
        info!(chain_id = added.chain_id, name = %added.name, origin = %request.origin.origin, "custom network added");
        Ok(Value::Null)
    }
}
