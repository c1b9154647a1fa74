use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::errors::BridgeError;
use crate::protocol::{ProviderEvent, RequestKey, RpcError, TabId, TabMessage};

/// What the background context can ask of the browser.
#[async_trait]
pub trait ExtensionHost: Send + Sync {
    /// Delivers to the relay of one tab.
    async fn send_to_tab(&self, tab: TabId, message: TabMessage) -> Result<(), BridgeError>;

    /// Tabs with a live relay.
    async fn tabs(&self) -> Vec<TabId>;

    /// Opens (or focuses) the confirmation UI.
    async fn open_confirmation(&self) -> Result<(), BridgeError>;
}

/// Addresses responses and events to tabs.
#[derive(Clone)]
pub struct ResponseRouter {
    host: Arc<dyn ExtensionHost>,
}

impl ResponseRouter {
    pub fn new(host: Arc<dyn ExtensionHost>) -> Self {
        Self { host }
    }

    /// Sends the response to the tab that asked; only a request without a
    /// known tab falls back to every tab, where relays filter by document.
    pub async fn deliver(&self, key: RequestKey, outcome: Result<Value, RpcError>) {
        let message = TabMessage::response(key, outcome);
        match key.tab_id {
            Some(tab) => {
                if let Err(e) = self.host.send_to_tab(tab, message).await {
                    warn!(key = %key, error = %e, "response undeliverable");
                }
            }
            None => {
                debug!(key = %key, "origin tab unknown, broadcasting response");
                self.broadcast(message).await;
            }
        }
    }

    pub async fn event_to_tab(&self, tab: TabId, event: ProviderEvent) {
        if let Err(e) = self.host.send_to_tab(tab, TabMessage::Event { event }).await {
            warn!(tab = %tab, error = %e, "event undeliverable");
        }
    }

    pub async fn broadcast_event(&self, event: ProviderEvent) {
        self.broadcast(TabMessage::Event { event }).await;
    }

    async fn broadcast(&self, message: TabMessage) {
        for tab in self.host.tabs().await {
            if let Err(e) = self.host.send_to_tab(tab, message.clone()).await {
                debug!(tab = %tab, error = %e, "broadcast skipped tab");
            }
        }
    }

    pub async fn open_confirmation(&self) {
        if let Err(e) = self.host.open_confirmation().await {
            warn!(error = %e, "could not open confirmation UI");
        }
    }
}
