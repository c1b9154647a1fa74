//! Relay: forwards between a document's message channel and the background
//! coordinator. Holds no request state; it only stamps identity on the way
//! out and filters by document on the way back.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::config::ProviderConfig;
use crate::protocol::{
    DocumentId, PageMessage, Request, RequestOrigin, RpcError, RuntimeMessage, TabId, TabMessage,
};
use crate::provider::{PageProvider, PageWindow, WindowMessage};

struct Relay {
    window: PageWindow,
    tab_id: Option<TabId>,
    document_id: DocumentId,
    runtime: mpsc::UnboundedSender<RuntimeMessage>,
}

/// A running relay bound to one document.
#[derive(Debug)]
pub struct RelayHandle {
    window: PageWindow,
    document_id: DocumentId,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Attaches a relay to `window`. `inbox` receives what the background
    /// addresses to this tab.
    pub fn attach(
        window: &PageWindow,
        tab_id: Option<TabId>,
        runtime: mpsc::UnboundedSender<RuntimeMessage>,
        inbox: mpsc::UnboundedReceiver<TabMessage>,
    ) -> Self {
        let relay = Relay { window: window.clone(), tab_id, document_id: DocumentId::new(), runtime };
        let document_id = relay.document_id;
        // subscribe before anything can be posted so no request is missed
        let page_rx = window.subscribe();
        let task = tokio::spawn(relay.run(page_rx, inbox));
        debug!(tab = ?tab_id, document = %document_id, origin = window.origin(), "relay attached");
        Self { window: window.clone(), document_id, task }
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Injects the page provider (a no-op if one exists) and signals READY.
    pub fn inject_provider(&self, config: &ProviderConfig) -> Arc<PageProvider> {
        let provider = PageProvider::inject(&self.window, config);
        self.window.post(&PageMessage::Ready);
        provider
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Relay {
    async fn run(
        self,
        mut page_rx: broadcast::Receiver<WindowMessage>,
        mut inbox: mpsc::UnboundedReceiver<TabMessage>,
    ) {
        let unloaded = self.window.unloaded();
        loop {
            tokio::select! {
                _ = unloaded.cancelled() => break,
                received = page_rx.recv() => match received {
                    Ok(message) => self.from_page(message),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, document = %self.document_id, "relay lagged behind page");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                delivered = inbox.recv() => match delivered {
                    Some(message) => self.from_background(message),
                    None => {
                        debug!(document = %self.document_id, "background channel closed");
                        break;
                    }
                },
            }
        }
        debug!(document = %self.document_id, "relay detached");
    }

    fn from_page(&self, message: WindowMessage) {
        if message.source != self.window.id() {
            return;
        }
        let Ok(PageMessage::Request { id, method, params }) =
            serde_json::from_value::<PageMessage>(message.data)
        else {
            return;
        };

        let request = Request {
            id,
            method,
            params: params.unwrap_or_default(),
            origin: RequestOrigin {
                tab_id: self.tab_id,
                document_id: self.document_id,
                origin: self.window.origin().to_string(),
            },
            created_at: Utc::now(),
        };
        debug!(request_id = %id, method = %request.method, tab = ?self.tab_id, "forwarding request");
        if self.runtime.send(RuntimeMessage::ProviderRequest { data: request }).is_err() {
            warn!(request_id = %id, "background unavailable, failing request");
            self.window.post(&PageMessage::response(
                id,
                Err(RpcError::internal_error_with("Extension context invalidated")),
            ));
        }
    }

    fn from_background(&self, message: TabMessage) {
        match message {
            TabMessage::Response { key, result, error } => {
                if key.document_id != self.document_id {
                    warn!(key = %key, document = %self.document_id, "dropping response for another document");
                    return;
                }
                self.window.post(&PageMessage::Response { id: key.id, result, error });
            }
            TabMessage::Event { event } => self.window.post(&PageMessage::Event { event }),
        }
    }
}
