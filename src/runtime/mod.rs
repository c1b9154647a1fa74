//! Wires the four execution contexts together in one process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::background::{BackgroundCoordinator, CoordinatorDeps};
use crate::blockchain::network::NetworkRegistry;
use crate::blockchain::traits::ChainRpc;
use crate::core::config::{BridgeConfig, ProviderConfig};
use crate::protocol::{DocumentId, RuntimeMessage, TabId};
use crate::provider::{PageProvider, PageWindow};
use crate::relay::RelayHandle;
use crate::storage::StoreHandle;
use crate::ui::{ConfirmationUi, UiDeps};
use crate::wallet::WalletCore;

pub mod local;
pub mod stdio;

pub use local::LocalHost;
pub use stdio::{HostInbound, HostOutbound, StdioHost};

/// A running extension: coordinator, host and the shared store.
pub struct Extension {
    config: BridgeConfig,
    store: StoreHandle,
    networks: NetworkRegistry,
    wallet: Arc<dyn WalletCore>,
    host: Arc<LocalHost>,
    coordinator: BackgroundCoordinator,
    runtime: mpsc::UnboundedSender<RuntimeMessage>,
    task: JoinHandle<()>,
    next_tab: AtomicU64,
}

impl Extension {
    pub fn start(
        config: BridgeConfig,
        store: StoreHandle,
        wallet: Arc<dyn WalletCore>,
        chain: Arc<dyn ChainRpc>,
    ) -> Self {
        let networks = NetworkRegistry::new(store.clone(), config.networks.clone());
        let host = Arc::new(LocalHost::new());
        let coordinator = BackgroundCoordinator::new(
            config.coordinator.clone(),
            CoordinatorDeps {
                store: store.clone(),
                networks: networks.clone(),
                wallet: wallet.clone(),
                chain,
                host: host.clone(),
            },
        );
        let (runtime, inbox) = mpsc::unbounded_channel();
        let task = coordinator.spawn(inbox);
        info!(
            networks = config.networks.len(),
            in_memory = store.raw().is_in_memory(),
            "extension started"
        );
        Self {
            config,
            store,
            networks,
            wallet,
            host,
            coordinator,
            runtime,
            task,
            next_tab: AtomicU64::new(1),
        }
    }

    /// Opens a new tab on a document from `origin`.
    pub fn open_tab(&self, origin: &str) -> Tab {
        let id = TabId(self.next_tab.fetch_add(1, Ordering::Relaxed));
        Tab::load(
            id,
            origin,
            self.host.clone(),
            self.runtime.clone(),
            self.config.provider.clone(),
        )
    }

    /// A freshly opened confirmation UI; nothing carries over from earlier
    /// ones.
    pub fn confirmation_ui(&self) -> ConfirmationUi {
        ConfirmationUi::new(
            &self.config.confirmation,
            &self.config.session,
            UiDeps {
                store: self.store.clone(),
                networks: self.networks.clone(),
                wallet: self.wallet.clone(),
                runtime: self.runtime.clone(),
            },
        )
    }

    pub fn host(&self) -> &Arc<LocalHost> {
        &self.host
    }

    pub fn coordinator(&self) -> &BackgroundCoordinator {
        &self.coordinator
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.networks
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn runtime(&self) -> mpsc::UnboundedSender<RuntimeMessage> {
        self.runtime.clone()
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
        self.task.abort();
    }
}

/// A browser tab: the current document's window, its relay and the
/// injected provider.
pub struct Tab {
    id: TabId,
    window: PageWindow,
    relay: RelayHandle,
    provider: Arc<PageProvider>,
    host: Arc<LocalHost>,
    runtime: mpsc::UnboundedSender<RuntimeMessage>,
    provider_config: ProviderConfig,
}

impl Tab {
    fn load(
        id: TabId,
        origin: &str,
        host: Arc<LocalHost>,
        runtime: mpsc::UnboundedSender<RuntimeMessage>,
        provider_config: ProviderConfig,
    ) -> Self {
        let (window, relay, provider) = attach_document(id, origin, &host, &runtime, &provider_config);
        Self { id, window, relay, provider, host, runtime, provider_config }
    }

    pub fn id(&self) -> TabId {
        self.id
    }

    pub fn window(&self) -> &PageWindow {
        &self.window
    }

    pub fn provider(&self) -> &Arc<PageProvider> {
        &self.provider
    }

    pub fn document_id(&self) -> DocumentId {
        self.relay.document_id()
    }

    /// Runs the relay's load hook again on the current document; the
    /// provider already present is kept.
    pub fn reinject(&self) -> Arc<PageProvider> {
        self.relay.inject_provider(&self.provider_config)
    }

    /// Replaces the document. Requests in flight from the old one fail as
    /// disconnected and their late responses are dropped by document id.
    pub fn navigate(&mut self, origin: &str) {
        self.window.unload();
        let (window, relay, provider) =
            attach_document(self.id, origin, &self.host, &self.runtime, &self.provider_config);
        self.window = window;
        self.relay = relay;
        self.provider = provider;
    }

    /// Reloads the same origin in a fresh document.
    pub fn reload(&mut self) {
        let origin = self.window.origin().to_string();
        self.navigate(&origin);
    }

    pub fn is_relay_running(&self) -> bool {
        !self.relay.is_finished()
    }
}

/// Loads a document into tab `id`: new window, relay attached to the tab's
/// inbox, provider injected.
fn attach_document(
    id: TabId,
    origin: &str,
    host: &LocalHost,
    runtime: &mpsc::UnboundedSender<RuntimeMessage>,
    provider_config: &ProviderConfig,
) -> (PageWindow, RelayHandle, Arc<PageProvider>) {
    let window = PageWindow::new(origin);
    let inbox = host.connect_tab(id);
    let relay = RelayHandle::attach(&window, Some(id), runtime.clone(), inbox);
    let provider = relay.inject_provider(provider_config);
    (window, relay, provider)
}

impl Drop for Tab {
    fn drop(&mut self) {
        self.window.unload();
        self.host.disconnect_tab(self.id);
    }
}
