use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Notify};

use crate::background::ExtensionHost;
use crate::core::errors::BridgeError;
use crate::protocol::{TabId, TabMessage};

/// In-process browser: one channel per tab relay and a counter of UI
/// activations.
#[derive(Debug, Default)]
pub struct LocalHost {
    tabs: RwLock<BTreeMap<TabId, mpsc::UnboundedSender<TabMessage>>>,
    activations: AtomicUsize,
    activated: Notify,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the relay for `tab`, replacing the one of a previous
    /// document in the same tab.
    pub fn connect_tab(&self, tab: TabId) -> mpsc::UnboundedReceiver<TabMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.tabs.write().insert(tab, tx);
        rx
    }

    pub fn disconnect_tab(&self, tab: TabId) {
        self.tabs.write().remove(&tab);
    }

    /// How many times the confirmation UI was asked to open.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// Waits for the next UI activation; an activation with nobody waiting
    /// is remembered.
    pub async fn wait_for_confirmation(&self) {
        self.activated.notified().await;
    }
}

#[async_trait]
impl ExtensionHost for LocalHost {
    async fn send_to_tab(&self, tab: TabId, message: TabMessage) -> Result<(), BridgeError> {
        let tabs = self.tabs.read();
        let relay = tabs.get(&tab).ok_or(BridgeError::ChannelClosed("tab"))?;
        relay.send(message).map_err(|_| BridgeError::ChannelClosed("tab"))
    }

    async fn tabs(&self) -> Vec<TabId> {
        self.tabs.read().keys().copied().collect()
    }

    async fn open_confirmation(&self) -> Result<(), BridgeError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.activated.notify_one();
        Ok(())
    }
}
