//! Newline-delimited JSON host: lets a browser-side shim drive the
//! coordinator over stdin/stdout.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::background::ExtensionHost;
use crate::core::errors::BridgeError;
use crate::protocol::{RuntimeMessage, TabId, TabMessage};

/// One inbound line. `tab_id` is the sender tab as the browser reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInbound {
    #[serde(default)]
    pub tab_id: Option<TabId>,
    pub message: RuntimeMessage,
}

/// One outbound line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostOutbound {
    Tab {
        #[serde(rename = "tabId")]
        tab_id: TabId,
        message: TabMessage,
    },
    OpenConfirmation,
}

pub struct StdioHost<W> {
    out: tokio::sync::Mutex<W>,
    tabs: Mutex<BTreeSet<TabId>>,
}

impl<W: AsyncWrite + Unpin + Send> StdioHost<W> {
    pub fn new(out: W) -> Self {
        Self { out: tokio::sync::Mutex::new(out), tabs: Mutex::new(BTreeSet::new()) }
    }

    pub fn note_tab(&self, tab: TabId) {
        self.tabs.lock().insert(tab);
    }

    async fn write(&self, message: &HostOutbound) -> Result<(), BridgeError> {
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::Transport(format!("stdout write failed: {e}")))?;
        out.flush().await.map_err(|e| BridgeError::Transport(format!("stdout flush failed: {e}")))
    }

    pub async fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ExtensionHost for StdioHost<W> {
    async fn send_to_tab(&self, tab: TabId, message: TabMessage) -> Result<(), BridgeError> {
        self.write(&HostOutbound::Tab { tab_id: tab, message }).await
    }

    async fn tabs(&self) -> Vec<TabId> {
        self.tabs.lock().iter().copied().collect()
    }

    async fn open_confirmation(&self) -> Result<(), BridgeError> {
        self.write(&HostOutbound::OpenConfirmation).await
    }
}

/// Feeds inbound lines to the coordinator until EOF. Malformed lines are
/// logged and skipped.
pub async fn serve<R, W>(
    reader: R,
    host: &StdioHost<W>,
    coordinator: mpsc::UnboundedSender<RuntimeMessage>,
) -> Result<(), BridgeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let mut lines = reader.lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| BridgeError::Transport(format!("stdin read failed: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }
        let inbound: HostInbound = match serde_json::from_str(&line) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "skipping malformed host message");
                continue;
            }
        };
        let message = match (inbound.message, inbound.tab_id) {
            (RuntimeMessage::ProviderRequest { mut data }, tab) => {
                if let Some(tab) = tab {
                    host.note_tab(tab);
                    data.origin.tab_id = Some(tab);
                }
                RuntimeMessage::ProviderRequest { data }
            }
            // only the confirmation UI, which has no tab, may settle a confirmation
            (RuntimeMessage::PopupResponse { request_id, .. }, Some(tab)) => {
                warn!(key = %request_id, tab = %tab, "dropping confirmation result sent from a tab");
                continue;
            }
            (message, None) => message,
        };
        debug!("host message received");
        coordinator.send(message).map_err(|_| BridgeError::ChannelClosed("coordinator"))?;
    }
    Ok(())
}
