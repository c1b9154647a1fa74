//! A document's own message channel, the stand-in for `window.postMessage`.

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::PageProvider;

static NEXT_WINDOW: AtomicU64 = AtomicU64::new(1);

/// Identity of the browsing context that posted a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

impl WindowId {
    /// A context other than any window created so far, e.g. a cross-origin
    /// iframe posting into this window.
    pub fn foreign() -> Self {
        Self(NEXT_WINDOW.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window-{}", self.0)
    }
}

/// One posted message: untyped payload plus the poster's identity.
#[derive(Debug, Clone)]
pub struct WindowMessage {
    pub source: WindowId,
    pub data: Value,
}

struct WindowInner {
    id: WindowId,
    origin: String,
    tx: broadcast::Sender<WindowMessage>,
    provider: OnceLock<Arc<PageProvider>>,
    unloaded: CancellationToken,
}

/// Shared handle to a page window. Page scripts, the injected provider and
/// the relay all hold clones of the same window.
#[derive(Clone)]
pub struct PageWindow {
    inner: Arc<WindowInner>,
}

impl PageWindow {
    pub fn new(origin: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId::foreign(),
                origin: origin.into(),
                tx,
                provider: OnceLock::new(),
                unloaded: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    /// Hostname of the loaded document.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WindowMessage> {
        self.inner.tx.subscribe()
    }

    /// Posts from this window. With no listener attached the message is
    /// simply lost, as in a browser.
    pub fn post<T: Serialize>(&self, message: &T) {
        match serde_json::to_value(message) {
            Ok(data) => self.post_raw(self.inner.id, data),
            Err(e) => tracing::warn!(error = %e, "unserializable window message dropped"),
        }
    }

    /// Posts an arbitrary payload as if from `source`.
    pub fn post_raw(&self, source: WindowId, data: Value) {
        let _ = self.inner.tx.send(WindowMessage { source, data });
    }

    /// The provider injected into this window, if any.
    pub fn provider(&self) -> Option<Arc<PageProvider>> {
        self.inner.provider.get().cloned()
    }

    /// Tears the document down: listeners stop and in-flight provider
    /// requests fail as disconnected.
    pub fn unload(&self) {
        self.inner.unloaded.cancel();
    }

    /// Token cancelled when the document unloads.
    pub fn unloaded(&self) -> CancellationToken {
        self.inner.unloaded.clone()
    }

    pub(super) fn provider_slot(&self) -> &OnceLock<Arc<PageProvider>> {
        &self.inner.provider
    }
}

impl fmt::Debug for PageWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageWindow")
            .field("id", &self.inner.id)
            .field("origin", &self.inner.origin)
            .field("provider", &self.inner.provider.get().is_some())
            .finish()
    }
}
