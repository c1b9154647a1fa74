//! EIP-6963 multi-wallet discovery.

use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use super::PageWindow;
use crate::protocol::{PageMessage, ProviderInfo};

const ICON: &str = "data:image/svg+xml;base64,PHN2ZyB3aWR0aD0iMzIiIGhlaWdodD0iMzIiIHZpZXdCb3g9IjAgMCAzMiAzMiIgZmlsbD0ibm9uZSIgeG1sbnM9Imh0dHA6Ly93d3cudzMub3JnLzIwMDAvc3ZnIj4KPHJlY3Qgd2lkdGg9IjMyIiBoZWlnaHQ9IjMyIiByeD0iOCIgZmlsbD0iIzAwN0JGRiIvPgo8cGF0aCBkPSJNMTYgOEwxOCAxMkwxNiAxNkwxNCAxMkwxNiA4WiIgZmlsbD0id2hpdGUiLz4KPHBhdGggZD0iTTE2IDI0TDE4IDIwTDE2IDE2TDE0IDIwTDE2IDI0WiIgZmlsbD0id2hpdGUiLz4KPC9zdmc+";

pub fn luckyou_provider_info() -> ProviderInfo {
    ProviderInfo {
        uuid: "luckyou-wallet-extension".to_string(),
        name: "LuckYou Wallet".to_string(),
        icon: ICON.to_string(),
        rdns: "com.luckyou.wallet".to_string(),
    }
}

/// Broadcasts a discovery request on `window` and collects every distinct
/// announcement received within `wait`.
pub async fn discover_providers(window: &PageWindow, wait: Duration) -> Vec<ProviderInfo> {
    let mut rx = window.subscribe();
    window.post(&PageMessage::RequestProvider);

    let mut found: Vec<ProviderInfo> = Vec::new();
    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    loop {
        let received = tokio::select! {
            _ = &mut deadline => break,
            received = rx.recv() => received,
        };
        match received {
            Ok(message) => {
                if let Ok(PageMessage::AnnounceProvider { info }) =
                    serde_json::from_value::<PageMessage>(message.data)
                {
                    if !found.iter().any(|known| known.uuid == info.uuid) {
                        found.push(info);
                    }
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
    found
}
