// tests/util.rs
// Shared helpers for the integration tests.

#![allow(dead_code)]

use luckyou_wallet::blockchain::MockChainRpc;
use luckyou_wallet::core::BridgeConfig;
use luckyou_wallet::runtime::Extension;
use luckyou_wallet::storage::StoreHandle;
use luckyou_wallet::wallet::MockWalletCore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const ORIGIN: &str = "app.uniswap.example";
pub const ADDRESS: &str = MockWalletCore::DEFAULT_ADDRESS;

pub struct Harness {
    pub ext: Extension,
    pub wallet: Arc<MockWalletCore>,
    pub chain: Arc<MockChainRpc>,
    pub store: StoreHandle,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.ext.shutdown();
    }
}

pub fn start() -> Harness {
    start_with(BridgeConfig::default(), MockWalletCore::new())
}

pub fn start_with(config: BridgeConfig, wallet: MockWalletCore) -> Harness {
    let store = StoreHandle::memory();
    let wallet = Arc::new(wallet);
    let chain = Arc::new(MockChainRpc::new());
    let ext = Extension::start(config, store.clone(), wallet.clone(), chain.clone());
    Harness { ext, wallet, chain, store }
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Waits for the next UI activation, with a bound.
pub async fn confirmation_requested(h: &Harness) {
    tokio::time::timeout(Duration::from_secs(2), h.ext.host().wait_for_confirmation())
        .await
        .expect("confirmation UI was never activated");
}
