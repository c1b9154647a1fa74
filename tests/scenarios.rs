//! End-to-end flows: page provider -> relay -> background -> confirmation UI
//! and back.

mod util;

use luckyou_wallet::background::{Confirmation, PendingAuthorization, PendingSignature};
use luckyou_wallet::protocol::{ErrorCode, ProviderEvent};
use luckyou_wallet::provider::ProviderError;
use luckyou_wallet::storage::{keys, AuthorizedSites};
use luckyou_wallet::ui::{Prompt, UiState};
use luckyou_wallet::wallet::MockWalletCore;
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::broadcast;
use util::{confirmation_requested, eventually, start, ADDRESS, ORIGIN};

async fn next_matching(
    rx: &mut broadcast::Receiver<ProviderEvent>,
    pred: impl Fn(&ProviderEvent) -> bool,
) -> ProviderEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("event not received")
}

#[tokio::test]
async fn test_disclosure_on_new_origin_is_approved_through_the_ui() {
    let h = start();
    let tab = h.ext.open_tab(ORIGIN);
    let mut events = tab.provider().subscribe();

    let provider = tab.provider().clone();
    let pending = tokio::spawn(async move { provider.request_accounts().await });
    confirmation_requested(&h).await;

    let slot: PendingAuthorization = h.store.load(keys::PENDING_AUTH).await.unwrap().unwrap();
    assert_eq!(slot.origin, ORIGIN);

    let mut ui = h.ext.confirmation_ui();
    ui.open().await.unwrap();
    assert!(matches!(ui.state(), UiState::Unlocking(Confirmation::Authorization(_))));
    assert!(ui.prompt().is_none(), "nothing is presented before unlock");

    ui.unlock(MockWalletCore::PASSWORD).await.unwrap();
    assert_eq!(ui.prompt().unwrap().unwrap(), Prompt::Connect { origin: ORIGIN.into() });
    ui.approve().await.unwrap();
    assert_eq!(ui.state(), &UiState::Home);

    let accounts = pending.await.unwrap().unwrap();
    assert_eq!(accounts, vec![ADDRESS.to_string()]);
    assert!(AuthorizedSites::new(h.store.clone()).is_authorized(ORIGIN).await.unwrap());
    assert!(h.store.raw().get(keys::PENDING_AUTH).await.unwrap().is_none());

    let event = next_matching(&mut events, |e| matches!(e, ProviderEvent::AccountsChanged(_))).await;
    assert_eq!(event, ProviderEvent::AccountsChanged(vec![ADDRESS.to_string()]));
    assert_eq!(tab.provider().state().selected_address.as_deref(), Some(ADDRESS));
}

#[tokio::test]
async fn test_authorized_origin_is_not_prompted_again() {
    let h = start();
    AuthorizedSites::new(h.store.clone()).authorize(ORIGIN).await.unwrap();
    let tab = h.ext.open_tab(ORIGIN);

    let before = h.ext.host().activations();
    let accounts = tab.provider().request_accounts().await.unwrap();
    assert_eq!(accounts, vec![ADDRESS.to_string()]);
    assert_eq!(tab.provider().accounts().await.unwrap(), vec![ADDRESS.to_string()]);
    assert_eq!(h.ext.host().activations(), before);
    assert!(h.store.raw().get(keys::PENDING_AUTH).await.unwrap().is_none());
}

#[tokio::test]
async fn test_rejected_signature_reports_4001_and_clears_the_slot() {
    let h = start();
    let tab = h.ext.open_tab(ORIGIN);

    let provider = tab.provider().clone();
    let pending = tokio::spawn(async move { provider.personal_sign("0x68656c6c6f", ADDRESS).await });
    confirmation_requested(&h).await;
    let slot: Option<PendingSignature> = h.store.load(keys::PENDING_SIGNATURE).await.unwrap();
    assert_eq!(slot.unwrap().request.method, "personal_sign");

    let mut ui = h.ext.confirmation_ui();
    ui.open().await.unwrap();
    ui.unlock(MockWalletCore::PASSWORD).await.unwrap();
    assert_eq!(
        ui.prompt().unwrap().unwrap(),
        Prompt::SignMessage { origin: ORIGIN.into(), message: "hello".into() }
    );
    ui.reject().await.unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::UserRejected));
    assert_eq!(err.code().map(|c| c.code()), Some(4001));
    assert!(h.store.raw().get(keys::PENDING_SIGNATURE).await.unwrap().is_none());
    assert!(h.wallet.calls().is_empty());
    eventually("pending table drained", || async { h.ext.coordinator().pending_len() == 0 }).await;
}

#[tokio::test]
async fn test_switch_to_unknown_chain_reports_4902_and_keeps_network() {
    let h = start();
    let tab = h.ext.open_tab(ORIGIN);

    let err = tab.provider().switch_chain(999_999).await.unwrap_err();
    assert_eq!(err.code().map(|c| c.code()), Some(4902));
    assert_eq!(tab.provider().chain_id().await.unwrap(), "0x1");
    assert_eq!(h.ext.networks().current_network().await.unwrap().chain_id, 1);
}

#[tokio::test]
async fn test_switch_to_known_chain_notifies_every_tab() {
    let h = start();
    let first = h.ext.open_tab(ORIGIN);
    let second = h.ext.open_tab("other.example");
    let mut events = second.provider().subscribe();

    first.provider().switch_chain(137).await.unwrap();

    assert_eq!(first.provider().chain_id().await.unwrap(), "0x89");
    assert_eq!(second.provider().network_version().await.unwrap(), "137");
    let changed = next_matching(&mut events, |e| matches!(e, ProviderEvent::ChainChanged(_))).await;
    assert_eq!(changed, ProviderEvent::ChainChanged("0x89".into()));
    let network = next_matching(&mut events, |e| matches!(e, ProviderEvent::NetworkChanged(_))).await;
    assert_eq!(network, ProviderEvent::NetworkChanged("137".into()));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_then_is_swept() {
    let h = start();
    let tab = h.ext.open_tab(ORIGIN);

    let err = tab.provider().request_accounts().await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout { .. }), "got {err:?}");
    assert_eq!(tab.provider().pending_requests(), 0);
    assert_eq!(h.ext.coordinator().pending_len(), 1, "timeout does not cancel background work");
    assert!(h.store.raw().get(keys::PENDING_AUTH).await.unwrap().is_some());

    tokio::time::sleep(Duration::from_secs(5 * 60 + 30)).await;

    assert_eq!(h.ext.coordinator().pending_len(), 0);
    assert!(h.ext.coordinator().active_confirmation().await.is_none());
    assert!(h.store.raw().get(keys::PENDING_AUTH).await.unwrap().is_none());
}

#[tokio::test]
async fn test_approved_transaction_is_sent_on_the_selected_network() {
    let h = start();
    let tab = h.ext.open_tab(ORIGIN);
    tab.provider().switch_chain(11_155_111).await.unwrap();

    let provider = tab.provider().clone();
    let pending = tokio::spawn(async move {
        provider
            .send_transaction(serde_json::json!({
                "from": ADDRESS,
                "to": "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23",
                "value": "0xde0b6b3a7640000",
            }))
            .await
    });
    confirmation_requested(&h).await;

    let mut ui = h.ext.confirmation_ui();
    ui.unlock(MockWalletCore::PASSWORD).await.unwrap();
    match ui.prompt().unwrap().unwrap() {
        Prompt::SendTransaction { to, value, has_data, .. } => {
            assert_eq!(to.as_deref(), Some("0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"));
            assert_eq!(value, "1.000000000000000000");
            assert!(!has_data);
        }
        other => panic!("unexpected prompt {other:?}"),
    }
    ui.approve().await.unwrap();

    let hash = pending.await.unwrap().unwrap();
    assert_eq!(hash.len(), 66);
    match &h.wallet.calls()[..] {
        [luckyou_wallet::wallet::mock::WalletCall::SendTransaction { chain_id, .. }] => {
            assert_eq!(*chain_id, 11_155_111)
        }
        calls => panic!("unexpected wallet calls {calls:?}"),
    }
}

#[tokio::test]
async fn test_navigation_drops_the_old_documents_response() {
    let h = start();
    let mut tab = h.ext.open_tab(ORIGIN);
    let old_provider = tab.provider().clone();
    let old_document = tab.document_id();

    let pending = tokio::spawn(async move { old_provider.request_accounts().await });
    confirmation_requested(&h).await;

    tab.navigate("elsewhere.example");
    assert_ne!(tab.document_id(), old_document);
    assert!(matches!(pending.await.unwrap(), Err(ProviderError::Disconnected)));

    let mut ui = h.ext.confirmation_ui();
    ui.unlock(MockWalletCore::PASSWORD).await.unwrap();
    ui.approve().await.unwrap();

    // the new document sees nothing of the old request, and keeps working
    assert_eq!(tab.provider().pending_requests(), 0);
    assert_eq!(tab.provider().chain_id().await.unwrap(), "0x1");
    assert!(tab.is_relay_running());
}
