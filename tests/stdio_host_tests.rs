//! The newline-delimited JSON host wired to a real coordinator.

use chrono::Utc;
use luckyou_wallet::background::{BackgroundCoordinator, CoordinatorDeps};
use luckyou_wallet::blockchain::{MockChainRpc, NetworkConfig, NetworkRegistry};
use luckyou_wallet::core::config::CoordinatorConfig;
use luckyou_wallet::protocol::{
    DocumentId, Request, RequestId, RequestKey, RequestOrigin, RuntimeMessage, TabId,
    TabMessage,
};
use luckyou_wallet::runtime::stdio::serve;
use luckyou_wallet::runtime::{HostInbound, HostOutbound, StdioHost};
use luckyou_wallet::storage::StoreHandle;
use luckyou_wallet::wallet::MockWalletCore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn inbound(tab: u64, id: u64, method: &str, document_id: DocumentId) -> String {
    let message = HostInbound {
        tab_id: Some(TabId(tab)),
        message: RuntimeMessage::ProviderRequest {
            data: Request {
                id: RequestId(id),
                method: method.into(),
                params: vec![],
                origin: RequestOrigin { tab_id: None, document_id, origin: "dex.example".into() },
                created_at: Utc::now(),
            },
        },
    };
    serde_json::to_string(&message).unwrap()
}

#[tokio::test]
async fn test_serve_stamps_tab_and_skips_bad_lines() {
    let host = StdioHost::new(Vec::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let document_id = DocumentId::new();
    let input = format!("{}\n{{not json\n\n", inbound(5, 1, "eth_chainId", document_id));

    serve(BufReader::new(input.as_bytes()), &host, tx).await.unwrap();

    match rx.recv().await.unwrap() {
        RuntimeMessage::ProviderRequest { data } => {
            assert_eq!(data.origin.tab_id, Some(TabId(5)));
            assert_eq!(data.origin.document_id, document_id);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(rx.recv().await.is_none(), "malformed and blank lines are skipped");
}

#[tokio::test]
async fn test_confirmation_results_from_tabs_are_dropped() {
    let host = StdioHost::new(Vec::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let key = RequestKey { tab_id: Some(TabId(5)), document_id: DocumentId::new(), id: RequestId(1) };
    let popup = RuntimeMessage::popup_response(key, Ok(json!(["0xattacker"])));
    let from_tab = HostInbound { tab_id: Some(TabId(5)), message: popup.clone() };
    let from_ui = HostInbound { tab_id: None, message: popup };
    let input = format!(
        "{}\n{}\n",
        serde_json::to_string(&from_tab).unwrap(),
        serde_json::to_string(&from_ui).unwrap()
    );

    serve(BufReader::new(input.as_bytes()), &host, tx).await.unwrap();

    match rx.recv().await.unwrap() {
        RuntimeMessage::PopupResponse { request_id, .. } => assert_eq!(request_id, key),
        other => panic!("unexpected {other:?}"),
    }
    assert!(rx.recv().await.is_none(), "only the tab-less result is forwarded");
}

#[tokio::test]
async fn test_requests_round_trip_through_stdout() {
    let (out_w, out_r) = tokio::io::duplex(64 * 1024);
    let host = Arc::new(StdioHost::new(out_w));
    let store = StoreHandle::memory();
    let coordinator = BackgroundCoordinator::new(
        CoordinatorConfig::default(),
        CoordinatorDeps {
            store: store.clone(),
            networks: NetworkRegistry::new(store, NetworkConfig::builtin_defaults()),
            wallet: Arc::new(MockWalletCore::new()),
            chain: Arc::new(MockChainRpc::new()),
            host: host.clone(),
        },
    );
    let (tx, rx) = mpsc::unbounded_channel();
    let task = coordinator.spawn(rx);

    let document_id = DocumentId::new();
    let input = format!(
        "{}\n{}\n",
        inbound(9, 1, "eth_chainId", document_id),
        inbound(9, 2, "eth_requestAccounts", document_id)
    );
    serve(BufReader::new(input.as_bytes()), host.as_ref(), tx).await.unwrap();

    let mut lines = BufReader::new(out_r).lines();
    let mut outbound = Vec::new();
    for _ in 0..2 {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("host wrote nothing")
            .unwrap()
            .unwrap();
        outbound.push(serde_json::from_str::<HostOutbound>(&line).unwrap());
    }

    assert!(outbound.contains(&HostOutbound::OpenConfirmation));
    let response = outbound
        .iter()
        .find_map(|o| match o {
            HostOutbound::Tab { tab_id, message: TabMessage::Response { key, result, .. } } => {
                Some((*tab_id, *key, result.clone()))
            }
            _ => None,
        })
        .expect("no response line");
    assert_eq!(response.0, TabId(9));
    assert_eq!(response.1.id, RequestId(1));
    assert_eq!(response.2, Some(json!("0x1")));

    coordinator.shutdown();
    task.await.unwrap();
}

#[test]
fn test_outbound_wire_shape() {
    let line = serde_json::to_value(HostOutbound::OpenConfirmation).unwrap();
    assert_eq!(line, json!({"type": "OPEN_CONFIRMATION"}));
}
