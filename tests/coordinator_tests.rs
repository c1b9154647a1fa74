//! Background coordinator driven directly over its runtime inbox, with the
//! tab side observed through a `LocalHost` channel.

use chrono::Utc;
use luckyou_wallet::background::{
    BackgroundCoordinator, Confirmation, CoordinatorDeps, PendingSignature, Stage, Subtask,
};
use luckyou_wallet::blockchain::{MockChainRpc, NetworkConfig, NetworkRegistry};
use luckyou_wallet::core::config::CoordinatorConfig;
use luckyou_wallet::protocol::{
    into_outcome, DocumentId, ErrorCode, ProviderEvent, Request, RequestId, RequestKey,
    RequestOrigin, RpcError, RuntimeMessage, TabId, TabMessage,
};
use luckyou_wallet::runtime::LocalHost;
use luckyou_wallet::storage::{keys, AuthorizedSites, SqliteStore, StoreHandle};
use luckyou_wallet::wallet::MockWalletCore;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use test_case::test_case;
use tokio::sync::mpsc;

const ORIGIN: &str = "dapp.example";
const TAB: TabId = TabId(7);

struct Fixture {
    coordinator: BackgroundCoordinator,
    host: Arc<LocalHost>,
    tab: mpsc::UnboundedReceiver<TabMessage>,
    store: StoreHandle,
    chain: Arc<MockChainRpc>,
    networks: NetworkRegistry,
    document_id: DocumentId,
    seen_events: Vec<ProviderEvent>,
}

fn fixture() -> Fixture {
    fixture_with(CoordinatorConfig::default(), MockWalletCore::new())
}

fn fixture_with(config: CoordinatorConfig, wallet: MockWalletCore) -> Fixture {
    fixture_on(StoreHandle::memory(), config, wallet)
}

async fn sqlite_fixture(dir: &TempDir) -> Fixture {
    let url = format!("sqlite://{}", dir.path().join("extension.db").display());
    let store = StoreHandle::new(Arc::new(SqliteStore::new_with_url(&url).await.unwrap()));
    fixture_on(store, CoordinatorConfig::default(), MockWalletCore::new())
}

fn fixture_on(store: StoreHandle, config: CoordinatorConfig, wallet: MockWalletCore) -> Fixture {
    let host = Arc::new(LocalHost::new());
    let tab = host.connect_tab(TAB);
    let chain = Arc::new(MockChainRpc::new());
    let networks = NetworkRegistry::new(store.clone(), NetworkConfig::builtin_defaults());
    let coordinator = BackgroundCoordinator::new(
        config,
        CoordinatorDeps {
            store: store.clone(),
            networks: networks.clone(),
            wallet: Arc::new(wallet),
            chain: chain.clone(),
            host: host.clone(),
        },
    );
    Fixture {
        coordinator,
        host,
        tab,
        store,
        chain,
        networks,
        document_id: DocumentId::new(),
        seen_events: Vec::new(),
    }
}

impl Fixture {
    fn request(&self, id: u64, method: &str, params: Vec<Value>) -> Request {
        Request {
            id: RequestId(id),
            method: method.to_string(),
            params,
            origin: RequestOrigin {
                tab_id: Some(TAB),
                document_id: self.document_id,
                origin: ORIGIN.to_string(),
            },
            created_at: Utc::now(),
        }
    }

    async fn send(&self, request: Request) -> RequestKey {
        let key = request.key();
        self.coordinator.handle(RuntimeMessage::ProviderRequest { data: request }).await;
        key
    }

    async fn call(&mut self, id: u64, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let key = self.send(self.request(id, method, params)).await;
        let (got, outcome) = self.next_response().await;
        assert_eq!(got, key);
        outcome
    }

    async fn popup(&self, key: RequestKey, outcome: Result<Value, RpcError>) {
        self.coordinator.handle(RuntimeMessage::popup_response(key, outcome)).await;
    }

    async fn next_response(&mut self) -> (RequestKey, Result<Value, RpcError>) {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), self.tab.recv())
                .await
                .expect("no message for tab")
                .expect("tab channel closed");
            match message {
                TabMessage::Response { key, result, error } => {
                    return (key, into_outcome(result, error))
                }
                TabMessage::Event { event } => self.seen_events.push(event),
            }
        }
    }

    fn no_response(&mut self) {
        while let Ok(message) = self.tab.try_recv() {
            assert!(
                !matches!(message, TabMessage::Response { .. }),
                "unexpected response {message:?}"
            );
        }
    }

    /// Events received so far, including those passed over while waiting
    /// for a response.
    fn events(&mut self) -> Vec<ProviderEvent> {
        let mut events = std::mem::take(&mut self.seen_events);
        while let Ok(message) = self.tab.try_recv() {
            if let TabMessage::Event { event } = message {
                events.push(event);
            }
        }
        events
    }
}

fn typed_data() -> Value {
    json!({
        "types": {
            "EIP712Domain": [{"name": "name", "type": "string"}],
            "Mail": [{"name": "contents", "type": "string"}]
        },
        "primaryType": "Mail",
        "domain": {"name": "Ether Mail"},
        "message": {"contents": "Hello, Bob!"}
    })
}

#[tokio::test]
async fn test_cached_info_is_answered_without_the_node() {
    let mut f = fixture();
    assert_eq!(f.call(1, "eth_chainId", vec![]).await.unwrap(), json!("0x1"));
    assert_eq!(f.call(2, "net_version", vec![]).await.unwrap(), json!("1"));
    assert!(f.chain.calls().is_empty());
    assert_eq!(f.coordinator.pending_len(), 0);
}

#[tokio::test]
async fn test_unknown_methods_pass_through_to_the_selected_network() {
    let mut f = fixture();
    f.chain.respond("eth_getBalance", Ok(json!("0x10")));
    f.chain.respond(
        "eth_call",
        Err(RpcError::with_message(ErrorCode::Server(3), "execution reverted")),
    );
    f.networks.select("polygon").await.unwrap();

    let balance = f.call(1, "eth_getBalance", vec![json!(MockWalletCore::DEFAULT_ADDRESS), json!("latest")]);
    assert_eq!(balance.await.unwrap(), json!("0x10"));
    let reverted = f.call(2, "eth_call", vec![json!({"to": "0x00"})]).await.unwrap_err();
    assert_eq!(reverted.code.code(), 3);
    assert_eq!(reverted.message, "execution reverted");

    let calls = f.chain.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.chain_id == 137));
    assert_eq!(calls[0].params[1], json!("latest"));
}

#[test_case("eth_requestAccounts", vec![] ; "disclosure")]
#[test_case("personal_sign", vec![json!("0x6869"), json!(MockWalletCore::DEFAULT_ADDRESS)] ; "personal sign")]
#[test_case("eth_signTypedData_v4", vec![json!(MockWalletCore::DEFAULT_ADDRESS), typed_data()] ; "typed data")]
#[test_case("eth_sendTransaction", vec![json!({"to": "0x2c7536e3605d9c16a7a3d7b1898e529396a65c23"})] ; "transaction")]
#[tokio::test]
async fn test_missing_wallet_yields_32001(method: &str, params: Vec<Value>) {
    let mut f = fixture_with(CoordinatorConfig::default(), MockWalletCore::without_wallet());
    let err = f.call(1, method, params).await.unwrap_err();
    assert_eq!(err.code.code(), -32001);
    assert_eq!(f.host.activations(), 0);
}

#[tokio::test]
async fn test_eth_accounts_never_prompts() {
    let mut f = fixture();
    assert_eq!(f.call(1, "eth_accounts", vec![]).await.unwrap(), json!([]));
    AuthorizedSites::new(f.store.clone()).authorize(ORIGIN).await.unwrap();
    assert_eq!(
        f.call(2, "eth_accounts", vec![]).await.unwrap(),
        json!([MockWalletCore::DEFAULT_ADDRESS])
    );
    assert_eq!(f.host.activations(), 0);

    let mut empty = fixture_with(CoordinatorConfig::default(), MockWalletCore::without_wallet());
    assert_eq!(empty.call(1, "eth_accounts", vec![]).await.unwrap(), json!([]));
}

#[test_case(vec![] ; "missing parameters")]
#[test_case(vec![json!(42)] ; "not a message")]
#[tokio::test]
async fn test_malformed_signing_params_are_rejected_up_front(params: Vec<Value>) {
    let mut f = fixture();
    let err = f.call(1, "personal_sign", params).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParams);
    assert_eq!(f.host.activations(), 0);
    assert!(f.store.raw().get(keys::PENDING_SIGNATURE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_request_is_held_once() {
    let mut f = fixture();
    let request = f.request(1, "eth_requestAccounts", vec![]);
    let key = f.send(request.clone()).await;
    f.send(request).await;

    assert_eq!(f.coordinator.pending_len(), 1);
    assert_eq!(f.host.activations(), 1);
    assert_eq!(f.coordinator.pending_stage(&key), Some(Stage::Awaiting(Subtask::Confirmation)));

    f.popup(key, Ok(json!([MockWalletCore::DEFAULT_ADDRESS]))).await;
    let (got, outcome) = f.next_response().await;
    assert_eq!(got, key);
    assert!(outcome.is_ok());

    // a second decision for the same request goes nowhere
    f.popup(key, Err(RpcError::user_rejected())).await;
    f.no_response();
    assert_eq!(f.coordinator.pending_len(), 0);
}

#[tokio::test]
async fn test_same_id_from_another_document_is_a_different_request() {
    let mut f = fixture();
    let first = f.send(f.request(1, "eth_requestAccounts", vec![])).await;
    let mut other = f.request(1, "eth_requestAccounts", vec![]);
    other.origin.document_id = DocumentId::new();
    let second = f.send(other).await;

    assert_ne!(first, second);
    assert_eq!(f.coordinator.pending_len(), 2);
    assert_eq!(f.coordinator.queued_confirmations().await, 1);
    f.no_response();
}

#[tokio::test]
async fn test_confirmations_are_presented_one_at_a_time() {
    let mut f = fixture();
    let first = f.send(f.request(1, "personal_sign", vec![json!("0x6869")])).await;
    let second = f.send(f.request(2, "eth_signTypedData_v4", vec![json!(MockWalletCore::DEFAULT_ADDRESS), typed_data()])).await;

    assert_eq!(f.coordinator.active_confirmation().await, Some(first));
    assert_eq!(f.coordinator.queued_confirmations().await, 1);
    assert_eq!(f.host.activations(), 1);
    let slot: Value = f.store.raw().get(keys::PENDING_SIGNATURE).await.unwrap().unwrap();
    assert_eq!(slot["request"]["method"], json!("personal_sign"));

    f.popup(first, Ok(json!("0xsig"))).await;
    let (got, outcome) = f.next_response().await;
    assert_eq!((got, outcome), (first, Ok(json!("0xsig"))));

    assert_eq!(f.coordinator.active_confirmation().await, Some(second));
    assert_eq!(f.host.activations(), 2);
    let slot: Value = f.store.raw().get(keys::PENDING_SIGNATURE).await.unwrap().unwrap();
    assert_eq!(slot["request"]["method"], json!("eth_signTypedData_v4"));

    f.popup(second, Err(RpcError::user_rejected())).await;
    let (got, outcome) = f.next_response().await;
    assert_eq!(got, second);
    assert_eq!(outcome.unwrap_err().code, ErrorCode::UserRejected);
    assert!(f.store.raw().get(keys::PENDING_SIGNATURE).await.unwrap().is_none());
    assert_eq!(f.coordinator.active_confirmation().await, None);
}

#[tokio::test]
async fn test_full_backlog_refuses_with_32002() {
    let config = CoordinatorConfig { max_queued_confirmations: 1, ..CoordinatorConfig::default() };
    let mut f = fixture_with(config, MockWalletCore::new());
    f.send(f.request(1, "personal_sign", vec![json!("0x01")])).await;
    f.send(f.request(2, "personal_sign", vec![json!("0x02")])).await;

    let err = f.call(3, "personal_sign", vec![json!("0x03")]).await.unwrap_err();
    assert_eq!(err.code.code(), -32002);
    assert_eq!(f.coordinator.pending_len(), 2);
}

#[tokio::test]
async fn test_popup_response_for_request_not_awaiting_confirmation_is_ignored() {
    let mut f = fixture();
    f.chain.set_latency(Duration::from_millis(200));
    let coordinator = f.coordinator.clone();
    let slow = f.request(1, "eth_blockNumber", vec![]);
    let key = slow.key();
    let task = tokio::spawn(async move {
        coordinator.handle(RuntimeMessage::ProviderRequest { data: slow }).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(f.coordinator.pending_stage(&key), Some(Stage::Awaiting(Subtask::ChainRpc)));
    f.popup(key, Ok(json!("0xforged"))).await;
    f.no_response();

    task.await.unwrap();
    let (got, outcome) = f.next_response().await;
    assert_eq!((got, outcome), (key, Ok(json!("0x1"))));
}

#[tokio::test]
async fn test_promoted_authorization_for_granted_origin_needs_no_prompt() {
    let mut f = fixture();
    let first = f.send(f.request(1, "eth_requestAccounts", vec![])).await;
    let mut again = f.request(2, "eth_requestAccounts", vec![]);
    again.origin.document_id = DocumentId::new();
    let second = f.send(again).await;
    assert_eq!(f.coordinator.queued_confirmations().await, 1);

    // what the UI does on approval
    AuthorizedSites::new(f.store.clone()).authorize(ORIGIN).await.unwrap();
    f.popup(first, Ok(json!([MockWalletCore::DEFAULT_ADDRESS]))).await;

    let mut answered = vec![f.next_response().await, f.next_response().await];
    answered.sort_by_key(|(key, _)| key.id);
    assert_eq!(answered[0].0, first);
    assert_eq!(answered[1], (second, Ok(json!([MockWalletCore::DEFAULT_ADDRESS]))));
    assert_eq!(f.host.activations(), 1);
    assert!(f.store.raw().get(keys::PENDING_AUTH).await.unwrap().is_none());
}

#[tokio::test]
async fn test_approved_authorization_announces_accounts_to_the_tab() {
    let mut f = fixture();
    let key = f.send(f.request(1, "eth_requestAccounts", vec![])).await;
    f.popup(key, Ok(json!([MockWalletCore::DEFAULT_ADDRESS]))).await;
    assert_eq!(f.next_response().await, (key, Ok(json!([MockWalletCore::DEFAULT_ADDRESS]))));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        f.events(),
        vec![ProviderEvent::AccountsChanged(vec![MockWalletCore::DEFAULT_ADDRESS.to_string()])]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sweep_drops_expired_requests_and_promotes_the_next() {
    let mut f = fixture();
    let stale = f.send(f.request(1, "personal_sign", vec![json!("0x01")])).await;
    tokio::time::advance(Duration::from_secs(200)).await;
    let fresh = f.send(f.request(2, "personal_sign", vec![json!("0x02")])).await;
    assert_eq!(f.coordinator.sweep_expired().await, 0);

    tokio::time::advance(Duration::from_secs(101)).await;
    assert_eq!(f.coordinator.sweep_expired().await, 1);
    assert_eq!(f.coordinator.pending_stage(&stale), None);
    assert_eq!(f.coordinator.active_confirmation().await, Some(fresh));
    assert_eq!(f.host.activations(), 2);
    f.no_response();

    // the UI answering the swept request changes nothing
    f.popup(stale, Ok(json!("0xlate"))).await;
    f.no_response();
    assert_eq!(f.coordinator.pending_len(), 1);
}

#[test_case(json!({"chainId": "137"}) ; "decimal chain id")]
#[test_case(json!({}) ; "missing chain id")]
#[test_case(json!("0x89") ; "bare string")]
#[tokio::test]
async fn test_switch_chain_with_bad_params_is_32602(param: Value) {
    let mut f = fixture();
    let err = f.call(1, "wallet_switchEthereumChain", vec![param]).await.unwrap_err();
    assert_eq!(err.code.code(), -32602);
    assert_eq!(f.networks.current_network().await.unwrap().chain_id, 1);
}

#[tokio::test]
async fn test_switch_chain_updates_selection_and_broadcasts() {
    let mut f = fixture();
    let result = f.call(1, "wallet_switchEthereumChain", vec![json!({"chainId": "0xaa36a7"})]).await;
    assert_eq!(result.unwrap(), Value::Null);
    assert_eq!(f.networks.current_network().await.unwrap().key, "sepolia");
    assert_eq!(
        f.events(),
        vec![
            ProviderEvent::ChainChanged("0xaa36a7".into()),
            ProviderEvent::NetworkChanged("11155111".into()),
        ]
    );

    // switching to the current chain is a silent success
    let again = f.call(2, "wallet_switchEthereumChain", vec![json!({"chainId": "0xaa36a7"})]).await;
    assert_eq!(again.unwrap(), Value::Null);
    assert!(f.events().is_empty());
}

fn optimism(rpc_url: &str) -> Value {
    json!({
        "chainId": "0xa",
        "chainName": "OP Mainnet",
        "rpcUrls": [rpc_url],
        "nativeCurrency": {"name": "Ether", "symbol": "ETH", "decimals": 18},
        "blockExplorerUrls": ["https://optimistic.etherscan.io"]
    })
}

#[tokio::test]
async fn test_add_chain_probes_the_endpoint_before_registering() {
    let mut f = fixture();
    f.chain.serve_chain("https://mainnet.optimism.io", 10);

    let added = f.call(1, "wallet_addEthereumChain", vec![optimism("https://mainnet.optimism.io")]).await;
    assert_eq!(added.unwrap(), Value::Null);
    let network = f.networks.find_by_chain_id(10).await.unwrap().unwrap();
    assert!(network.is_custom);
    assert_eq!(network.name, "OP Mainnet");
    assert_eq!(network.block_explorer.as_deref(), Some("https://optimistic.etherscan.io"));
    assert_eq!(f.networks.current_network().await.unwrap().chain_id, 1, "adding does not switch");

    // now switchable
    let switched = f.call(2, "wallet_switchEthereumChain", vec![json!({"chainId": "0xa"})]).await;
    assert!(switched.is_ok());
    assert_eq!(f.call(3, "eth_chainId", vec![]).await.unwrap(), json!("0xa"));
}

#[test_case(Some(11) ; "endpoint serves another chain")]
#[test_case(None ; "endpoint unreachable")]
#[tokio::test]
async fn test_add_chain_with_failed_probe_is_32602(served: Option<u64>) {
    let mut f = fixture();
    if let Some(chain_id) = served {
        f.chain.serve_chain("https://rpc.example.org", chain_id);
    }
    let err = f.call(1, "wallet_addEthereumChain", vec![optimism("https://rpc.example.org")]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParams);
    assert!(f.networks.find_by_chain_id(10).await.unwrap().is_none());
}

fn custom_chain(chain_id: u64, rpc_url: &str) -> Value {
    json!({
        "chainId": format!("0x{chain_id:x}"),
        "chainName": format!("Chain {chain_id}"),
        "rpcUrls": [rpc_url],
        "nativeCurrency": {"symbol": "ETH"}
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_chain_requests_keep_every_network() {
    let dir = TempDir::new().unwrap();
    let mut f = sqlite_fixture(&dir).await;
    let mut expected = Vec::new();
    for round in 0..10u64 {
        let (a, b) = (1_000 + 2 * round, 1_001 + 2 * round);
        let (url_a, url_b) = (format!("https://rpc-{a}.example"), format!("https://rpc-{b}.example"));
        f.chain.serve_chain(&url_a, a).serve_chain(&url_b, b);

        let first = f.request(10 * round + 1, "wallet_addEthereumChain", vec![custom_chain(a, &url_a)]);
        let second = f.request(10 * round + 2, "wallet_addEthereumChain", vec![custom_chain(b, &url_b)]);
        tokio::join!(f.send(first), f.send(second));
        for _ in 0..2 {
            assert_eq!(f.next_response().await.1, Ok(Value::Null));
        }
        expected.extend([a, b]);
    }

    let stored: Vec<u64> =
        f.networks.custom_networks().await.unwrap().iter().map(|n| n.chain_id).collect();
    assert_eq!(stored, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slot_matches_active_confirmation_after_concurrent_completion() {
    let dir = TempDir::new().unwrap();
    let mut f = sqlite_fixture(&dir).await;
    let first = f.send(f.request(1, "personal_sign", vec![json!("0x01")])).await;

    let next = f.request(2, "personal_sign", vec![json!("0x02")]);
    let (_, second) = tokio::join!(f.popup(first, Err(RpcError::user_rejected())), f.send(next));

    let (got, outcome) = f.next_response().await;
    assert_eq!(got, first);
    assert_eq!(outcome.unwrap_err().code, ErrorCode::UserRejected);
    assert_eq!(f.coordinator.active_confirmation().await, Some(second));
    let slot: PendingSignature = f.store.load(keys::PENDING_SIGNATURE).await.unwrap().unwrap();
    assert_eq!(Confirmation::Signature(slot).key(), second);
}

#[tokio::test]
async fn test_add_known_chain_is_a_no_op() {
    let mut f = fixture();
    let params = json!({
        "chainId": "0x89",
        "chainName": "Polygon again",
        "rpcUrls": ["https://polygon.example"],
        "nativeCurrency": {"symbol": "POL"}
    });
    assert_eq!(f.call(1, "wallet_addEthereumChain", vec![params]).await.unwrap(), Value::Null);
    assert!(f.networks.custom_networks().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_response_without_tab_is_broadcast() {
    let f = fixture();
    let mut other = f.host.connect_tab(TabId(8));
    let mut request = f.request(1, "eth_chainId", vec![]);
    request.origin.tab_id = None;
    let key = f.send(request).await;

    match other.recv().await.unwrap() {
        TabMessage::Response { key: got, result, .. } => {
            assert_eq!(got, key);
            assert_eq!(result, Some(json!("0x1")));
        }
        message => panic!("unexpected {message:?}"),
    }
}

#[tokio::test]
async fn test_spawned_loop_serves_the_inbox_until_shutdown() {
    let mut f = fixture();
    let (tx, rx) = mpsc::unbounded_channel();
    let task = f.coordinator.spawn(rx);
    let request = f.request(1, "net_version", vec![]);
    tx.send(RuntimeMessage::ProviderRequest { data: request }).unwrap();
    let (_, outcome) = f.next_response().await;
    assert_eq!(outcome.unwrap(), json!("1"));

    f.coordinator.shutdown();
    tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
}
