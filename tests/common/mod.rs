#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use xswap::application::engine::SwapEngine;
use xswap::config::EngineConfig;
use xswap::domain::deal::{
    SwapClientType, SwapDeal, SwapEvent, SwapFailureReason, SwapPhase, SwapRole, SwapState,
};
use xswap::domain::order::{OrderToAccept, OwnOrder, PeerOrder};
use xswap::domain::packets::{Packet, PacketBody, PacketType, SwapRequest};
use xswap::domain::ports::{
    CurrencyClient, CurrencyClients, DealStore, Peer, PeerPool, PeerRef, PaymentStatus,
    RecoveryTracker, ReputationEvent, ReputationSink, Route,
};
use xswap::error::{ClientError, ClientResult, PeerError, PeerResult, SwapError};
use xswap::infrastructure::in_memory::InMemoryDealStore;

pub const PEER_KEY: &str = "02peer";
pub const WETH_TOKEN: &str = "0xWethToken";

/// Timeouts short enough for tests while leaving room for scheduling jitter.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig {
        swap_accept_timeout_ms: 300,
        swap_complete_timeout_ms: 600,
        sanity_swap_init_timeout_ms: 100,
        sanity_swap_complete_timeout_ms: 300,
        recovery_interval_ms: 50,
        ..EngineConfig::default()
    };
    if let Some(weth) = config.currencies.get_mut("WETH") {
        weth.token_address = Some(WETH_TOKEN.to_string());
    }
    config
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

// ---- currency client ----

#[derive(Debug, Clone, PartialEq)]
pub enum ClientCall {
    AddInvoice {
        r_hash: String,
        units: u128,
        cltv_expiry: Option<u64>,
    },
    RemoveInvoice(String),
    SettleInvoice {
        r_hash: String,
        r_preimage: String,
    },
    SendPayment(String),
    SendSmallestAmount {
        r_hash: String,
        destination: String,
    },
    GetRoute {
        units: u128,
        destination: String,
        final_cltv_delta: Option<u64>,
    },
    LookupPayment(String),
}

/// Scripted answers of a [`MockClient`].
#[derive(Debug, Clone)]
pub struct Behavior {
    pub route: ClientResult<Option<Route>>,
    pub height: ClientResult<u64>,
    pub add_invoice_error: Option<ClientError>,
    pub send_payment_error: Option<ClientError>,
    pub send_smallest_error: Option<ClientError>,
    pub settle_error: Option<ClientError>,
    /// Returned by payments when the deal does not carry its own preimage.
    pub preimage: String,
    pub lookup: ClientResult<PaymentStatus>,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            route: Ok(Some(Route {
                total_time_lock: 700,
            })),
            height: Ok(500),
            add_invoice_error: None,
            send_payment_error: None,
            send_smallest_error: None,
            settle_error: None,
            preimage: "11".repeat(32),
            lookup: Ok(PaymentStatus::Pending),
        }
    }
}

pub struct MockClient {
    client_type: SwapClientType,
    final_lock: u64,
    minutes_per_block: f64,
    connected: AtomicBool,
    behavior: Mutex<Behavior>,
    calls: Mutex<Vec<ClientCall>>,
    payment_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockClient {
    pub fn new(client_type: SwapClientType, final_lock: u64, minutes_per_block: f64) -> Arc<Self> {
        Arc::new(Self {
            client_type,
            final_lock,
            minutes_per_block,
            connected: AtomicBool::new(true),
            behavior: Mutex::new(Behavior::default()),
            calls: Mutex::new(Vec::new()),
            payment_gate: Mutex::new(None),
        })
    }

    pub fn configure(&self, update: impl FnOnce(&mut Behavior)) {
        update(&mut self.behavior.lock().unwrap());
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Makes `send_payment` block until the returned gate is notified.
    pub fn gate_payments(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.payment_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn removed_invoices(&self, r_hash: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ClientCall::RemoveInvoice(h) if h == r_hash))
            .count()
    }

    pub fn added_invoices(&self) -> Vec<(String, u128, Option<u64>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ClientCall::AddInvoice {
                    r_hash,
                    units,
                    cltv_expiry,
                } => Some((r_hash, units, cltv_expiry)),
                _ => None,
            })
            .collect()
    }

    pub fn settled(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ClientCall::SettleInvoice { r_hash, r_preimage } => Some((r_hash, r_preimage)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: ClientCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn behavior(&self) -> Behavior {
        self.behavior.lock().unwrap().clone()
    }
}

#[async_trait]
impl CurrencyClient for MockClient {
    fn client_type(&self) -> SwapClientType {
        self.client_type
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn final_lock(&self) -> u64 {
        self.final_lock
    }

    fn minutes_per_block(&self) -> f64 {
        self.minutes_per_block
    }

    async fn add_invoice(
        &self,
        r_hash: &str,
        units: u128,
        cltv_expiry: Option<u64>,
    ) -> ClientResult<()> {
        self.record(ClientCall::AddInvoice {
            r_hash: r_hash.to_string(),
            units,
            cltv_expiry,
        });
        match self.behavior().add_invoice_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn remove_invoice(&self, r_hash: &str) -> ClientResult<()> {
        self.record(ClientCall::RemoveInvoice(r_hash.to_string()));
        Ok(())
    }

    async fn settle_invoice(&self, r_hash: &str, r_preimage: &str) -> ClientResult<()> {
        self.record(ClientCall::SettleInvoice {
            r_hash: r_hash.to_string(),
            r_preimage: r_preimage.to_string(),
        });
        match self.behavior().settle_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn send_payment(&self, deal: &SwapDeal) -> ClientResult<String> {
        self.record(ClientCall::SendPayment(deal.r_hash.clone()));
        let gate = self.payment_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let behavior = self.behavior();
        match behavior.send_payment_error {
            Some(err) => Err(err),
            None => Ok(deal.r_preimage.clone().unwrap_or(behavior.preimage)),
        }
    }

    async fn send_smallest_amount(
        &self,
        r_hash: &str,
        destination: &str,
        _currency: &str,
    ) -> ClientResult<String> {
        self.record(ClientCall::SendSmallestAmount {
            r_hash: r_hash.to_string(),
            destination: destination.to_string(),
        });
        let behavior = self.behavior();
        match behavior.send_smallest_error {
            Some(err) => Err(err),
            None => Ok(behavior.preimage),
        }
    }

    async fn get_route(
        &self,
        units: u128,
        destination: &str,
        _currency: &str,
        final_cltv_delta: Option<u64>,
    ) -> ClientResult<Option<Route>> {
        self.record(ClientCall::GetRoute {
            units,
            destination: destination.to_string(),
            final_cltv_delta,
        });
        self.behavior().route
    }

    async fn get_height(&self) -> ClientResult<u64> {
        self.behavior().height
    }

    async fn lookup_payment(&self, r_hash: &str, _currency: &str) -> ClientResult<PaymentStatus> {
        self.record(ClientCall::LookupPayment(r_hash.to_string()));
        self.behavior().lookup
    }
}

// ---- peers ----

pub struct MockPeer {
    pub_key: String,
    acks_sanity_swaps: AtomicBool,
    send_error: Mutex<Option<PeerError>>,
    sent: Mutex<Vec<Packet>>,
    deactivated: Mutex<Vec<String>>,
}

impl MockPeer {
    pub fn new(pub_key: &str) -> Arc<Self> {
        Arc::new(Self {
            pub_key: pub_key.to_string(),
            acks_sanity_swaps: AtomicBool::new(true),
            send_error: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            deactivated: Mutex::new(Vec::new()),
        })
    }

    pub fn set_acks_sanity_swaps(&self, acks: bool) {
        self.acks_sanity_swaps.store(acks, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, err: PeerError) {
        *self.send_error.lock().unwrap() = Some(err);
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, packet_type: PacketType) -> Vec<Packet> {
        self.sent()
            .into_iter()
            .filter(|packet| packet.packet_type() == packet_type)
            .collect()
    }

    pub fn deactivated(&self) -> Vec<String> {
        self.deactivated.lock().unwrap().clone()
    }

    /// Waits for the first `SwapRequest` we sent and returns it with its id.
    pub async fn next_swap_request(&self) -> (String, SwapRequest) {
        let peer = self;
        let found =
            eventually(move || async move { !peer.sent_of(PacketType::SwapRequest).is_empty() })
                .await;
        assert!(found, "no swap request was sent");
        let packet = self.sent_of(PacketType::SwapRequest).remove(0);
        match packet.body {
            PacketBody::SwapRequest(request) => (packet.header.id, request),
            other => panic!("unexpected packet body {other:?}"),
        }
    }
}

#[async_trait]
impl Peer for MockPeer {
    fn node_pub_key(&self) -> String {
        self.pub_key.clone()
    }

    fn get_identifier(&self, _client_type: SwapClientType, currency: &str) -> Option<String> {
        Some(format!("{}-{}", self.pub_key, currency.to_lowercase()))
    }

    async fn deactivate_pair(&self, pair_id: &str) {
        self.deactivated.lock().unwrap().push(pair_id.to_string());
    }

    async fn send_packet(&self, packet: Packet) -> PeerResult<()> {
        if let Some(err) = self.send_error.lock().unwrap().clone() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }

    async fn wait_for_response(
        &self,
        req_id: &str,
        packet_type: PacketType,
        timeout: Duration,
    ) -> PeerResult<Packet> {
        if packet_type == PacketType::SanitySwapAck && self.acks_sanity_swaps.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
            return Ok(Packet::response(PacketBody::SanitySwapAck, req_id));
        }
        tokio::time::sleep(timeout).await;
        Err(PeerError::ResponseTimeout(req_id.to_string()))
    }
}

#[derive(Default)]
pub struct MockPool {
    peers: Mutex<HashMap<String, PeerRef>>,
}

impl MockPool {
    pub fn add(&self, peer: PeerRef) {
        self.peers
            .lock()
            .unwrap()
            .insert(peer.node_pub_key(), peer);
    }

    pub fn remove(&self, node_pub_key: &str) {
        self.peers.lock().unwrap().remove(node_pub_key);
    }
}

impl PeerPool for MockPool {
    fn get_peer(&self, node_pub_key: &str) -> Option<PeerRef> {
        self.peers.lock().unwrap().get(node_pub_key).cloned()
    }
}

// ---- store ----

/// The harness store as the engine sees it, with switchable write failures.
pub struct MockStore {
    inner: InMemoryDealStore,
    reject_completed: AtomicBool,
}

impl MockStore {
    pub fn new(inner: InMemoryDealStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            reject_completed: AtomicBool::new(false),
        })
    }

    /// Makes every save of a completed deal fail.
    pub fn reject_completed_saves(&self) {
        self.reject_completed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DealStore for MockStore {
    async fn save_deal(&self, deal: SwapDeal) -> xswap::error::Result<()> {
        if deal.state == SwapState::Completed && self.reject_completed.load(Ordering::SeqCst) {
            return Err(SwapError::Config("disk full".to_string()));
        }
        self.inner.save_deal(deal).await
    }

    async fn get_deal(&self, r_hash: &str) -> xswap::error::Result<Option<SwapDeal>> {
        self.inner.get_deal(r_hash).await
    }

    async fn all_deals(&self) -> xswap::error::Result<Vec<SwapDeal>> {
        self.inner.all_deals().await
    }
}

// ---- reputation and recovery ----

#[derive(Default)]
pub struct MockReputation {
    events: Mutex<Vec<(String, ReputationEvent)>>,
}

impl MockReputation {
    pub fn events_for(&self, node_pub_key: &str) -> Vec<ReputationEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(node, _)| node == node_pub_key)
            .map(|(_, event)| *event)
            .collect()
    }
}

#[async_trait]
impl ReputationSink for MockReputation {
    async fn add_reputation_event(&self, node_pub_key: &str, event: ReputationEvent) {
        self.events
            .lock()
            .unwrap()
            .push((node_pub_key.to_string(), event));
    }
}

#[derive(Default)]
pub struct MockRecovery {
    started: AtomicBool,
    pending: Mutex<HashMap<String, SwapDeal>>,
    recovered: Mutex<HashMap<String, SwapDeal>>,
}

impl MockRecovery {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn pending_deal(&self, r_hash: &str) -> Option<SwapDeal> {
        self.pending.lock().unwrap().get(r_hash).cloned()
    }

    /// Parks a deal as if its preimage had been recovered.
    pub fn park_recovered(&self, deal: SwapDeal) {
        self.recovered
            .lock()
            .unwrap()
            .insert(deal.r_hash.clone(), deal);
    }
}

#[async_trait]
impl RecoveryTracker for MockRecovery {
    async fn start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
    }

    async fn recover_deal(&self, deal: SwapDeal) {
        self.pending
            .lock()
            .unwrap()
            .insert(deal.r_hash.clone(), deal);
    }

    async fn is_pending(&self, r_hash: &str) -> bool {
        self.pending.lock().unwrap().contains_key(r_hash)
    }

    async fn pending_hashes(&self) -> Vec<String> {
        self.pending.lock().unwrap().keys().cloned().collect()
    }

    async fn take_recovered(&self, r_hash: &str) -> Option<SwapDeal> {
        self.recovered.lock().unwrap().remove(r_hash)
    }
}

// ---- harness ----

/// An engine wired to mocks: Lightning-style BTC and LTC clients, a
/// token-network WETH client and one connected peer.
pub struct Harness {
    pub engine: SwapEngine,
    pub config: EngineConfig,
    pub btc: Arc<MockClient>,
    pub ltc: Arc<MockClient>,
    pub weth: Arc<MockClient>,
    pub peer: Arc<MockPeer>,
    pub pool: Arc<MockPool>,
    pub store: InMemoryDealStore,
    pub deal_store: Arc<MockStore>,
    pub reputation: Arc<MockReputation>,
    pub recovery: Arc<MockRecovery>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(config, InMemoryDealStore::new())
    }

    pub fn with_store(config: EngineConfig, store: InMemoryDealStore) -> Self {
        let btc = MockClient::new(SwapClientType::Lnd, 40, 10.0);
        let ltc = MockClient::new(SwapClientType::Lnd, 40, 2.5);
        let weth = MockClient::new(SwapClientType::Raiden, 100, 0.25);
        let peer = MockPeer::new(PEER_KEY);
        let pool = Arc::new(MockPool::default());
        pool.add(peer.clone());
        let reputation = Arc::new(MockReputation::default());
        let recovery = Arc::new(MockRecovery::default());
        let deal_store = MockStore::new(store.clone());

        let engine = SwapEngine::new(
            config.clone(),
            clients(&btc, &ltc, &weth),
            pool.clone(),
            deal_store.clone(),
            reputation.clone(),
            recovery.clone(),
        );

        Self {
            engine,
            config,
            btc,
            ltc,
            weth,
            peer,
            pool,
            store,
            deal_store,
            reputation,
            recovery,
        }
    }

    pub fn peer_ref(&self) -> PeerRef {
        self.peer.clone()
    }

    pub fn reputation_events(&self) -> Vec<ReputationEvent> {
        self.reputation.events_for(PEER_KEY)
    }
}

pub fn clients(btc: &Arc<MockClient>, ltc: &Arc<MockClient>, weth: &Arc<MockClient>) -> CurrencyClients {
    let mut clients: CurrencyClients = HashMap::new();
    clients.insert("BTC".to_string(), btc.clone());
    clients.insert("LTC".to_string(), ltc.clone());
    clients.insert("WETH".to_string(), weth.clone());
    clients
}

// ---- orders ----

/// A maker order selling `quantity` LTC for BTC.
pub fn maker_order(quantity: u64, price: Decimal) -> PeerOrder {
    PeerOrder {
        id: "maker-order".to_string(),
        pair_id: "LTC/BTC".to_string(),
        price,
        quantity,
        is_buy: false,
        peer_pub_key: PEER_KEY.to_string(),
    }
}

pub fn taker_order(quantity: u64, price: Decimal) -> OwnOrder {
    OwnOrder {
        local_id: "taker-local".to_string(),
        pair_id: "LTC/BTC".to_string(),
        price,
        quantity,
        is_buy: true,
    }
}

pub fn order_to_accept(quantity: u64, price: Decimal, is_buy: bool) -> OrderToAccept {
    OrderToAccept {
        local_id: "maker-local".to_string(),
        price,
        quantity,
        is_buy,
    }
}

pub fn swap_request(r_hash: &str, pair_id: &str, proposed_quantity: u64) -> SwapRequest {
    SwapRequest {
        r_hash: r_hash.to_string(),
        taker_cltv_delta: 40,
        order_id: "maker-order".to_string(),
        pair_id: pair_id.to_string(),
        proposed_quantity,
    }
}

/// A maker deal on LTC/BTC as it would have been persisted.
pub fn stored_deal(r_hash: &str, phase: SwapPhase, state: SwapState) -> SwapDeal {
    SwapDeal {
        r_hash: r_hash.to_string(),
        r_preimage: None,
        role: SwapRole::Maker,
        phase,
        state,
        pair_id: "LTC/BTC".to_string(),
        order_id: "maker-order".to_string(),
        local_id: "maker-local".to_string(),
        proposed_quantity: 100,
        quantity: 100,
        price: dec!(0.5),
        is_buy: false,
        maker_currency: "BTC".to_string(),
        taker_currency: "LTC".to_string(),
        maker_amount: 50,
        taker_amount: 100,
        maker_units: 50,
        taker_units: 100,
        taker_cltv_delta: 40,
        maker_cltv_delta: Some(150),
        taker_max_time_lock: Some(240),
        destination: Some(format!("{PEER_KEY}-ltc")),
        peer_pub_key: PEER_KEY.to_string(),
        create_time: 1,
        execute_time: None,
        complete_time: None,
        failure_reason: match state {
            SwapState::Error => Some(SwapFailureReason::RemoteError),
            _ => None,
        },
        error_message: None,
    }
}

/// Drains every event currently queued on the engine's event channel.
pub fn drain_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SwapEvent>) -> Vec<SwapEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn hashes(deals: &[SwapDeal]) -> HashSet<String> {
    deals.iter().map(|deal| deal.r_hash.clone()).collect()
}
