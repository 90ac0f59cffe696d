use super::deal::{SwapClientType, SwapDeal};
use super::packets::{Packet, PacketType};
use crate::error::{ClientResult, PeerResult, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Absolute block height at which the route's first hop expires.
    pub total_time_lock: u64,
}

/// What a payment network knows about an outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Succeeded(String),
    Failed,
    Pending,
}

/// A client for a single payment network.
#[async_trait]
pub trait CurrencyClient: Send + Sync {
    fn client_type(&self) -> SwapClientType;
    fn is_connected(&self) -> bool;
    /// Minimum lock delta, in blocks, this client requires on the final hop.
    fn final_lock(&self) -> u64;
    fn minutes_per_block(&self) -> f64;

    /// Opens a hold invoice that only settles once we reveal the preimage.
    async fn add_invoice(&self, r_hash: &str, units: u128, cltv_expiry: Option<u64>)
    -> ClientResult<()>;
    async fn remove_invoice(&self, r_hash: &str) -> ClientResult<()>;
    async fn settle_invoice(&self, r_hash: &str, r_preimage: &str) -> ClientResult<()>;
    /// Pays the outbound leg of `deal` and returns the revealed preimage.
    async fn send_payment(&self, deal: &SwapDeal) -> ClientResult<String>;
    async fn send_smallest_amount(
        &self,
        r_hash: &str,
        destination: &str,
        currency: &str,
    ) -> ClientResult<String>;
    async fn get_route(
        &self,
        units: u128,
        destination: &str,
        currency: &str,
        final_cltv_delta: Option<u64>,
    ) -> ClientResult<Option<Route>>;
    async fn get_height(&self) -> ClientResult<u64>;
    async fn lookup_payment(&self, r_hash: &str, currency: &str) -> ClientResult<PaymentStatus>;
}

/// A connected remote node speaking the swap protocol.
#[async_trait]
pub trait Peer: Send + Sync {
    fn node_pub_key(&self) -> String;
    /// The peer's address on the network used for `currency`.
    fn get_identifier(&self, client_type: SwapClientType, currency: &str) -> Option<String>;
    async fn deactivate_pair(&self, pair_id: &str);
    async fn send_packet(&self, packet: Packet) -> PeerResult<()>;
    async fn wait_for_response(
        &self,
        req_id: &str,
        packet_type: PacketType,
        timeout: Duration,
    ) -> PeerResult<Packet>;
}

pub trait PeerPool: Send + Sync {
    fn get_peer(&self, node_pub_key: &str) -> Option<PeerRef>;
}

#[async_trait]
pub trait DealStore: Send + Sync {
    async fn save_deal(&self, deal: SwapDeal) -> Result<()>;
    async fn get_deal(&self, r_hash: &str) -> Result<Option<SwapDeal>>;
    async fn all_deals(&self) -> Result<Vec<SwapDeal>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReputationEvent {
    ManualBan,
    ManualUnban,
    PacketTimeout,
    WireProtocolErr,
    InvalidAuth,
    SwapSuccess,
    SwapFailure,
    SwapTimeout,
    SwapMisbehavior,
}

#[async_trait]
pub trait ReputationSink: Send + Sync {
    async fn add_reputation_event(&self, node_pub_key: &str, event: ReputationEvent);
}

/// Tracks deals whose outcome could not be determined by the engine.
#[async_trait]
pub trait RecoveryTracker: Send + Sync {
    async fn start(&self);
    async fn stop(&self);
    async fn recover_deal(&self, deal: SwapDeal);
    async fn is_pending(&self, r_hash: &str) -> bool;
    async fn pending_hashes(&self) -> Vec<String>;
    /// Removes and returns a deal whose preimage was recovered but not yet
    /// handed to a resolve request.
    async fn take_recovered(&self, r_hash: &str) -> Option<SwapDeal>;
}

pub type CurrencyClientRef = Arc<dyn CurrencyClient>;
pub type CurrencyClients = HashMap<String, CurrencyClientRef>;
pub type PeerRef = Arc<dyn Peer>;
pub type PeerPoolRef = Arc<dyn PeerPool>;
pub type DealStoreRef = Arc<dyn DealStore>;
pub type ReputationSinkRef = Arc<dyn ReputationSink>;
pub type RecoveryTrackerRef = Arc<dyn RecoveryTracker>;
