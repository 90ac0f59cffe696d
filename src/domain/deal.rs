use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapClientType {
    /// Lightning-style client that settles hold invoices itself.
    Lnd,
    /// Token-network client that asks us to resolve hashes on demand.
    Raiden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapRole {
    Taker,
    Maker,
}

/// Position of a deal in the swap state machine.
///
/// The declaration order is the order phases are passed through; the
/// allowed moves between them are defined by [`SwapPhase::validate_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SwapPhase {
    SwapCreated,
    /// Taker only: the swap request was sent to the maker.
    SwapRequested,
    /// Maker only: the maker accepted the request and added its invoice.
    SwapAccepted,
    SendingPayment,
    PaymentReceived,
    SwapCompleted,
}

impl SwapPhase {
    /// Returns `true` if a deal in `role` may move from `from` to `to`.
    pub fn validate_transition(role: SwapRole, from: SwapPhase, to: SwapPhase) -> bool {
        match to {
            SwapPhase::SwapCreated => false,
            SwapPhase::SwapRequested => role == SwapRole::Taker && from == SwapPhase::SwapCreated,
            SwapPhase::SwapAccepted => role == SwapRole::Maker && from == SwapPhase::SwapCreated,
            SwapPhase::SendingPayment => match role {
                SwapRole::Taker => from == SwapPhase::SwapRequested,
                SwapRole::Maker => from == SwapPhase::SwapAccepted,
            },
            SwapPhase::PaymentReceived => from == SwapPhase::SendingPayment,
            SwapPhase::SwapCompleted => from == SwapPhase::PaymentReceived,
        }
    }

    /// Deals are written to the store once they move past these phases.
    pub fn is_initial(self) -> bool {
        matches!(self, SwapPhase::SwapCreated | SwapPhase::SwapRequested)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapState {
    Active,
    Error,
    Completed,
    /// Resolved out-of-band by the recovery tracker after a crash or an
    /// ambiguous payment result.
    Recovered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapFailureReason {
    /// Could not find a route to the destination.
    NoRouteFound,
    /// A swap client call failed unexpectedly.
    UnexpectedClientError,
    /// The counterparty did not accept the swap in time.
    DealTimedOut,
    /// The swap did not complete in time.
    SwapTimedOut,
    SwapClientNotSetup,
    InvalidSwapPacketReceived,
    PaymentHashReuse,
    /// The failure originated on the counterparty's side.
    RemoteError,
    SendPaymentFailure,
    InvalidResolveRequest,
    UnknownError,
}

/// The unit of work of the swap engine, keyed by its payment hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapDeal {
    /// Hex-encoded SHA-256 payment hash.
    pub r_hash: String,
    /// Hex-encoded preimage, known by the taker from creation and by the maker
    /// once its payment to the taker succeeds.
    pub r_preimage: Option<String>,
    pub role: SwapRole,
    pub phase: SwapPhase,
    pub state: SwapState,
    pub pair_id: String,
    /// Id of the maker order being filled.
    pub order_id: String,
    /// Local id of our own order.
    pub local_id: String,
    pub proposed_quantity: u64,
    pub quantity: u64,
    pub price: Decimal,
    /// Whether the maker order is a buy.
    pub is_buy: bool,
    pub maker_currency: String,
    pub taker_currency: String,
    pub maker_amount: u64,
    pub taker_amount: u64,
    pub maker_units: u128,
    pub taker_units: u128,
    pub taker_cltv_delta: u64,
    pub maker_cltv_delta: Option<u64>,
    pub taker_max_time_lock: Option<u64>,
    /// The counterparty's network identifier for the leg we pay.
    pub destination: Option<String>,
    pub peer_pub_key: String,
    pub create_time: u64,
    pub execute_time: Option<u64>,
    pub complete_time: Option<u64>,
    pub failure_reason: Option<SwapFailureReason>,
    pub error_message: Option<String>,
}

impl SwapDeal {
    /// Appends an error message, keeping earlier ones.
    pub fn append_error(&mut self, message: &str) {
        self.error_message = Some(match self.error_message.take() {
            Some(existing) => format!("{existing}; {message}"),
            None => message.to_string(),
        });
    }

    /// The currency we receive in this deal.
    pub fn inbound_currency(&self) -> &str {
        match self.role {
            SwapRole::Maker => &self.maker_currency,
            SwapRole::Taker => &self.taker_currency,
        }
    }

    /// The currency we pay in this deal.
    pub fn outbound_currency(&self) -> &str {
        match self.role {
            SwapRole::Maker => &self.taker_currency,
            SwapRole::Taker => &self.maker_currency,
        }
    }
}

/// Reported to the order-matching layer once a deal completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapSuccess {
    pub order_id: String,
    pub local_id: String,
    pub pair_id: String,
    pub quantity: u64,
    pub amount_received: u64,
    pub amount_sent: u64,
    pub currency_received: String,
    pub currency_sent: String,
    pub r_hash: String,
    pub r_preimage: Option<String>,
    pub price: Decimal,
    pub peer_pub_key: String,
    pub role: SwapRole,
}

impl From<&SwapDeal> for SwapSuccess {
    fn from(deal: &SwapDeal) -> Self {
        let was_maker = deal.role == SwapRole::Maker;
        Self {
            order_id: deal.order_id.clone(),
            local_id: deal.local_id.clone(),
            pair_id: deal.pair_id.clone(),
            quantity: deal.quantity,
            amount_received: if was_maker { deal.maker_amount } else { deal.taker_amount },
            amount_sent: if was_maker { deal.taker_amount } else { deal.maker_amount },
            currency_received: deal.inbound_currency().to_string(),
            currency_sent: deal.outbound_currency().to_string(),
            r_hash: deal.r_hash.clone(),
            r_preimage: deal.r_preimage.clone(),
            price: deal.price,
            peer_pub_key: deal.peer_pub_key.clone(),
            role: deal.role,
        }
    }
}

/// Outcome notifications for the order-matching layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SwapEvent {
    Paid(SwapSuccess),
    Failed {
        deal: SwapDeal,
        reason: SwapFailureReason,
    },
}

/// An in-flight sanity swap for a single currency. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitySwap {
    pub r_hash: String,
    pub currency: String,
    pub peer_pub_key: String,
    /// Only known by the side that initiated the sanity swap.
    pub r_preimage: Option<String>,
}

/// An inbound claim from a token-network client asking for a preimage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub r_hash: String,
    pub amount: u128,
    pub token_address: String,
    pub expiration: u64,
    pub chain_height: u64,
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
