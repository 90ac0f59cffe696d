use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A remote maker order a swap is executed against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerOrder {
    pub id: String,
    pub pair_id: String,
    pub price: Decimal,
    pub quantity: u64,
    pub is_buy: bool,
    pub peer_pub_key: String,
}

/// Our own taker order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnOrder {
    pub local_id: String,
    pub pair_id: String,
    pub price: Decimal,
    pub quantity: u64,
    pub is_buy: bool,
}

/// The part of our own resting order a maker accepts a swap request against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderToAccept {
    pub local_id: String,
    pub price: Decimal,
    pub quantity: u64,
    pub is_buy: bool,
}
