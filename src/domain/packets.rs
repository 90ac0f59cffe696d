use super::deal::SwapFailureReason;
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    pub id: String,
    /// Id of the request this packet answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketType {
    SwapRequest,
    SwapAccepted,
    SwapComplete,
    SwapFailed,
    SanitySwapInit,
    SanitySwapAck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub r_hash: String,
    pub taker_cltv_delta: u64,
    pub order_id: String,
    pub pair_id: String,
    pub proposed_quantity: u64,
}

impl SwapRequest {
    /// Hashes must be lower-case hex so one 32-byte hash has one spelling.
    pub fn validate(&self) -> bool {
        self.proposed_quantity > 0
            && self.r_hash.len() == 64
            && self
                .r_hash
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapAccepted {
    pub r_hash: String,
    pub maker_cltv_delta: u64,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapComplete {
    pub r_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFailed {
    pub r_hash: String,
    pub failure_reason: SwapFailureReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitySwapInit {
    pub currency: String,
    pub r_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body")]
pub enum PacketBody {
    SwapRequest(SwapRequest),
    SwapAccepted(SwapAccepted),
    SwapComplete(SwapComplete),
    SwapFailed(SwapFailed),
    SanitySwapInit(SanitySwapInit),
    SanitySwapAck,
}

impl PacketBody {
    pub fn packet_type(&self) -> PacketType {
        match self {
            PacketBody::SwapRequest(_) => PacketType::SwapRequest,
            PacketBody::SwapAccepted(_) => PacketType::SwapAccepted,
            PacketBody::SwapComplete(_) => PacketType::SwapComplete,
            PacketBody::SwapFailed(_) => PacketType::SwapFailed,
            PacketBody::SanitySwapInit(_) => PacketType::SanitySwapInit,
            PacketBody::SanitySwapAck => PacketType::SanitySwapAck,
        }
    }
}

/// A peer protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: PacketBody,
}

impl Packet {
    /// Builds a packet with a fresh random id.
    pub fn new(body: PacketBody) -> Self {
        Self {
            header: PacketHeader {
                id: random_id(),
                req_id: None,
            },
            body,
        }
    }

    /// Builds a packet answering the request with id `req_id`.
    pub fn response(body: PacketBody, req_id: impl Into<String>) -> Self {
        let mut packet = Self::new(body);
        packet.header.req_id = Some(req_id.into());
        packet
    }

    pub fn packet_type(&self) -> PacketType {
        self.body.packet_type()
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(r_hash: &str, proposed_quantity: u64) -> SwapRequest {
        SwapRequest {
            r_hash: r_hash.to_string(),
            taker_cltv_delta: 40,
            order_id: "order".to_string(),
            pair_id: "LTC/BTC".to_string(),
            proposed_quantity,
        }
    }

    #[test]
    fn test_swap_request_validation() {
        assert!(request(&"a".repeat(64), 1).validate());
        assert!(!request(&"a".repeat(64), 0).validate());
        assert!(!request(&"a".repeat(63), 1).validate());
        assert!(!request(&"z".repeat(64), 1).validate());
        assert!(!request(&"A".repeat(64), 1).validate());
    }

    #[test]
    fn test_response_carries_request_id() {
        let request = Packet::new(PacketBody::SanitySwapInit(SanitySwapInit {
            currency: "BTC".to_string(),
            r_hash: "a".repeat(64),
        }));
        let response = Packet::response(PacketBody::SanitySwapAck, request.header.id.clone());

        assert_eq!(response.header.req_id, Some(request.header.id.clone()));
        assert_ne!(response.header.id, request.header.id);
        assert_eq!(response.packet_type(), PacketType::SanitySwapAck);
    }

    #[test]
    fn test_packet_json_shape() {
        let packet = Packet::response(
            PacketBody::SwapFailed(SwapFailed {
                r_hash: "a".repeat(64),
                failure_reason: SwapFailureReason::DealTimedOut,
                error_message: None,
            }),
            "req",
        );
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(value["body"]["type"], "SwapFailed");
        assert_eq!(value["body"]["body"]["failure_reason"], "DealTimedOut");
        assert!(value["body"]["body"].get("error_message").is_none());
    }
}
