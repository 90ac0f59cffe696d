use crate::domain::deal::{SwapFailureReason, SwapPhase, SwapRole};
use thiserror::Error;

/// Errors raised by a currency client (one per payment network).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The counterparty rejected our payment, so they already know the swap failed.
    #[error("payment rejected by counterparty: {0}")]
    PaymentRejected(String),
    /// The payment may or may not have gone through.
    #[error("payment status unknown: {0}")]
    UnknownPayment(String),
    #[error("payment failed: {0}")]
    PaymentFailed(String),
    #[error("client is not connected")]
    Disconnected,
    #[error("unexpected client error: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PeerError {
    #[error("timed out waiting for response to packet {0}")]
    ResponseTimeout(String),
    #[error("unexpected response to packet {0}")]
    UnexpectedResponse(String),
    #[error("peer {0} is not connected")]
    Disconnected(String),
    #[error("could not send packet: {0}")]
    Send(String),
}

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    Storage(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("deal {r_hash} can not move from {from:?} to {to:?} as {role:?}")]
    InvalidPhaseTransition {
        r_hash: String,
        role: SwapRole,
        from: SwapPhase,
        to: SwapPhase,
    },
    #[error("deal {0} is not active")]
    DealNotActive(String),
    #[error("deal {0} is completed and can not fail")]
    DealCompleted(String),
    #[error("deal {0} not found")]
    DealNotFound(String),
    #[error("swap failed: {0:?}")]
    SwapFailed(SwapFailureReason),

    #[error("payment hash {0} not found")]
    PaymentHashNotFound(String),
    #[error("payment for hash {0} is pending recovery")]
    PaymentPending(String),
    #[error("invalid resolve request for hash {0}: {1}")]
    InvalidResolveRequest(String, String),
    #[error("incoming htlc currency {received} does not match expected {expected}")]
    CurrencyMismatch { expected: String, received: String },
    #[error("sanity swaps must be for exactly 1 unit, got {0}")]
    InvalidSanitySwapAmount(u128),
    #[error("preimage for hash {0} is unknown")]
    MissingPreimage(String),

    #[error("unsupported currency {0}")]
    UnsupportedCurrency(String),
    #[error("invalid pair id {0}")]
    InvalidPairId(String),
    #[error("amount overflow for {0}")]
    AmountOverflow(String),

    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Peer(#[from] PeerError),
}

pub type Result<T> = std::result::Result<T, SwapError>;
pub type ClientResult<T> = std::result::Result<T, ClientError>;
pub type PeerResult<T> = std::result::Result<T, PeerError>;
