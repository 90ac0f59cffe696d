pub mod amounts;
pub mod deal;
pub mod lock;
pub mod order;
pub mod packets;
pub mod ports;
pub mod preimage;
