//! Application layer: the swap engine and the services it schedules.
//!
//! `SwapEngine` owns every piece of mutable swap state. Deal and sanity swap
//! timeouts are spawned `tokio` tasks tracked in [`timers::DealTimers`], and
//! deals with an unknown payment outcome are handed to a recovery tracker such
//! as [`recovery::SwapRecovery`].

pub mod engine;
pub mod recovery;
pub mod timers;
