//! Durable low-latency pub/sub receiver core.
//!
//! Three cooperating threads move every message: the receive thread copies
//! each wire fragment into a pooled slot and hands the pointer to the worker
//! over a lock-free SPSC ring; the worker validates, deduplicates, and
//! dispatches; monitoring and checkpointing run best-effort on the side. A
//! replay-merge engine joins archived history to the live stream on one
//! logical subscription at startup.

pub mod core;
pub mod monitor;
pub mod receiver;
pub mod stream;
pub mod transport;
pub mod worker;

pub use crate::core::*;
