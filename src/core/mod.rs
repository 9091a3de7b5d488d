//! Core data structures of the receive pipeline: wire format, buffer pool,
//! SPSC rings, dedup structures, and the checkpoint manager.

pub mod checkpoint;
pub mod clock;
pub mod dedup;
pub mod error;
pub mod pool;
pub mod ring;
pub mod slot;
pub mod wire;

pub use checkpoint::{
    CheckpointManager, CheckpointSnapshot, CheckpointStats, DEFAULT_FLUSH_INTERVAL,
};
pub use clock::{Clock, MonotonicClock, WallClock};
pub use dedup::{DedupWindow, SeenSet, DEFAULT_DEDUP_WINDOW, DEFAULT_SEEN_SET_CAP};
pub use error::{Error, Result};
pub use pool::{
    BufferPool, PoolStats, DEFAULT_POOL_CAPACITY, LARGE_POOL_CAPACITY, SMALL_POOL_CAPACITY,
};
pub use ring::{
    spsc_ring, Consumer, Producer, RingStats, DEFAULT_RING_CAPACITY, DEFAULT_STATS_RING_CAPACITY,
};
pub use slot::{MessageSlot, SlotPtr};
pub use wire::{MessageHeader, MessageType, HEADER_SIZE, MAX_PAYLOAD_LEN, MAX_WIRE_SIZE};
