use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::checkpoint::{CheckpointManager, DEFAULT_FLUSH_INTERVAL};
use crate::core::clock::{Clock, MonotonicClock};
use crate::core::dedup::{DedupWindow, DEFAULT_DEDUP_WINDOW};
use crate::core::pool::{BufferPool, DEFAULT_POOL_CAPACITY};
use crate::core::ring::{spsc_ring, Consumer, Producer, DEFAULT_RING_CAPACITY};
use crate::core::slot::SlotPtr;
use crate::core::Result;

pub const DEFAULT_GAP_TOLERANCE: u64 = 5;
pub const DEFAULT_FRAGMENT_LIMIT: usize = 10;

/// Durable-progress settings. The checkpoint file lives at `path`; writes go
/// to `<path>.tmp` and are renamed into place.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub flush_interval: Duration,
}

impl CheckpointConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReceiverConfig {
    pub pool_capacity: usize,
    pub ring_capacity: usize,
    pub gap_tolerance: u64,
    pub duplicate_check: bool,
    pub dedup_window: usize,
    pub checkpoint: Option<CheckpointConfig>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            ring_capacity: DEFAULT_RING_CAPACITY,
            gap_tolerance: DEFAULT_GAP_TOLERANCE,
            duplicate_check: true,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            checkpoint: None,
        }
    }
}

/// Asks the archive/replay collaborator to recover a missing sequence range.
/// Implementations must not block: queue a request or fire an async RPC.
pub trait RecoveryTrigger: Send {
    fn request_replay(&mut self, first_missing: u64, last_missing: u64);
}

/// Receive-path counters, shared so monitors can snapshot them while the
/// receive thread runs.
#[derive(Default)]
pub struct ReceiverCounters {
    pub messages_received: AtomicU64,
    pub allocation_failures: AtomicU64,
    pub queue_full_failures: AtomicU64,
    pub gaps_detected: AtomicU64,
    pub missing_messages: AtomicU64,
    pub duplicates_detected: AtomicU64,
    pub replay_messages: AtomicU64,
    pub live_messages: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReceiverStats {
    pub messages_received: u64,
    pub allocation_failures: u64,
    pub queue_full_failures: u64,
    pub gaps_detected: u64,
    pub missing_messages: u64,
    pub duplicates_detected: u64,
    pub replay_messages: u64,
    pub live_messages: u64,
}

impl ReceiverCounters {
    pub fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            queue_full_failures: self.queue_full_failures.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
            missing_messages: self.missing_messages.load(Ordering::Relaxed),
            duplicates_detected: self.duplicates_detected.load(Ordering::Relaxed),
            replay_messages: self.replay_messages.load(Ordering::Relaxed),
            live_messages: self.live_messages.load(Ordering::Relaxed),
        }
    }
}

/// The receive fast path.
///
/// `on_fragment` is the entire per-message work of the receive thread:
/// timestamp, acquire, copy, gap/dup policy, enqueue, checkpoint update.
/// Nothing here blocks, allocates, or logs at info level; every failure is a
/// counter.
pub struct Receiver<C: Clock = MonotonicClock> {
    pool: Arc<BufferPool>,
    producer: Producer<SlotPtr>,
    dedup: DedupWindow,
    /// Next expected sequence; zero means no baseline yet.
    expected: u64,
    gap_tolerance: u64,
    duplicate_check: bool,
    checkpoint: Option<CheckpointManager>,
    recovery: Option<Box<dyn RecoveryTrigger>>,
    counters: Arc<ReceiverCounters>,
    merging: bool,
    clock: C,
}

impl Receiver<MonotonicClock> {
    /// Builds the pool, the pointer ring, and (optionally) the checkpoint
    /// manager. Returns the receiver and the worker-side ring endpoint.
    pub fn new(config: ReceiverConfig) -> Result<(Self, Consumer<SlotPtr>)> {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> Receiver<C> {
    pub fn with_clock(config: ReceiverConfig, clock: C) -> Result<(Self, Consumer<SlotPtr>)> {
        let pool = Arc::new(BufferPool::new(config.pool_capacity)?);
        let (producer, consumer) = spsc_ring::<SlotPtr>(config.ring_capacity)?;
        let checkpoint = config
            .checkpoint
            .as_ref()
            .map(|cp| CheckpointManager::new(&cp.path, cp.flush_interval));

        let receiver = Self {
            pool,
            producer,
            dedup: DedupWindow::new(config.dedup_window),
            expected: 0,
            gap_tolerance: config.gap_tolerance,
            duplicate_check: config.duplicate_check,
            checkpoint,
            recovery: None,
            counters: Arc::new(ReceiverCounters::default()),
            merging: false,
            clock,
        };
        Ok((receiver, consumer))
    }

    pub fn set_recovery_trigger(&mut self, trigger: Box<dyn RecoveryTrigger>) {
        self.recovery = Some(trigger);
    }

    /// The pool backing this receiver; the worker releases slots into it.
    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.pool)
    }

    pub fn counters(&self) -> Arc<ReceiverCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot()
    }

    pub fn checkpoint_manager(&self) -> Option<&CheckpointManager> {
        self.checkpoint.as_ref()
    }

    /// Flags whether fragments are currently arriving through a replay merge;
    /// drives the replay/live split in the stats.
    pub fn set_merging(&mut self, merging: bool) {
        self.merging = merging;
    }

    /// Handles one wire fragment from the transport.
    pub fn on_fragment(&mut self, fragment: &[u8], position: i64) {
        let recv_time_ns = self.clock.now();

        let Some(mut slot) = self.pool.acquire() else {
            self.counters
                .allocation_failures
                .fetch_add(1, Ordering::Relaxed);
            return;
        };

        {
            let slot = slot.get_mut();
            slot.copy_from_fragment(fragment);
            slot.header.recv_time_ns = recv_time_ns;
        }
        let seq = slot.get().header.sequence_number;

        if self.expected == 0 {
            // First message establishes the baseline; no gap possible.
        } else if seq < self.expected {
            // Late arrival (e.g. recovered message); never a gap.
        } else if seq > self.expected {
            let span = seq - self.expected;
            if span <= self.gap_tolerance {
                self.counters.gaps_detected.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .missing_messages
                    .fetch_add(span, Ordering::Relaxed);
                if let Some(trigger) = self.recovery.as_mut() {
                    trigger.request_replay(self.expected, seq - 1);
                }
            } else {
                self.counters
                    .missing_messages
                    .fetch_add(span, Ordering::Relaxed);
                log::warn!(
                    "sequence jump {} -> {} exceeds gap tolerance {}; treating as replay boundary",
                    self.expected,
                    seq,
                    self.gap_tolerance
                );
            }
        }

        if self.duplicate_check && self.dedup.contains(seq) {
            self.pool.release(slot);
            self.counters
                .duplicates_detected
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.expected = seq.wrapping_add(1);
        self.dedup.insert(seq);

        if !self.producer.enqueue(slot) {
            self.pool.release(slot);
            self.counters
                .queue_full_failures
                .fetch_add(1, Ordering::Relaxed);
            return;
        }

        let received = self
            .counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        if self.merging {
            self.counters.replay_messages.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.live_messages.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(checkpoint) = &self.checkpoint {
            checkpoint.update(seq as i64, position, received as i64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wire::{MessageHeader, MessageType, HEADER_SIZE};
    use std::sync::Mutex;

    fn frame(seq: u64) -> Vec<u8> {
        let mut header = MessageHeader {
            version: 1,
            message_type: MessageType::Test.as_u16(),
            sequence_number: seq,
            message_length: HEADER_SIZE as u32,
            ..MessageHeader::default()
        };
        header.set_magic();
        header.to_bytes().to_vec()
    }

    fn receiver(config: ReceiverConfig) -> (Receiver, Consumer<SlotPtr>) {
        Receiver::new(config).expect("receiver")
    }

    #[test]
    fn in_order_messages_flow_to_ring() {
        let (mut rx, mut consumer) = receiver(ReceiverConfig::default());
        for seq in 0..5 {
            rx.on_fragment(&frame(seq), seq as i64 * 64);
        }
        let stats = rx.stats();
        assert_eq!(stats.messages_received, 5);
        assert_eq!(stats.gaps_detected, 0);
        assert_eq!(stats.duplicates_detected, 0);

        let pool = rx.pool();
        for seq in 0..5 {
            let slot = consumer.dequeue().expect("slot");
            assert_eq!(slot.get().header.sequence_number, seq);
            pool.release(slot);
        }
    }

    #[test]
    fn gap_within_tolerance_fires_recovery_once() {
        struct Recorder(Arc<Mutex<Vec<(u64, u64)>>>);
        impl RecoveryTrigger for Recorder {
            fn request_replay(&mut self, first: u64, last: u64) {
                self.0.lock().unwrap().push((first, last));
            }
        }

        let requests = Arc::new(Mutex::new(Vec::new()));
        let (mut rx, mut consumer) = receiver(ReceiverConfig::default());
        rx.set_recovery_trigger(Box::new(Recorder(Arc::clone(&requests))));

        rx.on_fragment(&frame(0), 0);
        rx.on_fragment(&frame(1), 64);
        rx.on_fragment(&frame(5), 128);

        assert_eq!(rx.stats().gaps_detected, 1);
        assert_eq!(rx.stats().missing_messages, 3);
        assert_eq!(requests.lock().unwrap().as_slice(), &[(2, 4)]);

        let pool = rx.pool();
        while let Some(slot) = consumer.dequeue() {
            pool.release(slot);
        }
    }

    #[test]
    fn jump_beyond_tolerance_is_accepted_without_recovery() {
        struct Panicker;
        impl RecoveryTrigger for Panicker {
            fn request_replay(&mut self, _: u64, _: u64) {
                panic!("recovery must not fire beyond tolerance");
            }
        }

        let (mut rx, mut consumer) = receiver(ReceiverConfig {
            gap_tolerance: 5,
            ..ReceiverConfig::default()
        });
        rx.set_recovery_trigger(Box::new(Panicker));

        rx.on_fragment(&frame(0), 0);
        rx.on_fragment(&frame(100), 64);

        let stats = rx.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.gaps_detected, 0);
        assert_eq!(stats.missing_messages, 99);

        let pool = rx.pool();
        while let Some(slot) = consumer.dequeue() {
            pool.release(slot);
        }
    }

    #[test]
    fn duplicate_is_released_not_enqueued() {
        let (mut rx, mut consumer) = receiver(ReceiverConfig::default());
        rx.on_fragment(&frame(7), 0);
        rx.on_fragment(&frame(7), 64);

        let stats = rx.stats();
        assert_eq!(stats.messages_received, 1);
        assert_eq!(stats.duplicates_detected, 1);

        let pool = rx.pool();
        let slot = consumer.dequeue().expect("accepted copy");
        assert_eq!(slot.get().header.sequence_number, 7);
        pool.release(slot);
        assert!(consumer.dequeue().is_none());
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn pool_exhaustion_drops_and_counts() {
        let (mut rx, mut consumer) = receiver(ReceiverConfig {
            pool_capacity: 2,
            ..ReceiverConfig::default()
        });
        rx.on_fragment(&frame(0), 0);
        rx.on_fragment(&frame(1), 64);
        rx.on_fragment(&frame(2), 128);

        let stats = rx.stats();
        assert_eq!(stats.messages_received, 2);
        assert_eq!(stats.allocation_failures, 1);

        let pool = rx.pool();
        while let Some(slot) = consumer.dequeue() {
            pool.release(slot);
        }
        // Slots return to the pool; the receiver can make progress again.
        rx.on_fragment(&frame(3), 192);
        assert_eq!(rx.stats().messages_received, 3);
    }

    #[test]
    fn ring_full_releases_slot_and_counts() {
        let (mut rx, mut consumer) = receiver(ReceiverConfig {
            pool_capacity: 64,
            ring_capacity: 16,
            ..ReceiverConfig::default()
        });
        for seq in 0..20 {
            rx.on_fragment(&frame(seq), seq as i64 * 64);
        }
        let stats = rx.stats();
        assert_eq!(stats.messages_received, 15);
        assert_eq!(stats.queue_full_failures, 5);

        let pool = rx.pool();
        while let Some(slot) = consumer.dequeue() {
            pool.release(slot);
        }
        assert_eq!(pool.available(), pool.capacity());
    }
}
