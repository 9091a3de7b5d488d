use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::clock::{Clock, WallClock};
use crate::core::dedup::{SeenSet, DEFAULT_SEEN_SET_CAP};
use crate::core::pool::BufferPool;
use crate::core::ring::{Consumer, Producer};
use crate::core::slot::{MessageSlot, SlotPtr};
use crate::core::wire::{MessageHeader, MessageType};
use crate::monitor::StatsRecord;

/// Business-logic callback, invoked for each validated, non-duplicate
/// message. The slot must not be retained beyond the call.
pub type MessageHandler = Box<dyn Fn(&MessageSlot) + Send>;

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// High-water mark of the worker-side dedup set.
    pub seen_cap: usize,
    /// Empty polls to spin/yield through before sleeping.
    pub spin_polls: u32,
    /// Sleep applied once the spin budget is exhausted.
    pub idle_sleep: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            seen_cap: DEFAULT_SEEN_SET_CAP,
            spin_polls: 100,
            idle_sleep: Duration::from_micros(10),
        }
    }
}

struct WorkerShared {
    running: AtomicBool,
    processed: AtomicU64,
    invalid: AtomicU64,
    duplicate: AtomicU64,
    unknown_type: AtomicU64,
    orders_new: AtomicU64,
    order_executions: AtomicU64,
    order_modifies: AtomicU64,
    order_cancels: AtomicU64,
    quote_updates: AtomicU64,
    heartbeats: AtomicU64,
    test_messages: AtomicU64,
    empty_polls: AtomicU64,
    processing_time_ns: AtomicU64,
    processing_samples: AtomicU64,
    queue_depth_total: AtomicU64,
    queue_depth_samples: AtomicU64,
}

/// Per-type breakdown of everything the worker dispatched.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageTypeCounts {
    pub orders_new: u64,
    pub order_executions: u64,
    pub order_modifies: u64,
    pub order_cancels: u64,
    pub quote_updates: u64,
    pub heartbeats: u64,
    pub test_messages: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct WorkerStats {
    pub processed: u64,
    pub invalid: u64,
    pub duplicate: u64,
    pub unknown_type: u64,
    pub by_type: MessageTypeCounts,
    pub empty_polls: u64,
    pub avg_processing_us: f64,
    pub avg_queue_depth: f64,
}

/// Single consumer of the slot ring.
///
/// Dequeues, validates, deduplicates, dispatches by message type, reports a
/// monitoring record, and releases the slot back to the pool. On shutdown the
/// ring is drained so no slot leaks, then the thread joins.
pub struct Worker {
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(
        config: WorkerConfig,
        consumer: Consumer<SlotPtr>,
        pool: Arc<BufferPool>,
        stats_producer: Producer<StatsRecord>,
        handler: Option<MessageHandler>,
    ) -> Self {
        Self::spawn_with_clock(config, consumer, pool, stats_producer, handler, WallClock)
    }

    pub fn spawn_with_clock<C: Clock>(
        config: WorkerConfig,
        mut consumer: Consumer<SlotPtr>,
        pool: Arc<BufferPool>,
        mut stats_producer: Producer<StatsRecord>,
        handler: Option<MessageHandler>,
        clock: C,
    ) -> Self {
        let shared = Arc::new(WorkerShared {
            running: AtomicBool::new(true),
            processed: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
            unknown_type: AtomicU64::new(0),
            orders_new: AtomicU64::new(0),
            order_executions: AtomicU64::new(0),
            order_modifies: AtomicU64::new(0),
            order_cancels: AtomicU64::new(0),
            quote_updates: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            test_messages: AtomicU64::new(0),
            empty_polls: AtomicU64::new(0),
            processing_time_ns: AtomicU64::new(0),
            processing_samples: AtomicU64::new(0),
            queue_depth_total: AtomicU64::new(0),
            queue_depth_samples: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::spawn(move || {
            let mut seen = SeenSet::new(config.seen_cap);
            let mut idle_streak = 0u32;

            loop {
                thread_shared
                    .queue_depth_total
                    .fetch_add(consumer.size() as u64, Ordering::Relaxed);
                thread_shared
                    .queue_depth_samples
                    .fetch_add(1, Ordering::Relaxed);

                match consumer.dequeue() {
                    Some(slot) => {
                        idle_streak = 0;
                        process_slot(
                            slot,
                            &pool,
                            &mut seen,
                            &mut stats_producer,
                            &handler,
                            &thread_shared,
                            &clock,
                        );
                    }
                    None => {
                        if !thread_shared.running.load(Ordering::Acquire) {
                            break;
                        }
                        thread_shared.empty_polls.fetch_add(1, Ordering::Relaxed);
                        idle_streak += 1;
                        if idle_streak < config.spin_polls {
                            std::thread::yield_now();
                        } else {
                            std::thread::sleep(config.idle_sleep);
                        }
                    }
                }
            }

            // Drain whatever raced in after the stop signal; slots must not
            // leak even if the producer outran the shutdown ordering.
            while let Some(slot) = consumer.dequeue() {
                pool.release(slot);
            }
        });

        Self {
            shared,
            thread: Some(thread),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Signals the thread and joins it. The producer side must already have
    /// stopped feeding the ring.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> WorkerStats {
        let shared = &*self.shared;
        let samples = shared.processing_samples.load(Ordering::Relaxed);
        let depth_samples = shared.queue_depth_samples.load(Ordering::Relaxed);
        WorkerStats {
            processed: shared.processed.load(Ordering::Relaxed),
            invalid: shared.invalid.load(Ordering::Relaxed),
            duplicate: shared.duplicate.load(Ordering::Relaxed),
            unknown_type: shared.unknown_type.load(Ordering::Relaxed),
            by_type: MessageTypeCounts {
                orders_new: shared.orders_new.load(Ordering::Relaxed),
                order_executions: shared.order_executions.load(Ordering::Relaxed),
                order_modifies: shared.order_modifies.load(Ordering::Relaxed),
                order_cancels: shared.order_cancels.load(Ordering::Relaxed),
                quote_updates: shared.quote_updates.load(Ordering::Relaxed),
                heartbeats: shared.heartbeats.load(Ordering::Relaxed),
                test_messages: shared.test_messages.load(Ordering::Relaxed),
            },
            empty_polls: shared.empty_polls.load(Ordering::Relaxed),
            avg_processing_us: if samples > 0 {
                shared.processing_time_ns.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
            } else {
                0.0
            },
            avg_queue_depth: if depth_samples > 0 {
                shared.queue_depth_total.load(Ordering::Relaxed) as f64 / depth_samples as f64
            } else {
                0.0
            },
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn process_slot<C: Clock>(
    mut slot: SlotPtr,
    pool: &BufferPool,
    seen: &mut SeenSet,
    stats_producer: &mut Producer<StatsRecord>,
    handler: &Option<MessageHandler>,
    shared: &WorkerShared,
    clock: &C,
) {
    slot.get_mut().worker_dequeue_time_ns = clock.now();

    if slot.get().validate().is_err() {
        shared.invalid.fetch_add(1, Ordering::Relaxed);
        pool.release(slot);
        return;
    }

    let header = slot.get().header;
    if !seen.insert(header.sequence_number) {
        shared.duplicate.fetch_add(1, Ordering::Relaxed);
        pool.release(slot);
        return;
    }

    let start_ns = clock.now();
    dispatch(&header, shared);
    if let Some(handler) = handler {
        handler(slot.get());
    }
    shared
        .processing_time_ns
        .fetch_add(clock.now().saturating_sub(start_ns), Ordering::Relaxed);
    shared.processing_samples.fetch_add(1, Ordering::Relaxed);

    // Overflow drops are counted by the ring itself; monitoring is
    // best-effort.
    stats_producer.enqueue(StatsRecord {
        sequence: header.sequence_number,
        send_time_ns: header.publish_time_ns,
        recv_time_ns: header.recv_time_ns,
        position: 0,
    });

    pool.release(slot);
    shared.processed.fetch_add(1, Ordering::Relaxed);
}

/// Routes a validated message by its decoded type. Each known variant keeps
/// its own tally; the registered handler then runs for every message, so
/// order-flow business logic sees new/execution/modify/cancel events with the
/// counters already attributed. Unknown types are counted and logged, never
/// fatal.
fn dispatch(header: &MessageHeader, shared: &WorkerShared) {
    let counter = match MessageType::from_u16(header.message_type) {
        Some(MessageType::OrderNew) => &shared.orders_new,
        Some(MessageType::OrderExecution) => &shared.order_executions,
        Some(MessageType::OrderModify) => &shared.order_modifies,
        Some(MessageType::OrderCancel) => &shared.order_cancels,
        Some(MessageType::QuoteUpdate) => &shared.quote_updates,
        Some(MessageType::Heartbeat) => &shared.heartbeats,
        Some(MessageType::Test) => &shared.test_messages,
        None => {
            log::debug!("unknown message type {}", header.message_type);
            &shared.unknown_type
        }
    };
    counter.fetch_add(1, Ordering::Relaxed);
}
