use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::{Error, Result};

pub const MIN_RING_CAPACITY: usize = 16;
pub const MAX_RING_CAPACITY: usize = 65536;
pub const DEFAULT_RING_CAPACITY: usize = 4096;
pub const DEFAULT_STATS_RING_CAPACITY: usize = 16384;

#[repr(align(64))]
struct CacheAligned<T>(T);

/// Shared state of a single-producer/single-consumer ring. One slot is always
/// left unused to distinguish full from empty, so usable capacity is S-1.
///
/// Invariant: `(tail - head) mod S` is in `[0, S-1]`.
struct Inner<T> {
    buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    head: CacheAligned<AtomicUsize>,
    tail: CacheAligned<AtomicUsize>,
    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
    enqueue_failures: AtomicU64,
}

// SAFETY: slots are only written by the producer before the release-store of
// tail and only read by the consumer after the acquire-load of tail (and
// symmetrically for head), so no slot is accessed concurrently.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

#[derive(Clone, Copy, Debug, Default)]
pub struct RingStats {
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub enqueue_failures: u64,
    pub size: usize,
    pub capacity: usize,
    pub utilization: f64,
}

/// Creates a ring of `capacity` slots (power of two, 16..=65536) and returns
/// the two endpoint handles. Exactly one thread may drive each handle.
pub fn spsc_ring<T: Copy + Send>(capacity: usize) -> Result<(Producer<T>, Consumer<T>)> {
    if !capacity.is_power_of_two() {
        return Err(Error::Unsupported("ring capacity must be a power of two"));
    }
    if !(MIN_RING_CAPACITY..=MAX_RING_CAPACITY).contains(&capacity) {
        return Err(Error::Unsupported("ring capacity out of range"));
    }

    let buf: Box<[UnsafeCell<MaybeUninit<T>>]> = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();
    let inner = Arc::new(Inner {
        buf,
        mask: capacity - 1,
        head: CacheAligned(AtomicUsize::new(0)),
        tail: CacheAligned(AtomicUsize::new(0)),
        total_enqueued: AtomicU64::new(0),
        total_dequeued: AtomicU64::new(0),
        enqueue_failures: AtomicU64::new(0),
    });

    Ok((
        Producer {
            inner: Arc::clone(&inner),
        },
        Consumer { inner },
    ))
}

impl<T> Inner<T> {
    fn size(&self) -> usize {
        let head = self.head.0.load(Ordering::Acquire);
        let tail = self.tail.0.load(Ordering::Acquire);
        tail.wrapping_sub(head) & self.mask
    }

    fn stats(&self) -> RingStats {
        let size = self.size();
        let capacity = self.mask;
        RingStats {
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            enqueue_failures: self.enqueue_failures.load(Ordering::Relaxed),
            size,
            capacity,
            utilization: size as f64 / capacity as f64,
        }
    }
}

/// Producer endpoint. Not `Clone`: the type enforces the single producer.
pub struct Producer<T> {
    inner: Arc<Inner<T>>,
}

/// Consumer endpoint. Not `Clone`: the type enforces the single consumer.
pub struct Consumer<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Copy + Send> Producer<T> {
    /// Enqueues one element. Returns false (and counts the failure) when the
    /// ring is full; the caller keeps ownership of the element.
    pub fn enqueue(&mut self, item: T) -> bool {
        let inner = &*self.inner;
        let tail = inner.tail.0.load(Ordering::Relaxed);
        let next = (tail + 1) & inner.mask;
        if next == inner.head.0.load(Ordering::Acquire) {
            inner.enqueue_failures.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // SAFETY: slot `tail` is unreachable by the consumer until the
        // release-store below publishes it.
        unsafe {
            (*inner.buf[tail].get()).write(item);
        }
        inner.tail.0.store(next, Ordering::Release);
        inner.total_enqueued.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Approximate element count; must not be used for correctness.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn is_full(&self) -> bool {
        self.size() == self.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask
    }

    pub fn stats(&self) -> RingStats {
        self.inner.stats()
    }

    /// Resets both indices. Requiring exclusive access to both endpoints
    /// guarantees the threads are quiesced; the caller must already have
    /// returned any in-flight elements to their owner.
    pub fn clear_with(&mut self, consumer: &mut Consumer<T>) -> Result<()> {
        if !Arc::ptr_eq(&self.inner, &consumer.inner) {
            return Err(Error::Unsupported("clear called on mismatched ring endpoints"));
        }
        self.inner.head.0.store(0, Ordering::Release);
        self.inner.tail.0.store(0, Ordering::Release);
        Ok(())
    }
}

impl<T: Copy + Send> Consumer<T> {
    /// Dequeues one element, or `None` when the ring is empty.
    pub fn dequeue(&mut self) -> Option<T> {
        let inner = &*self.inner;
        let head = inner.head.0.load(Ordering::Relaxed);
        if head == inner.tail.0.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: the acquire-load of tail above proves the producer's write
        // to slot `head` happened-before this read.
        let item = unsafe { (*inner.buf[head].get()).assume_init_read() };
        inner.head.0.store((head + 1) & inner.mask, Ordering::Release);
        inner.total_dequeued.fetch_add(1, Ordering::Relaxed);
        Some(item)
    }

    /// Approximate element count; must not be used for correctness.
    pub fn size(&self) -> usize {
        self.inner.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.mask
    }

    pub fn stats(&self) -> RingStats {
        self.inner.stats()
    }
}
