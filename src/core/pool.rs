use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crate::core::slot::{MessageSlot, SlotPtr};
use crate::core::{Error, Result};

pub const SMALL_POOL_CAPACITY: usize = 256;
pub const DEFAULT_POOL_CAPACITY: usize = 1024;
pub const LARGE_POOL_CAPACITY: usize = 4096;

const MAX_POOL_CAPACITY: usize = 65536;

/// Fixed-capacity lock-free pool of pre-allocated message slots.
///
/// Allocation and deallocation are CAS loops on `free_count`; a slot of the
/// free-list array acts as a pointer mailbox so that an acquire racing an
/// in-flight release spins briefly instead of observing a stale entry. The
/// contract admits multiple acquirers and releasers, though the receive path
/// uses a single acquirer in practice.
///
/// Invariant: held + free == capacity at all times outside the CAS windows.
pub struct BufferPool {
    slots: Box<[UnsafeCell<MessageSlot>]>,
    free_list: Box<[AtomicPtr<MessageSlot>]>,
    free_count: AtomicUsize,
    total_acquires: AtomicU64,
    total_releases: AtomicU64,
    allocation_failures: AtomicU64,
    bad_release_reported: AtomicBool,
}

// SAFETY: slot access is serialized by the acquire/release protocol; all pool
// bookkeeping is atomic.
unsafe impl Send for BufferPool {}
unsafe impl Sync for BufferPool {}

#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStats {
    pub total_acquires: u64,
    pub total_releases: u64,
    pub allocation_failures: u64,
    pub available: usize,
    pub in_use: usize,
    pub utilization: f64,
}

impl BufferPool {
    /// Pre-allocates `capacity` slots and seeds the free list with all of
    /// them. Capacity is fixed for the pool's lifetime.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_POOL_CAPACITY {
            return Err(Error::Unsupported("pool capacity out of range"));
        }

        let slots: Box<[UnsafeCell<MessageSlot>]> = (0..capacity)
            .map(|_| UnsafeCell::new(MessageSlot::new()))
            .collect();
        let free_list: Box<[AtomicPtr<MessageSlot>]> = slots
            .iter()
            .map(|cell| AtomicPtr::new(cell.get()))
            .collect();

        Ok(Self {
            slots,
            free_list,
            free_count: AtomicUsize::new(capacity),
            total_acquires: AtomicU64::new(0),
            total_releases: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
            bad_release_reported: AtomicBool::new(false),
        })
    }

    /// Takes a free slot, marks it in-use, and clears its metadata (payload
    /// bytes are left untouched). Returns `None` and counts a failure when
    /// the pool is exhausted; exhaustion is recoverable, the caller drops the
    /// message.
    pub fn acquire(&self) -> Option<SlotPtr> {
        let mut count = self.free_count.load(Ordering::Acquire);
        loop {
            if count == 0 {
                self.allocation_failures.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            match self.free_count.compare_exchange_weak(
                count,
                count - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let cell = &self.free_list[count - 1];
                    // A racing release has reserved this index but may not
                    // have stored the pointer yet; spin until it lands.
                    let mut raw = cell.swap(std::ptr::null_mut(), Ordering::Acquire);
                    while raw.is_null() {
                        std::hint::spin_loop();
                        raw = cell.swap(std::ptr::null_mut(), Ordering::Acquire);
                    }

                    // SAFETY: the slot was on the free list, so no other
                    // holder exists; we have exclusive access until release.
                    unsafe {
                        (*raw).in_use.store(true, Ordering::Release);
                        (*raw).reset();
                    }
                    self.total_acquires.fetch_add(1, Ordering::Relaxed);
                    let ptr = NonNull::new(raw).expect("free list held null slot");
                    return Some(SlotPtr::new(ptr));
                }
                Err(current) => count = current,
            }
        }
    }

    /// Returns a slot to the free list. Releasing a pointer outside the
    /// pool's address range is a programming error: reported once at warn,
    /// then ignored.
    pub fn release(&self, ptr: SlotPtr) {
        let raw = ptr.as_raw();
        if !self.contains(raw) {
            if !self.bad_release_reported.swap(true, Ordering::Relaxed) {
                log::warn!("attempted to release a slot pointer not owned by this pool");
            }
            return;
        }

        // SAFETY: the caller owns the slot until this call completes.
        unsafe {
            (*raw).in_use.store(false, Ordering::Release);
        }

        let mut count = self.free_count.load(Ordering::Acquire);
        loop {
            if count >= self.capacity() {
                // More releases than acquires; only reachable through misuse.
                if !self.bad_release_reported.swap(true, Ordering::Relaxed) {
                    log::warn!("buffer pool free list overflow");
                }
                return;
            }
            match self.free_count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.free_list[count].store(raw, Ordering::Release);
                    self.total_releases.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(current) => count = current,
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn available(&self) -> usize {
        self.free_count.load(Ordering::Acquire)
    }

    pub fn utilization(&self) -> f64 {
        let used = self.capacity() - self.available();
        used as f64 / self.capacity() as f64
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.available();
        PoolStats {
            total_acquires: self.total_acquires.load(Ordering::Relaxed),
            total_releases: self.total_releases.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            available,
            in_use: self.capacity() - available,
            utilization: self.utilization(),
        }
    }

    fn contains(&self, raw: *mut MessageSlot) -> bool {
        let base = self.slots.as_ptr() as usize;
        let end = base + self.capacity() * std::mem::size_of::<UnsafeCell<MessageSlot>>();
        let addr = raw as usize;
        addr >= base
            && addr < end
            && (addr - base) % std::mem::size_of::<UnsafeCell<MessageSlot>>() == 0
    }
}
