use std::ptr::NonNull;
use std::sync::atomic::AtomicBool;

use crate::core::wire::{self, MessageHeader, HEADER_SIZE, MAX_PAYLOAD_LEN};
use crate::core::Result;

/// A pre-allocated message slot: the wire header, the payload area, and the
/// pool bookkeeping that never goes on the wire.
///
/// Slots are owned by the `BufferPool`. At any moment a slot is either free
/// (on the pool's free list) or held (its `SlotPtr` in transit through the
/// ring or in worker scope).
#[repr(C)]
pub struct MessageSlot {
    pub header: MessageHeader,
    payload: [u8; MAX_PAYLOAD_LEN],
    pub(crate) in_use: AtomicBool,
    actual_payload_len: u32,
    pub worker_dequeue_time_ns: u64,
}

impl MessageSlot {
    pub(crate) fn new() -> Self {
        Self {
            header: MessageHeader::default(),
            payload: [0u8; MAX_PAYLOAD_LEN],
            in_use: AtomicBool::new(false),
            actual_payload_len: 0,
            worker_dequeue_time_ns: 0,
        }
    }

    /// Clears the header and bookkeeping. The payload bytes are left as-is;
    /// `actual_payload_len` bounds every read.
    pub(crate) fn reset(&mut self) {
        self.header = MessageHeader::default();
        self.actual_payload_len = 0;
        self.worker_dequeue_time_ns = 0;
    }

    /// Copies one wire fragment into the slot: up to 64 header bytes, then up
    /// to `MAX_PAYLOAD_LEN` payload bytes. Short fragments produce a
    /// zero-padded header that fails magic validation downstream.
    pub fn copy_from_fragment(&mut self, fragment: &[u8]) {
        let mut header_bytes = [0u8; HEADER_SIZE];
        let header_len = fragment.len().min(HEADER_SIZE);
        header_bytes[..header_len].copy_from_slice(&fragment[..header_len]);
        self.header = MessageHeader::from_bytes(&header_bytes);

        if fragment.len() > HEADER_SIZE {
            let payload_len = (fragment.len() - HEADER_SIZE).min(MAX_PAYLOAD_LEN);
            self.payload[..payload_len]
                .copy_from_slice(&fragment[HEADER_SIZE..HEADER_SIZE + payload_len]);
            self.actual_payload_len = payload_len as u32;
        } else {
            self.actual_payload_len = 0;
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.actual_payload_len as usize]
    }

    pub fn actual_payload_len(&self) -> usize {
        self.actual_payload_len as usize
    }

    /// Total wire-format size of the message held in this slot.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.actual_payload_len as usize
    }

    /// Validates the held message against the wire rules (magic, version,
    /// type, length, and checksum when enabled).
    pub fn validate(&self) -> Result<()> {
        wire::validate(&self.header, self.payload())
    }

    /// Queuing latency (receive -> worker dequeue) in microseconds. Zero if
    /// either timestamp is missing.
    pub fn queuing_latency_us(&self) -> f64 {
        if self.worker_dequeue_time_ns == 0 || self.header.recv_time_ns == 0 {
            return 0.0;
        }
        self.worker_dequeue_time_ns
            .saturating_sub(self.header.recv_time_ns) as f64
            / 1000.0
    }

}

/// Owning handle to a pool slot.
///
/// Ownership rule: exactly one thread holds a given `SlotPtr` between
/// `BufferPool::acquire` and `BufferPool::release`; the pointer ring transfers
/// that ownership without copying. The pool outlives every handle it issues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotPtr(NonNull<MessageSlot>);

// SAFETY: a SlotPtr is an exclusive handle; the acquire/release protocol
// guarantees no two threads hold the same slot outside the pool's CAS windows.
unsafe impl Send for SlotPtr {}

impl SlotPtr {
    pub(crate) fn new(ptr: NonNull<MessageSlot>) -> Self {
        Self(ptr)
    }

    pub fn get(&self) -> &MessageSlot {
        // SAFETY: exclusive ownership per the type contract; the pool's
        // backing storage outlives all issued handles.
        unsafe { self.0.as_ref() }
    }

    pub fn get_mut(&mut self) -> &mut MessageSlot {
        // SAFETY: as above; &mut self prevents aliased access through this
        // handle.
        unsafe { self.0.as_mut() }
    }

    pub(crate) fn as_raw(self) -> *mut MessageSlot {
        self.0.as_ptr()
    }
}
