use crate::core::{Error, Result};

pub const HEADER_SIZE: usize = 64;
pub const MAX_PAYLOAD_LEN: usize = 4096;
pub const MAX_WIRE_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_LEN;

pub const MESSAGE_MAGIC: [u8; 4] = *b"SEKR";
pub const MAX_VERSION: u16 = 100;

pub const MAGIC_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const TYPE_OFFSET: usize = 6;
pub const SEQ_OFFSET: usize = 8;
pub const EVENT_TIME_OFFSET: usize = 16;
pub const PUBLISH_TIME_OFFSET: usize = 24;
pub const RECV_TIME_OFFSET: usize = 32;
pub const LENGTH_OFFSET: usize = 40;
pub const PUBLISHER_ID_OFFSET: usize = 44;
pub const PRIORITY_OFFSET: usize = 46;
pub const FLAGS_OFFSET: usize = 47;
pub const SESSION_ID_OFFSET: usize = 48;
pub const CHECKSUM_OFFSET: usize = 56;
pub const RESERVED_OFFSET: usize = 60;

pub const FLAG_CHECKSUM_ENABLED: u8 = 0x01;
pub const FLAG_COMPRESSED: u8 = 0x02;
pub const FLAG_ENCRYPTED: u8 = 0x04;
pub const FLAG_URGENT: u8 = 0x08;

/// Application message kinds carried in `message_type`. Zero is reserved as
/// invalid on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum MessageType {
    OrderNew = 1,
    OrderExecution = 2,
    OrderModify = 3,
    OrderCancel = 4,
    QuoteUpdate = 5,
    Heartbeat = 6,
    Test = 99,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::OrderNew),
            2 => Some(Self::OrderExecution),
            3 => Some(Self::OrderModify),
            4 => Some(Self::OrderCancel),
            5 => Some(Self::QuoteUpdate),
            6 => Some(Self::Heartbeat),
            99 => Some(Self::Test),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Fixed 64-byte wire header. Field order matches the wire layout; the struct
/// is only ever serialized through the explicit offsets above.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub message_type: u16,
    pub sequence_number: u64,
    pub event_time_ns: u64,
    pub publish_time_ns: u64,
    pub recv_time_ns: u64,
    pub message_length: u32,
    pub publisher_id: u16,
    pub priority: u8,
    pub flags: u8,
    pub session_id: u64,
    pub checksum: u32,
    pub reserved: u32,
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self {
            magic: [0u8; 4],
            version: 0,
            message_type: 0,
            sequence_number: 0,
            event_time_ns: 0,
            publish_time_ns: 0,
            recv_time_ns: 0,
            message_length: 0,
            publisher_id: 0,
            priority: 0,
            flags: 0,
            session_id: 0,
            checksum: 0,
            reserved: 0,
        }
    }
}

impl MessageHeader {
    pub fn set_magic(&mut self) {
        self.magic = MESSAGE_MAGIC;
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MESSAGE_MAGIC
    }

    pub fn has_checksum(&self) -> bool {
        self.flags & FLAG_CHECKSUM_ENABLED != 0
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&self.magic);
        buf[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&self.version.to_le_bytes());
        buf[TYPE_OFFSET..TYPE_OFFSET + 2].copy_from_slice(&self.message_type.to_le_bytes());
        buf[SEQ_OFFSET..SEQ_OFFSET + 8].copy_from_slice(&self.sequence_number.to_le_bytes());
        buf[EVENT_TIME_OFFSET..EVENT_TIME_OFFSET + 8]
            .copy_from_slice(&self.event_time_ns.to_le_bytes());
        buf[PUBLISH_TIME_OFFSET..PUBLISH_TIME_OFFSET + 8]
            .copy_from_slice(&self.publish_time_ns.to_le_bytes());
        buf[RECV_TIME_OFFSET..RECV_TIME_OFFSET + 8]
            .copy_from_slice(&self.recv_time_ns.to_le_bytes());
        buf[LENGTH_OFFSET..LENGTH_OFFSET + 4]
            .copy_from_slice(&self.message_length.to_le_bytes());
        buf[PUBLISHER_ID_OFFSET..PUBLISHER_ID_OFFSET + 2]
            .copy_from_slice(&self.publisher_id.to_le_bytes());
        buf[PRIORITY_OFFSET] = self.priority;
        buf[FLAGS_OFFSET] = self.flags;
        buf[SESSION_ID_OFFSET..SESSION_ID_OFFSET + 8]
            .copy_from_slice(&self.session_id.to_le_bytes());
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&self.checksum.to_le_bytes());
        buf[RESERVED_OFFSET..RESERVED_OFFSET + 4].copy_from_slice(&self.reserved.to_le_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[MAGIC_OFFSET..MAGIC_OFFSET + 4]);
        Self {
            magic,
            version: read_u16(bytes, VERSION_OFFSET),
            message_type: read_u16(bytes, TYPE_OFFSET),
            sequence_number: read_u64(bytes, SEQ_OFFSET),
            event_time_ns: read_u64(bytes, EVENT_TIME_OFFSET),
            publish_time_ns: read_u64(bytes, PUBLISH_TIME_OFFSET),
            recv_time_ns: read_u64(bytes, RECV_TIME_OFFSET),
            message_length: read_u32(bytes, LENGTH_OFFSET),
            publisher_id: read_u16(bytes, PUBLISHER_ID_OFFSET),
            priority: bytes[PRIORITY_OFFSET],
            flags: bytes[FLAGS_OFFSET],
            session_id: read_u64(bytes, SESSION_ID_OFFSET),
            checksum: read_u32(bytes, CHECKSUM_OFFSET),
            reserved: read_u32(bytes, RESERVED_OFFSET),
        }
    }

    /// Network latency (publish -> receive) in microseconds. Zero if either
    /// timestamp is missing.
    pub fn network_latency_us(&self) -> f64 {
        if self.recv_time_ns == 0 || self.publish_time_ns == 0 {
            return 0.0;
        }
        self.recv_time_ns.saturating_sub(self.publish_time_ns) as f64 / 1000.0
    }

    /// Event-to-receive latency in microseconds. Zero if either timestamp is
    /// missing.
    pub fn event_to_receive_us(&self) -> f64 {
        if self.recv_time_ns == 0 || self.event_time_ns == 0 {
            return 0.0;
        }
        self.recv_time_ns.saturating_sub(self.event_time_ns) as f64 / 1000.0
    }
}

/// CRC32 (reversed polynomial 0xEDB88320) over the header with the checksum
/// field zeroed, followed by the payload. Publisher and receiver must agree
/// on this exact byte order.
pub fn compute_crc(header: &MessageHeader, payload: &[u8]) -> u32 {
    let mut scratch = *header;
    scratch.checksum = 0;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&scratch.to_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Validates a header (and payload integrity when the checksum flag is set)
/// against the wire rules.
pub fn validate(header: &MessageHeader, payload: &[u8]) -> Result<()> {
    if !header.has_valid_magic() {
        return Err(Error::InvalidMagic);
    }
    if header.version == 0 || header.version > MAX_VERSION {
        return Err(Error::UnsupportedVersion(header.version));
    }
    if header.message_type == 0 {
        return Err(Error::InvalidType(header.message_type));
    }
    if header.message_length as usize > MAX_WIRE_SIZE {
        return Err(Error::LengthOutOfRange(header.message_length));
    }
    if header.has_checksum() && compute_crc(header, payload) != header.checksum {
        return Err(Error::ChecksumMismatch);
    }
    Ok(())
}

fn read_u16(bytes: &[u8; HEADER_SIZE], offset: usize) -> u16 {
    u16::from_le_bytes(bytes[offset..offset + 2].try_into().expect("slice length"))
}

fn read_u32(bytes: &[u8; HEADER_SIZE], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().expect("slice length"))
}

fn read_u64(bytes: &[u8; HEADER_SIZE], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().expect("slice length"))
}
