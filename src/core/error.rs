use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    InvalidMagic,
    UnsupportedVersion(u16),
    InvalidType(u16),
    LengthOutOfRange(u32),
    ChecksumMismatch,
    PoolExhausted,
    QueueFull,
    Corrupt(&'static str),
    Unsupported(&'static str),
    Transport(String),
    ReplayMergeFailed(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::InvalidMagic => write!(f, "invalid message magic"),
            Error::UnsupportedVersion(version) => write!(f, "unsupported version: {version}"),
            Error::InvalidType(type_id) => write!(f, "invalid message type: {type_id}"),
            Error::LengthOutOfRange(len) => write!(f, "message length out of range: {len}"),
            Error::ChecksumMismatch => write!(f, "checksum mismatch"),
            Error::PoolExhausted => write!(f, "buffer pool exhausted"),
            Error::QueueFull => write!(f, "queue full"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Error::Transport(msg) => write!(f, "transport error: {msg}"),
            Error::ReplayMergeFailed(msg) => write!(f, "replay merge failed: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
