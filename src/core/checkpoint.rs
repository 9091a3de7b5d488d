use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::core::clock::{Clock, WallClock};

pub const CHECKPOINT_MAGIC: u32 = 0x43484B50; // "CHKP"
pub const CHECKPOINT_VERSION: u16 = 1;
pub const CHECKPOINT_FILE_SIZE: usize = 40;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

const SHUTDOWN_POLL: Duration = Duration::from_millis(20);

/// A point-in-time copy of the receiver's durable progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    pub last_sequence: i64,
    pub last_position: i64,
    pub message_count: i64,
    pub timestamp_ns: i64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CheckpointStats {
    pub flush_count: u64,
    pub flush_failures: u64,
    pub snapshot: CheckpointSnapshot,
}

struct Shared<C: Clock> {
    path: PathBuf,
    last_sequence: AtomicI64,
    last_position: AtomicI64,
    message_count: AtomicI64,
    timestamp_ns: AtomicI64,
    running: AtomicBool,
    flush_count: AtomicU64,
    flush_failures: AtomicU64,
    clock: C,
}

/// Asynchronous checkpoint persistence.
///
/// `update` is atomic stores only and is safe to call from the receive fast
/// path at any rate. A background task snapshots the atomics every
/// `flush_interval` and persists them with the write-temp-then-rename
/// pattern, so the visible file is always either the previous snapshot or
/// the new one, never a partial write.
pub struct CheckpointManager<C: Clock = WallClock> {
    shared: Arc<Shared<C>>,
    flush_thread: Option<JoinHandle<()>>,
}

impl CheckpointManager<WallClock> {
    /// Opens (or starts fresh) at `path` and launches the background flush
    /// task. An unreadable or invalid existing file is non-fatal: the manager
    /// logs a warning and starts from zero.
    pub fn new(path: impl AsRef<Path>, flush_interval: Duration) -> Self {
        Self::with_clock(path, flush_interval, WallClock)
    }
}

impl<C: Clock> CheckpointManager<C> {
    pub fn with_clock(path: impl AsRef<Path>, flush_interval: Duration, clock: C) -> Self {
        let shared = Arc::new(Shared {
            path: path.as_ref().to_path_buf(),
            last_sequence: AtomicI64::new(0),
            last_position: AtomicI64::new(0),
            message_count: AtomicI64::new(0),
            timestamp_ns: AtomicI64::new(0),
            running: AtomicBool::new(true),
            flush_count: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            clock,
        });
        shared.load();

        let task_shared = Arc::clone(&shared);
        let flush_thread = std::thread::spawn(move || {
            let mut last_flush = Instant::now();
            let poll = SHUTDOWN_POLL.min(flush_interval);
            while task_shared.running.load(Ordering::Acquire) {
                std::thread::sleep(poll);
                if !task_shared.running.load(Ordering::Acquire) {
                    break;
                }
                if last_flush.elapsed() >= flush_interval {
                    task_shared.flush();
                    last_flush = Instant::now();
                }
            }
        });

        Self {
            shared,
            flush_thread: Some(flush_thread),
        }
    }

    /// Fast-path progress update: four relaxed stores plus one clock read.
    /// No I/O, no locks.
    pub fn update(&self, sequence: i64, position: i64, message_count: i64) {
        let shared = &*self.shared;
        shared.last_sequence.store(sequence, Ordering::Relaxed);
        shared.last_position.store(position, Ordering::Relaxed);
        shared.message_count.store(message_count, Ordering::Relaxed);
        shared
            .timestamp_ns
            .store(shared.clock.now() as i64, Ordering::Relaxed);
    }

    /// Synchronous snapshot + rename. Failures are counted, not propagated.
    pub fn force_flush(&self) {
        self.shared.flush();
    }

    pub fn last_sequence(&self) -> i64 {
        self.shared.last_sequence.load(Ordering::Relaxed)
    }

    pub fn last_position(&self) -> i64 {
        self.shared.last_position.load(Ordering::Relaxed)
    }

    pub fn message_count(&self) -> i64 {
        self.shared.message_count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CheckpointSnapshot {
        self.shared.snapshot()
    }

    pub fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            flush_count: self.shared.flush_count.load(Ordering::Relaxed),
            flush_failures: self.shared.flush_failures.load(Ordering::Relaxed),
            snapshot: self.shared.snapshot(),
        }
    }
}

impl<C: Clock> Drop for CheckpointManager<C> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.flush_thread.take() {
            let _ = handle.join();
        }
        self.shared.flush();
    }
}

impl<C: Clock> Shared<C> {
    fn snapshot(&self) -> CheckpointSnapshot {
        // Per-field consistency only; cross-field skew is tolerated because
        // restart re-processing is bounded by dedup.
        CheckpointSnapshot {
            last_sequence: self.last_sequence.load(Ordering::Relaxed),
            last_position: self.last_position.load(Ordering::Relaxed),
            message_count: self.message_count.load(Ordering::Relaxed),
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
        }
    }

    fn flush(&self) {
        let snapshot = self.snapshot();
        if snapshot == CheckpointSnapshot::default() {
            // No progress yet; never clobber the file with zeros.
            return;
        }

        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        if let Err(err) = std::fs::write(&tmp, encode(&snapshot)) {
            self.flush_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("checkpoint temp write failed: {err}");
            return;
        }
        if let Err(err) = std::fs::rename(&tmp, &self.path) {
            self.flush_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("checkpoint rename failed: {err}");
            return;
        }
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return,
            Err(err) => {
                log::warn!("checkpoint read failed, starting fresh: {err}");
                return;
            }
        };
        let snapshot = match decode(&bytes) {
            Some(snapshot) => snapshot,
            None => {
                log::warn!("invalid checkpoint file, starting fresh");
                return;
            }
        };
        self.last_sequence
            .store(snapshot.last_sequence, Ordering::Relaxed);
        self.last_position
            .store(snapshot.last_position, Ordering::Relaxed);
        self.message_count
            .store(snapshot.message_count, Ordering::Relaxed);
        self.timestamp_ns
            .store(snapshot.timestamp_ns, Ordering::Relaxed);
    }
}

fn encode(snapshot: &CheckpointSnapshot) -> [u8; CHECKPOINT_FILE_SIZE] {
    let mut buf = [0u8; CHECKPOINT_FILE_SIZE];
    buf[0..4].copy_from_slice(&CHECKPOINT_MAGIC.to_le_bytes());
    buf[4..6].copy_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
    // bytes 6..8 stay zero (padding)
    buf[8..16].copy_from_slice(&snapshot.last_sequence.to_le_bytes());
    buf[16..24].copy_from_slice(&snapshot.last_position.to_le_bytes());
    buf[24..32].copy_from_slice(&snapshot.message_count.to_le_bytes());
    buf[32..40].copy_from_slice(&snapshot.timestamp_ns.to_le_bytes());
    buf
}

fn decode(bytes: &[u8]) -> Option<CheckpointSnapshot> {
    if bytes.len() < CHECKPOINT_FILE_SIZE {
        return None;
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
    if magic != CHECKPOINT_MAGIC {
        return None;
    }
    let version = u16::from_le_bytes(bytes[4..6].try_into().ok()?);
    if version != CHECKPOINT_VERSION {
        return None;
    }
    Some(CheckpointSnapshot {
        last_sequence: i64::from_le_bytes(bytes[8..16].try_into().ok()?),
        last_position: i64::from_le_bytes(bytes[16..24].try_into().ok()?),
        message_count: i64::from_le_bytes(bytes[24..32].try_into().ok()?),
        timestamp_ns: i64::from_le_bytes(bytes[32..40].try_into().ok()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_encoding_round_trips() {
        let snapshot = CheckpointSnapshot {
            last_sequence: 999,
            last_position: 123_456,
            message_count: 1000,
            timestamp_ns: 1_700_000_000_000_000_000,
        };
        let bytes = encode(&snapshot);
        assert_eq!(bytes.len(), CHECKPOINT_FILE_SIZE);
        assert_eq!(&bytes[0..4], &CHECKPOINT_MAGIC.to_le_bytes());
        assert_eq!(decode(&bytes), Some(snapshot));
    }

    #[test]
    fn decode_rejects_bad_magic_version_and_truncation() {
        let snapshot = CheckpointSnapshot {
            last_sequence: 1,
            ..CheckpointSnapshot::default()
        };
        let good = encode(&snapshot);

        let mut bad_magic = good;
        bad_magic[0] ^= 0xFF;
        assert!(decode(&bad_magic).is_none());

        let mut bad_version = good;
        bad_version[4] = 2;
        assert!(decode(&bad_version).is_none());

        assert!(decode(&good[..CHECKPOINT_FILE_SIZE - 1]).is_none());
    }
}
