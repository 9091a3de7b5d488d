use std::time::UNIX_EPOCH;

/// Nanosecond timestamp source. One reading is taken per fragment on the
/// receive path (stamped into `recv_time_ns`) and per checkpoint update, so
/// implementations must be cheap and must never panic.
pub trait Clock: Send + Sync + 'static {
    /// Nanoseconds since the UNIX epoch.
    fn now(&self) -> u64;
}

/// Wall-clock readings. Subject to NTP steps, so latency math derived from
/// it can see small jumps; that is acceptable for checkpoint timestamps and
/// worker-side bookkeeping, which is where this clock is used.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> u64 {
        // A host clock set before the epoch reads as zero instead of
        // panicking mid-receive.
        match UNIX_EPOCH.elapsed() {
            Ok(elapsed) => elapsed.as_nanos() as u64,
            Err(_) => 0,
        }
    }
}

/// TSC-backed time via `quanta`, anchored to the wall clock once at
/// construction and advanced by raw counter deltas from there.
///
/// Receive timestamps feed gap and queuing latency measurements, so they
/// must never run backward between consecutive fragments; this is the clock
/// the receiver defaults to.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    inner: quanta::Clock,
    origin_raw: u64,
    origin_wall_ns: u64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        let inner = quanta::Clock::new();
        let origin_raw = inner.raw();
        Self {
            inner,
            origin_raw,
            origin_wall_ns: WallClock.now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> u64 {
        self.origin_wall_ns + self.inner.delta_as_nanos(self.origin_raw, self.inner.raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_runs_backward() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let current = clock.now();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[test]
    fn monotonic_clock_tracks_the_wall_anchor() {
        let clock = MonotonicClock::new();
        let wall = WallClock.now();
        // Both were read moments apart; they must agree to within seconds.
        let drift = clock.now().abs_diff(wall);
        assert!(drift < 5_000_000_000, "drift of {drift}ns from wall clock");
    }
}
