use crate::core::ring::Consumer;

/// Fixed-size record emitted by the worker for each processed message.
/// Kept under a cache line; drops on stats-ring overflow are counted by the
/// ring, never fatal.
#[derive(Clone, Copy, Debug)]
pub struct StatsRecord {
    pub sequence: u64,
    pub send_time_ns: u64,
    pub recv_time_ns: u64,
    pub position: i64,
}

impl StatsRecord {
    /// Publish-to-receive latency in microseconds; zero when timestamps are
    /// missing or inverted.
    pub fn latency_us(&self) -> f64 {
        if self.send_time_ns > 0 && self.recv_time_ns > self.send_time_ns {
            (self.recv_time_ns - self.send_time_ns) as f64 / 1000.0
        } else {
            0.0
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MonitorSnapshot {
    pub messages_observed: u64,
    pub last_sequence: u64,
    pub avg_latency_us: f64,
    pub min_latency_us: f64,
    pub max_latency_us: f64,
}

/// Consumer side of the stats ring: aggregates latency over everything the
/// worker reports. Best-effort; it may fall behind without back-pressuring
/// anyone.
pub struct LatencyMonitor {
    consumer: Consumer<StatsRecord>,
    messages_observed: u64,
    last_sequence: u64,
    latency_sum_us: f64,
    latency_samples: u64,
    min_latency_us: f64,
    max_latency_us: f64,
}

impl LatencyMonitor {
    pub fn new(consumer: Consumer<StatsRecord>) -> Self {
        Self {
            consumer,
            messages_observed: 0,
            last_sequence: 0,
            latency_sum_us: 0.0,
            latency_samples: 0,
            min_latency_us: 0.0,
            max_latency_us: 0.0,
        }
    }

    /// Drains everything currently buffered; returns how many records were
    /// consumed.
    pub fn drain(&mut self) -> usize {
        let mut drained = 0;
        while let Some(record) = self.consumer.dequeue() {
            drained += 1;
            self.messages_observed += 1;
            self.last_sequence = record.sequence;

            let latency = record.latency_us();
            if latency > 0.0 {
                self.latency_sum_us += latency;
                self.latency_samples += 1;
                if self.min_latency_us == 0.0 || latency < self.min_latency_us {
                    self.min_latency_us = latency;
                }
                if latency > self.max_latency_us {
                    self.max_latency_us = latency;
                }
            }
        }
        drained
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            messages_observed: self.messages_observed,
            last_sequence: self.last_sequence,
            avg_latency_us: if self.latency_samples > 0 {
                self.latency_sum_us / self.latency_samples as f64
            } else {
                0.0
            },
            min_latency_us: self.min_latency_us,
            max_latency_us: self.max_latency_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ring::spsc_ring;

    #[test]
    fn aggregates_latency_extremes() {
        let (mut producer, consumer) = spsc_ring::<StatsRecord>(16).unwrap();
        for (seq, send, recv) in [(1u64, 1_000u64, 3_000u64), (2, 1_000, 2_000), (3, 0, 500)] {
            producer.enqueue(StatsRecord {
                sequence: seq,
                send_time_ns: send,
                recv_time_ns: recv,
                position: 0,
            });
        }

        let mut monitor = LatencyMonitor::new(consumer);
        assert_eq!(monitor.drain(), 3);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.messages_observed, 3);
        assert_eq!(snapshot.last_sequence, 3);
        assert_eq!(snapshot.min_latency_us, 1.0);
        assert_eq!(snapshot.max_latency_us, 2.0);
        assert_eq!(snapshot.avg_latency_us, 1.5);
    }

    #[test]
    fn drain_on_empty_ring_is_zero() {
        let (_producer, consumer) = spsc_ring::<StatsRecord>(16).unwrap();
        let mut monitor = LatencyMonitor::new(consumer);
        assert_eq!(monitor.drain(), 0);
        assert_eq!(monitor.snapshot().messages_observed, 0);
    }
}
