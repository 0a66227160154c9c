//! Throughput accounting for a transmission run.

use std::fmt;

use tokio::time::Instant;

/// Counters owned by a single transmitter for the lifetime of one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmissionStats {
    /// Number of packets handed to the socket.
    pub packets_sent: u64,
    /// Cumulative datagram bytes, headers included.
    pub bytes_sent: u64,
    /// Captured once at loop entry.
    pub start_time: Instant,
    /// Target time of the most recent paced tick (not its actual send time).
    pub last_scheduled_time: Instant,
}

impl TransmissionStats {
    pub fn new(start_time: Instant) -> Self {
        Self {
            packets_sent: 0,
            bytes_sent: 0,
            start_time,
            last_scheduled_time: start_time,
        }
    }

    /// Advance the packet counter and return the sequence number to send.
    ///
    /// Sequence numbers run `1..=u32::MAX` and then start over at 1, so 0
    /// never goes on the wire.  The packet counter does not wrap.
    pub fn next_sequence(&mut self) -> u32 {
        self.packets_sent += 1;
        let wrapped = (self.packets_sent - 1) % u64::from(u32::MAX);
        wrapped as u32 + 1
    }

    pub fn record_bytes(&mut self, len: usize) {
        self.bytes_sent += len as u64;
    }

    /// Average send rate since `start_time` in megabits per second.
    ///
    /// Returns 0 while no time has elapsed.
    pub fn rate_mbps(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.start_time).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 * 8.0 / elapsed / 1_000_000.0
    }
}

/// One progress report from the send loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Status {
    pub sequence: u32,
    pub packet_len: usize,
    pub rate_mbps: f64,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent packet {} with length {}, data rate is {:.3} Mbps",
            self.sequence, self.packet_len, self.rate_mbps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sequence_starts_at_one() {
        let mut stats = TransmissionStats::new(Instant::now());
        assert_eq!(stats.next_sequence(), 1);
        assert_eq!(stats.next_sequence(), 2);
        assert_eq!(stats.packets_sent, 2);
    }

    #[test]
    fn sequence_wraps_to_one() {
        let mut stats = TransmissionStats::new(Instant::now());
        stats.packets_sent = u64::from(u32::MAX) - 1;
        assert_eq!(stats.next_sequence(), u32::MAX);
        assert_eq!(stats.next_sequence(), 1);
        assert_eq!(stats.next_sequence(), 2);
        assert_eq!(stats.packets_sent, u64::from(u32::MAX) + 2);
    }

    #[test]
    fn rate_is_zero_without_elapsed_time() {
        let start = Instant::now();
        let mut stats = TransmissionStats::new(start);
        stats.record_bytes(1_000);
        assert_eq!(stats.rate_mbps(start), 0.0);
    }

    #[test]
    fn rate_in_megabits_per_second() {
        let start = Instant::now();
        let mut stats = TransmissionStats::new(start);
        stats.record_bytes(250_000);
        stats.record_bytes(250_000);
        // 500 kB in 2 s = 2 Mbit/s
        let rate = stats.rate_mbps(start + Duration::from_secs(2));
        assert!((rate - 2.0).abs() < 1e-9, "rate was {rate}");
    }

    #[test]
    fn status_line_format() {
        let status = Status {
            sequence: 12,
            packet_len: 20,
            rate_mbps: 0.0016,
        };
        assert_eq!(
            status.to_string(),
            "sent packet 12 with length 20, data rate is 0.002 Mbps"
        );
    }
}
