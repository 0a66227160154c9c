//! The listening side: decode heartbeats and account for loss.
//!
//! The [`LossTracker`] is responsible for everything that happens *after* a
//! raw datagram is decoded into a [`crate::packet::Packet`]:
//! - Detecting a new sender (different source address) and resetting.
//! - Tracking the lowest and highest sequence number seen.
//! - Deriving lost packets from the sequence span and the received count.
//!
//! [`Listener`] owns the socket and feeds the tracker until stopped.  While
//! the current sender asks for keep-alives (non-zero keep-alive interval in
//! its headers) a background task sends [`KEEP_ALIVE_BYTE`] back to the
//! sender's address on the keep-alive port at that interval.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::MAX_DATAGRAM;
use crate::packet::{Header, Packet};
use crate::socket::{bind_tokio, reusable_udp_socket, SocketError};
use crate::stop::{stop_channel, StopHandle, StopSignal};

/// Port transmitters expect keep-alives on.
pub const KEEP_ALIVE_PORT: u16 = 13337;

/// Content of every keep-alive datagram.
pub const KEEP_ALIVE_BYTE: u8 = 0x66;

// ---------------------------------------------------------------------------
// LossTracker
// ---------------------------------------------------------------------------

/// Per-sender loss counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossSnapshot {
    pub received: u64,
    pub first_sequence: u32,
    pub last_sequence: u32,
    /// `span - received`, where span covers first..=last.
    pub lost: u64,
    /// `lost / span × 100`.
    pub loss_percent: f64,
}

/// Loss accounting for the most recent sender.
#[derive(Debug, Default)]
pub struct LossTracker {
    source: Option<SocketAddr>,
    received: u64,
    first: u32,
    last: u32,
}

impl LossTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record packet `sequence` from `from` and return the updated counters.
    ///
    /// A packet from a different address than the previous one starts a
    /// fresh count; the transmitter was restarted or replaced.  So does a
    /// sequence more than half the number space below the highest seen,
    /// which is the sender wrapping past `u32::MAX`.
    pub fn observe(&mut self, from: SocketAddr, sequence: u32) -> LossSnapshot {
        if self.source != Some(from) {
            if self.source.is_some() {
                log::info!("new sender {from}, resetting loss counters");
            }
            self.source = Some(from);
            self.received = 0;
        } else if self.received > 0 && self.last - sequence.min(self.last) > u32::MAX / 2 {
            log::info!("sequence from {from} wrapped, resetting loss counters");
            self.received = 0;
        }

        if self.received == 0 {
            self.first = sequence;
            self.last = sequence;
        }
        self.first = self.first.min(sequence);
        self.last = self.last.max(sequence);
        self.received += 1;

        self.snapshot()
    }

    pub fn snapshot(&self) -> LossSnapshot {
        if self.received == 0 {
            return LossSnapshot::default();
        }
        let span = u64::from(self.last - self.first) + 1;
        // duplicates can push received above span
        let lost = span.saturating_sub(self.received);
        LossSnapshot {
            received: self.received,
            first_sequence: self.first,
            last_sequence: self.last,
            lost,
            loss_percent: lost as f64 / span as f64 * 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A UDP socket receiving heartbeats on a port, optionally in a multicast group.
#[derive(Debug)]
pub struct Listener {
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    keep_alive_port: u16,
}

impl Listener {
    /// Bind `0.0.0.0:port` and join `group` if given.
    ///
    /// Port `0` picks an ephemeral port; see `local_addr`.
    pub fn bind(port: u16, group: Option<Ipv4Addr>) -> Result<Self, SocketError> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        let socket = reusable_udp_socket()?;
        let inner = bind_tokio(socket, bind_addr)?;

        if let Some(group) = group {
            inner
                .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
                .map_err(|source| SocketError::Join { group, source })?;
        }

        let local_addr = inner.local_addr().map_err(|source| SocketError::Bind {
            addr: SocketAddr::V4(bind_addr),
            source,
        })?;
        log::info!("listening on {local_addr}");
        Ok(Self {
            local_addr,
            inner,
            keep_alive_port: KEEP_ALIVE_PORT,
        })
    }

    /// Send keep-alives to `port` on the sender instead of [`KEEP_ALIVE_PORT`].
    pub fn with_keep_alive_port(mut self, port: u16) -> Self {
        self.keep_alive_port = port;
        self
    }

    /// Receive until `stop` fires; returns the final counters.
    ///
    /// Datagrams that fail to decode are logged and skipped.
    pub async fn run(self, mut stop: StopSignal) -> Result<LossSnapshot, SocketError> {
        let mut tracker = LossTracker::new();
        let mut hints: Option<Header> = None;
        let mut keep_alive: Option<KeepAlive> = None;
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            // a receive error drops `keep_alive`, which stops its task
            let (len, from) = tokio::select! {
                biased;
                _ = stop.stopped() => break,
                received = self.inner.recv_from(&mut buf) => received.map_err(SocketError::Recv)?,
            };

            let packet = match Packet::decode(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    log::warn!("bogus datagram from {from}: {e}");
                    continue;
                }
            };

            let header = packet.header;
            let changed = hints.map_or(true, |h| {
                h.wifi_sleep_policy != header.wifi_sleep_policy
                    || h.wifi_lock_type != header.wifi_lock_type
            });
            if changed {
                log::info!(
                    "sender {from} requests wifi sleep policy {}, lock type {}",
                    header.wifi_sleep_policy,
                    header.wifi_lock_type
                );
            }
            hints = Some(header);

            let dest = SocketAddr::new(from.ip(), self.keep_alive_port);
            let interval_ms = header.keep_alive_interval_ms;
            let current = keep_alive.as_ref().map(|k| (k.dest, k.interval_ms));
            if current != Some((dest, interval_ms)) {
                if let Some(old) = keep_alive.take() {
                    old.shutdown().await;
                }
                if interval_ms > 0 {
                    keep_alive = Some(KeepAlive::spawn(dest, interval_ms));
                }
            }

            let snapshot = tracker.observe(from, header.sequence);
            log::debug!(
                "packet {} ({} bytes, interval {}ms) from {from}: {} received, {} lost ({:.2}%)",
                header.sequence,
                packet.wire_len(),
                header.send_interval_ms,
                snapshot.received,
                snapshot.lost,
                snapshot.loss_percent
            );
        }

        if let Some(keep_alive) = keep_alive.take() {
            keep_alive.shutdown().await;
        }

        let snapshot = tracker.snapshot();
        log::info!(
            "received {} packets, {} lost ({:.2}%)",
            snapshot.received,
            snapshot.lost,
            snapshot.loss_percent
        );
        Ok(snapshot)
    }
}

// ---------------------------------------------------------------------------
// Keep-alive task
// ---------------------------------------------------------------------------

/// Handle to the task sending keep-alives to one sender.
///
/// Dropping the handle stops the task.
struct KeepAlive {
    dest: SocketAddr,
    interval_ms: u32,
    stop: StopHandle,
    task: JoinHandle<()>,
}

impl KeepAlive {
    fn spawn(dest: SocketAddr, interval_ms: u32) -> Self {
        let (stop, signal) = stop_channel();
        let every = Duration::from_millis(u64::from(interval_ms));
        log::info!("sending keep-alives to {dest} every {interval_ms}ms");
        let task = tokio::spawn(send_keep_alives(dest, every, signal));
        Self {
            dest,
            interval_ms,
            stop,
            task,
        }
    }

    /// Stop the task and wait for it to finish.
    async fn shutdown(mut self) {
        self.stop.stop();
        if let Err(e) = (&mut self.task).await {
            log::warn!("keep-alive task for {} failed: {e}", self.dest);
        }
    }
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn send_keep_alives(dest: SocketAddr, every: Duration, mut stop: StopSignal) {
    let socket = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            log::warn!("cannot open keep-alive socket: {e}");
            return;
        }
    };

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => break,
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&[KEEP_ALIVE_BYTE], dest).await {
                    log::warn!("keep-alive to {dest} failed: {e}");
                }
            }
        }
    }
    log::debug!("stopped keep-alives to {dest}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 20], port))
    }

    #[test]
    fn empty_tracker_reports_nothing() {
        assert_eq!(LossTracker::new().snapshot(), LossSnapshot::default());
    }

    #[test]
    fn contiguous_sequence_has_no_loss() {
        let mut tracker = LossTracker::new();
        for seq in 1..=10 {
            tracker.observe(addr(4000), seq);
        }
        let s = tracker.snapshot();
        assert_eq!((s.received, s.first_sequence, s.last_sequence), (10, 1, 10));
        assert_eq!(s.lost, 0);
        assert_eq!(s.loss_percent, 0.0);
    }

    #[test]
    fn gaps_count_as_lost() {
        let mut tracker = LossTracker::new();
        for seq in [5, 6, 8, 9, 12] {
            tracker.observe(addr(4000), seq);
        }
        let s = tracker.snapshot();
        // span 5..=12 is 8 packets, 5 arrived
        assert_eq!(s.lost, 3);
        assert!((s.loss_percent - 37.5).abs() < 1e-9);
    }

    #[test]
    fn late_packet_lowers_first_sequence() {
        let mut tracker = LossTracker::new();
        tracker.observe(addr(4000), 10);
        let s = tracker.observe(addr(4000), 8);
        assert_eq!(s.first_sequence, 8);
        assert_eq!(s.last_sequence, 10);
        assert_eq!(s.lost, 1);
    }

    #[test]
    fn duplicates_do_not_underflow() {
        let mut tracker = LossTracker::new();
        tracker.observe(addr(4000), 1);
        let s = tracker.observe(addr(4000), 1);
        assert_eq!(s.received, 2);
        assert_eq!(s.lost, 0);
    }

    #[test]
    fn new_sender_resets_counters() {
        let mut tracker = LossTracker::new();
        for seq in [100, 150] {
            tracker.observe(addr(4000), seq);
        }
        assert_eq!(tracker.snapshot().lost, 49);

        let s = tracker.observe(addr(4001), 1);
        assert_eq!((s.received, s.first_sequence, s.last_sequence, s.lost), (1, 1, 1, 0));
    }

    #[test]
    fn sequence_wrap_resets_counters() {
        let mut tracker = LossTracker::new();
        for seq in [u32::MAX - 2, u32::MAX - 1, u32::MAX] {
            tracker.observe(addr(4000), seq);
        }
        let s = tracker.observe(addr(4000), 1);
        assert_eq!((s.received, s.first_sequence, s.last_sequence, s.lost), (1, 1, 1, 0));

        let s = tracker.observe(addr(4000), 2);
        assert_eq!((s.received, s.lost), (2, 0));
    }
}
