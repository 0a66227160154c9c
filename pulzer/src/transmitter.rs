//! The paced send loop.
//!
//! ```text
//!         ┌───────────── loop ─────────────┐
//!         │ stop requested? ──yes──▶ exit  │
//!         │ target = start + tick×interval │
//!         │ sleep until target (or stop)   │
//!         │ encode(tick) ─▶ socket.send_to │
//!         │ stats += len; maybe report     │
//!         └────────────────────────────────┘
//! ```
//!
//! A [`Transmitter`] owns its socket by value.  [`Transmitter::run`]
//! consumes it, so the socket is dropped exactly once when the loop ends,
//! whether the loop was stopped or a send failed.

use tokio::time::{sleep_until, Instant};

use crate::config::TransmitConfig;
use crate::packet;
use crate::schedule::{Schedule, StatusThrottle};
use crate::socket::{BeaconSocket, DatagramSink, SocketError};
use crate::stats::{Status, TransmissionStats};
use crate::stop::StopSignal;

/// Callback receiving throttled status reports.
pub type StatusFn = dyn FnMut(&Status) + Send;

/// Drives one heartbeat transmission.
pub struct Transmitter<S = BeaconSocket> {
    socket: S,
    config: TransmitConfig,
    status_fn: Box<StatusFn>,
}

impl Transmitter<BeaconSocket> {
    /// Open a [`BeaconSocket`] for `config`.
    pub fn open(config: TransmitConfig) -> Result<Self, SocketError> {
        let socket = BeaconSocket::open(config.interface, config.destination, config.multicast_ttl)?;
        Ok(Self::with_socket(socket, config))
    }
}

impl<S: DatagramSink> Transmitter<S> {
    /// Transmitter over an already configured socket.
    ///
    /// Status reports go to the `log` facade at info level.
    pub fn with_socket(socket: S, config: TransmitConfig) -> Self {
        Self {
            socket,
            config,
            status_fn: Box::new(|status: &Status| log::info!("{status}")),
        }
    }

    /// Replace the status callback.
    pub fn with_status_fn(mut self, status_fn: Box<StatusFn>) -> Self {
        self.status_fn = status_fn;
        self
    }

    /// Send until `stop` fires or the socket fails.
    ///
    /// Returns the final counters on a requested stop.  A stop requested
    /// while the loop is waiting for the next tick takes effect immediately.
    pub async fn run(self, mut stop: StopSignal) -> Result<TransmissionStats, SocketError> {
        let Self {
            mut socket,
            config,
            mut status_fn,
        } = self;

        let start = Instant::now();
        let schedule = Schedule::new(start, config.send_interval);
        let throttle = StatusThrottle::new(config.send_interval, config.status_threshold);
        let dest = config.destination_addr();
        let mut stats = TransmissionStats::new(start);

        let delivery = if config.is_multicast() { "multicast" } else { "broadcast" };
        if config.is_paced() {
            log::info!(
                "transmitting every {:?} to {delivery} {dest} ({} byte packets)",
                config.send_interval,
                config.packet_len()
            );
        } else {
            log::info!(
                "transmitting unpaced to {delivery} {dest} ({} byte packets)",
                config.packet_len()
            );
        }

        let result = loop {
            if stop.is_stopped() {
                break Ok(());
            }

            if let Some(target) = schedule.target(stats.packets_sent + 1) {
                if Schedule::wait_before(target, Instant::now()).is_some() {
                    tokio::select! {
                        biased;
                        _ = stop.stopped() => break Ok(()),
                        _ = sleep_until(target) => {}
                    }
                }
                stats.last_scheduled_time = target;
            }

            let sequence = stats.next_sequence();
            let bytes = packet::encode(sequence, &config);
            if let Err(source) = socket.send_to(&bytes, dest).await {
                break Err(SocketError::Send { sequence, source });
            }
            stats.record_bytes(bytes.len());

            if throttle.should_report(stats.packets_sent) {
                status_fn(&Status {
                    sequence,
                    packet_len: bytes.len(),
                    rate_mbps: stats.rate_mbps(Instant::now()),
                });
            }
        };

        drop(socket);

        match &result {
            Ok(()) => log::info!(
                "stopped after {} packets ({} bytes)",
                stats.packets_sent,
                stats.bytes_sent
            ),
            Err(e) => log::error!("transmission failed after {} packets: {e}", stats.packets_sent),
        }
        result.map(|()| stats)
    }
}

/// Open a socket for `config` and transmit until `stop` fires.
pub async fn transmit(
    config: TransmitConfig,
    stop: StopSignal,
) -> Result<TransmissionStats, SocketError> {
    Transmitter::open(config)?.run(stop).await
}
