//! `pulzer`: periodic UDP heartbeat transmitter.
//!
//! # Architecture
//!
//! ```text
//!  TransmitOptions ──build()──▶ TransmitConfig
//!                                    │
//!  ┌─────────────────────────────────▼──────┐
//!  │              Transmitter               │
//!  │  Schedule (anchored ticks)             │
//!  │  StatusThrottle ─▶ status callback     │
//!  │  TransmissionStats                     │
//!  └────┬──────────────────────────▲────────┘
//!       │ encode(seq, config)      │ StopSignal
//!  ┌────▼──────┐             ┌─────┴──────┐
//!  │  packet   │             │ StopHandle │ (Ctrl-C, tests)
//!  └────┬──────┘             └────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────────┐   broadcast / multicast   ┌──────────┐
//!  │ BeaconSocket  │ ─────────────────────────▶│ Listener │
//!  └───────────────┘                           └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`config`]: option validation and destination selection
//! - [`packet`]: wire format (encode / decode)
//! - [`schedule`]: anchored pacing and status throttling
//! - [`stats`]: packet/byte counters and send rate
//! - [`socket`]: UDP socket setup and the send abstraction
//! - [`stop`]: cooperative cancellation
//! - [`transmitter`]: the paced send loop
//! - [`receiver`]: listening side with loss accounting and keep-alives

pub mod config;
pub mod packet;
pub mod receiver;
pub mod schedule;
pub mod socket;
pub mod stats;
pub mod stop;
pub mod transmitter;

pub use config::{ConfigError, TransmitConfig, TransmitOptions};
pub use packet::{encode, Packet, PacketError, WifiLockType, WifiSleepPolicy};
pub use receiver::{Listener, LossSnapshot, LossTracker, KEEP_ALIVE_BYTE, KEEP_ALIVE_PORT};
pub use socket::{BeaconSocket, DatagramSink, SocketError};
pub use stats::{Status, TransmissionStats};
pub use stop::{stop_channel, StopHandle, StopSignal};
pub use transmitter::{transmit, Transmitter};
