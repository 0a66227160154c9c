//! Wire format for heartbeat datagrams.
//!
//! Every datagram the transmitter emits is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (five header fields, filler payload).
//! - Encoding a sequence number plus [`TransmitConfig`] into a byte buffer.
//! - Decoding a received datagram back into a [`Packet`] for receivers.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All integers are unsigned 32-bit **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Send Interval (ms)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Keep-Alive Interval (ms)                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Wifi Sleep Policy                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Wifi Lock Type                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Filler Payload ...                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 20 bytes.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::config::TransmitConfig;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 20;

/// Byte used to pad the payload.  Receivers only check the length.
pub const FILLER: u8 = b'X';

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_SEND_INTERVAL: usize = 4;
const OFF_KEEP_ALIVE: usize = 8;
const OFF_SLEEP_POLICY: usize = 12;
const OFF_LOCK_TYPE: usize = 16;

// ---------------------------------------------------------------------------
// Wifi hints
// ---------------------------------------------------------------------------

/// Advisory sleep policy a receiver may apply to its wifi radio.
///
/// Carried through unchanged; the transmitter never acts on it.  Values a
/// newer peer may send are kept as [`WifiSleepPolicy::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WifiSleepPolicy {
    #[default]
    Default,
    NeverWhilePlugged,
    Never,
    Other(u32),
}

impl WifiSleepPolicy {
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::NeverWhilePlugged => 1,
            Self::Never => 2,
            Self::Other(value) => value,
        }
    }

    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Self::Default,
            1 => Self::NeverWhilePlugged,
            2 => Self::Never,
            other => Self::Other(other),
        }
    }
}

impl FromStr for WifiSleepPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "default" => Ok(Self::Default),
            "never-while-plugged" => Ok(Self::NeverWhilePlugged),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown wifi sleep policy: {other}")),
        }
    }
}

impl fmt::Display for WifiSleepPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::NeverWhilePlugged => write!(f, "never-while-plugged"),
            Self::Never => write!(f, "never"),
            Self::Other(value) => write!(f, "unknown ({value})"),
        }
    }
}

/// Advisory wifi lock a receiver may hold while listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WifiLockType {
    #[default]
    None,
    Full,
    FullHighPerf,
    Other(u32),
}

impl WifiLockType {
    pub fn to_wire(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Full => 1,
            // 2 is the scan-only lock on the receiving platform; never emitted.
            Self::FullHighPerf => 3,
            Self::Other(value) => value,
        }
    }

    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Self::None,
            1 => Self::Full,
            3 => Self::FullHighPerf,
            other => Self::Other(other),
        }
    }
}

impl FromStr for WifiLockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "none" => Ok(Self::None),
            "full" => Ok(Self::Full),
            "full-high-perf" => Ok(Self::FullHighPerf),
            other => Err(format!("unknown wifi lock type: {other}")),
        }
    }
}

impl fmt::Display for WifiLockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Full => write!(f, "full"),
            Self::FullHighPerf => write!(f, "full-high-perf"),
            Self::Other(value) => write!(f, "unknown ({value})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// Fixed-size heartbeat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// 1 for the first packet of a run, then +1 per packet.
    pub sequence: u32,
    /// Configured send interval, rounded to whole milliseconds.
    pub send_interval_ms: u32,
    /// How often the receiver should send its own keep-alives.
    pub keep_alive_interval_ms: u32,
    pub wifi_sleep_policy: WifiSleepPolicy,
    pub wifi_lock_type: WifiLockType,
}

impl Header {
    /// Header for tick `sequence` of a run configured by `config`.
    pub fn for_tick(sequence: u32, config: &TransmitConfig) -> Self {
        Self {
            sequence,
            send_interval_ms: config.wire_send_interval_ms(),
            keep_alive_interval_ms: config.keep_alive_interval_ms,
            wifi_sleep_policy: config.wifi_sleep_policy,
            wifi_lock_type: config.wifi_lock_type,
        }
    }

    fn write_to(&self, buf: &mut [u8]) {
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[OFF_SEND_INTERVAL..OFF_SEND_INTERVAL + 4]
            .copy_from_slice(&self.send_interval_ms.to_be_bytes());
        buf[OFF_KEEP_ALIVE..OFF_KEEP_ALIVE + 4]
            .copy_from_slice(&self.keep_alive_interval_ms.to_be_bytes());
        buf[OFF_SLEEP_POLICY..OFF_SLEEP_POLICY + 4]
            .copy_from_slice(&self.wifi_sleep_policy.to_wire().to_be_bytes());
        buf[OFF_LOCK_TYPE..OFF_LOCK_TYPE + 4]
            .copy_from_slice(&self.wifi_lock_type.to_wire().to_be_bytes());
    }
}

/// A complete heartbeat datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Encode the datagram for tick `sequence`.
///
/// The result is exactly `HEADER_LEN + config.payload_size` bytes long.
pub fn encode(sequence: u32, config: &TransmitConfig) -> Vec<u8> {
    let mut buf = vec![FILLER; HEADER_LEN + config.payload_size];
    Header::for_tick(sequence, config).write_to(&mut buf);
    buf
}

impl Packet {
    /// Parse a [`Packet`] from a received datagram.
    ///
    /// Everything after the header is taken as payload; its content is not
    /// checked.  Unrecognised wifi hint values are kept as `Other`.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let sequence = read_u32(buf, OFF_SEQ);
        let send_interval_ms = read_u32(buf, OFF_SEND_INTERVAL);
        let keep_alive_interval_ms = read_u32(buf, OFF_KEEP_ALIVE);

        let wifi_sleep_policy = WifiSleepPolicy::from_wire(read_u32(buf, OFF_SLEEP_POLICY));
        let wifi_lock_type = WifiLockType::from_wire(read_u32(buf, OFF_LOCK_TYPE));

        Ok(Packet {
            header: Header {
                sequence,
                send_interval_ms,
                keep_alive_interval_ms,
                wifi_sleep_policy,
                wifi_lock_type,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Length of this packet on the wire.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

/// Errors that can arise when parsing a received datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than the 20-byte header")]
    BufferTooShort(usize),
}
