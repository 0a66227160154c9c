//! Transmission configuration.
//!
//! [`TransmitOptions`] holds raw values as an outer layer (the CLI) supplies
//! them.  [`TransmitOptions::build`] validates them and resolves the
//! destination, producing an immutable [`TransmitConfig`].  Nothing touches
//! the network until a valid config exists.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};
use std::time::Duration;

use thiserror::Error;

use crate::packet::{WifiLockType, WifiSleepPolicy, HEADER_LEN};

/// Default destination port.
pub const DEFAULT_PORT: u16 = 51423;

pub const DEFAULT_SEND_INTERVAL_MS: f64 = 1000.0;

/// Longest send interval; the header field is a u32 of milliseconds.
pub const MAX_SEND_INTERVAL_MS: f64 = u32::MAX as f64;

pub const DEFAULT_KEEP_ALIVE_INTERVAL_MS: u32 = 100;

/// Below this send interval, status lines are throttled.
pub const DEFAULT_STATUS_THRESHOLD_MS: u64 = 100;

/// Multicast group used when multicast delivery is selected.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);

/// Largest UDP payload an IPv4 datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// Largest filler payload that still fits a single datagram.
pub const MAX_PAYLOAD_SIZE: usize = MAX_DATAGRAM - HEADER_LEN;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Invalid configuration, detected before any socket is created.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("payload size must not be negative (got {0})")]
    NegativePayloadSize(i64),
    #[error("payload size {size} exceeds the {max}-byte maximum")]
    PayloadTooLarge { size: usize, max: usize },
    #[error("send interval must be between 0 and 4294967295 ms (got {0})")]
    InvalidInterval(f64),
    #[error("status threshold must be greater than zero")]
    InvalidStatusThreshold,
    #[error("no interface address given")]
    MissingInterface,
    #[error("interface address {0:?} does not resolve to an IPv4 address")]
    UnresolvableInterface(String),
    #[error("interface address must not be 0.0.0.0")]
    UnspecifiedInterface,
}

// ---------------------------------------------------------------------------
// TransmitOptions
// ---------------------------------------------------------------------------

/// Unvalidated transmission settings.
#[derive(Debug, Clone)]
pub struct TransmitOptions {
    /// Local IPv4 address (or host name) of the sending interface.
    pub interface: Option<String>,
    pub port: u16,
    /// `0.0` disables pacing.  Fractional values are allowed.
    pub send_interval_ms: f64,
    pub keep_alive_interval_ms: u32,
    pub payload_size: i64,
    /// Send to [`MULTICAST_GROUP`] instead of the interface's broadcast address.
    pub multicast: bool,
    pub wifi_sleep_policy: WifiSleepPolicy,
    pub wifi_lock_type: WifiLockType,
    pub status_threshold_ms: u64,
    pub multicast_ttl: u32,
}

impl Default for TransmitOptions {
    fn default() -> Self {
        Self {
            interface: None,
            port: DEFAULT_PORT,
            send_interval_ms: DEFAULT_SEND_INTERVAL_MS,
            keep_alive_interval_ms: DEFAULT_KEEP_ALIVE_INTERVAL_MS,
            payload_size: 0,
            multicast: false,
            wifi_sleep_policy: WifiSleepPolicy::Default,
            wifi_lock_type: WifiLockType::None,
            status_threshold_ms: DEFAULT_STATUS_THRESHOLD_MS,
            multicast_ttl: 1,
        }
    }
}

impl TransmitOptions {
    /// Validate every field and resolve the destination address.
    pub fn build(self) -> Result<TransmitConfig, ConfigError> {
        if self.payload_size < 0 {
            return Err(ConfigError::NegativePayloadSize(self.payload_size));
        }
        let payload_size = self.payload_size as usize;
        if payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::PayloadTooLarge {
                size: payload_size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let send_interval = parse_interval(self.send_interval_ms)?;
        if self.status_threshold_ms == 0 {
            return Err(ConfigError::InvalidStatusThreshold);
        }

        let name = self.interface.ok_or(ConfigError::MissingInterface)?;
        let interface = resolve_interface(&name)?;
        let destination = destination_for(interface, self.port, self.multicast);

        Ok(TransmitConfig {
            interface,
            destination,
            send_interval,
            keep_alive_interval_ms: self.keep_alive_interval_ms,
            payload_size,
            wifi_sleep_policy: self.wifi_sleep_policy,
            wifi_lock_type: self.wifi_lock_type,
            status_threshold: Duration::from_millis(self.status_threshold_ms),
            multicast_ttl: self.multicast_ttl,
        })
    }
}

fn parse_interval(ms: f64) -> Result<Duration, ConfigError> {
    if !(0.0..=MAX_SEND_INTERVAL_MS).contains(&ms) {
        return Err(ConfigError::InvalidInterval(ms));
    }
    Duration::try_from_secs_f64(ms / 1000.0).map_err(|_| ConfigError::InvalidInterval(ms))
}

/// Parse `name` as an IPv4 literal, falling back to name resolution.
fn resolve_interface(name: &str) -> Result<Ipv4Addr, ConfigError> {
    let addr = match name.parse::<Ipv4Addr>() {
        Ok(addr) => addr,
        Err(_) => (name, 0)
            .to_socket_addrs()
            .map_err(|_| ConfigError::UnresolvableInterface(name.to_string()))?
            .find_map(|a| match a.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| ConfigError::UnresolvableInterface(name.to_string()))?,
    };
    if addr.is_unspecified() {
        return Err(ConfigError::UnspecifiedInterface);
    }
    Ok(addr)
}

/// Broadcast address of `interface`'s /24, or the fixed multicast group.
pub fn destination_for(interface: Ipv4Addr, port: u16, multicast: bool) -> SocketAddrV4 {
    let ip = if multicast {
        MULTICAST_GROUP
    } else {
        let [a, b, c, _] = interface.octets();
        Ipv4Addr::new(a, b, c, 255)
    };
    SocketAddrV4::new(ip, port)
}

// ---------------------------------------------------------------------------
// TransmitConfig
// ---------------------------------------------------------------------------

/// Validated, immutable settings for one transmission run.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitConfig {
    /// Address the socket binds to (ephemeral port).
    pub interface: Ipv4Addr,
    pub destination: SocketAddrV4,
    /// Zero means unpaced.
    pub send_interval: Duration,
    pub keep_alive_interval_ms: u32,
    pub payload_size: usize,
    pub wifi_sleep_policy: WifiSleepPolicy,
    pub wifi_lock_type: WifiLockType,
    pub status_threshold: Duration,
    pub multicast_ttl: u32,
}

impl TransmitConfig {
    /// Send interval as embedded in packet headers, rounded half-up to
    /// whole milliseconds.
    pub fn wire_send_interval_ms(&self) -> u32 {
        let ms = (self.send_interval.as_nanos() + 500_000) / 1_000_000;
        u32::try_from(ms).unwrap_or(u32::MAX)
    }

    pub fn is_multicast(&self) -> bool {
        self.destination.ip().is_multicast()
    }

    pub fn is_paced(&self) -> bool {
        !self.send_interval.is_zero()
    }

    /// Size of every datagram this config produces.
    pub fn packet_len(&self) -> usize {
        HEADER_LEN + self.payload_size
    }

    pub fn destination_addr(&self) -> SocketAddr {
        SocketAddr::V4(self.destination)
    }
}
