//! Entry point for `pulzer`.
//!
//! Parses CLI arguments and dispatches into either **transmit** or
//! **listen** mode.  All actual work is delegated to library modules;
//! `main.rs` owns only process setup (logging, signal handling, argument
//! parsing).

use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pulzer::config::{
    DEFAULT_KEEP_ALIVE_INTERVAL_MS, DEFAULT_PORT, DEFAULT_SEND_INTERVAL_MS,
    DEFAULT_STATUS_THRESHOLD_MS, MULTICAST_GROUP,
};
use pulzer::{
    stop_channel, transmit, Listener, StopHandle, TransmitOptions, WifiLockType, WifiSleepPolicy,
    KEEP_ALIVE_PORT,
};

/// Periodic UDP heartbeat transmitter.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send heartbeats to the interface's broadcast address or the multicast group.
    Transmit {
        /// IPv4 address of the sending interface.
        #[arg(short, long)]
        interface: String,

        /// Destination port.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Send interval in milliseconds; 0 sends as fast as possible.
        #[arg(long, default_value_t = DEFAULT_SEND_INTERVAL_MS, allow_negative_numbers = true)]
        send_interval: f64,

        /// Interval in which receivers should send keep-alives (ms).
        #[arg(long, default_value_t = DEFAULT_KEEP_ALIVE_INTERVAL_MS)]
        keep_alive_interval: u32,

        /// Filler bytes appended to every packet.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        payload_size: i64,

        /// Send to 224.0.0.251 instead of the broadcast address.
        #[arg(long)]
        multicast: bool,

        /// Advisory wifi sleep policy: default, never-while-plugged, never.
        #[arg(long, default_value = "default")]
        wifi_sleep_policy: WifiSleepPolicy,

        /// Advisory wifi lock type: none, full, full-high-perf.
        #[arg(long, default_value = "none")]
        wifi_lock_type: WifiLockType,

        /// Below this send interval (ms) status lines are throttled.
        #[arg(long, default_value_t = DEFAULT_STATUS_THRESHOLD_MS)]
        status_threshold: u64,

        /// TTL for multicast packets.
        #[arg(long, default_value_t = 1)]
        multicast_ttl: u32,
    },
    /// Receive heartbeats and report packet loss.
    Listen {
        /// Port to listen on.
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Do not join the multicast group.
        #[arg(long)]
        no_multicast: bool,

        /// Port on the sender that keep-alives are sent to.
        #[arg(long, default_value_t = KEEP_ALIVE_PORT)]
        keep_alive_port: u16,
    },
}

/// Stop on the first Ctrl-C.
fn stop_on_ctrl_c(handle: StopHandle) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("interrupt received, stopping"),
            Err(e) => log::error!("cannot listen for Ctrl-C: {e}"),
        }
        handle.stop();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let (handle, stop) = stop_channel();

    match cli.mode {
        Mode::Transmit {
            interface,
            port,
            send_interval,
            keep_alive_interval,
            payload_size,
            multicast,
            wifi_sleep_policy,
            wifi_lock_type,
            status_threshold,
            multicast_ttl,
        } => {
            let config = TransmitOptions {
                interface: Some(interface),
                port,
                send_interval_ms: send_interval,
                keep_alive_interval_ms: keep_alive_interval,
                payload_size,
                multicast,
                wifi_sleep_policy,
                wifi_lock_type,
                status_threshold_ms: status_threshold,
                multicast_ttl,
            }
            .build()
            .context("invalid configuration")?;

            stop_on_ctrl_c(handle);
            transmit(config, stop).await.context("transmission failed")?;
        }
        Mode::Listen {
            port,
            no_multicast,
            keep_alive_port,
        } => {
            let group: Option<Ipv4Addr> = (!no_multicast).then_some(MULTICAST_GROUP);
            let listener = Listener::bind(port, group)
                .context("cannot start listener")?
                .with_keep_alive_port(keep_alive_port);

            stop_on_ctrl_c(handle);
            listener.run(stop).await.context("listener failed")?;
        }
    }

    Ok(())
}
