// Ampio test application -- CLI tool for exercising an Ampio gateway
// through the ampio-ip driver.
//
// Usage:
//   ampio-test-app --host 192.168.1.50 monitor
//   ampio-test-app --host 192.168.1.50 monitor --listen 1305:5:tempf --duration 60
//   ampio-test-app --host 192.168.1.50 monitor --listen 111f:1:byte --feed 111f:1
//   ampio-test-app --host 192.168.1.50 binary 1 4 on
//   ampio-test-app --host 192.168.1.50 --username admin --password 12345 byte 111f 1 128
//
// Set RUST_LOG (e.g. RUST_LOG=ampio_ip=trace) for finer control over logging
// than --verbose gives.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use ampio_core::{ClientEvent, ReadingKind, format_mac, parse_mac};
use ampio_ip::{AmpioBuilder, AmpioClient, DEFAULT_PORT, Listener};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Ampio test application -- talks to a gateway from the command line.
#[derive(Parser)]
#[command(name = "ampio-test-app", version)]
struct Cli {
    /// Gateway host name or IP address.
    #[arg(long)]
    host: String,

    /// Gateway TCP port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Login user name sent during the handshake.
    #[arg(long)]
    username: Option<String>,

    /// Login password sent during the handshake.
    #[arg(long)]
    password: Option<String>,

    /// Seconds to wait for the first connection before giving up.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Log protocol traffic at debug level.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print channel changes and connection events.
    Monitor {
        /// Register a listener, as MAC:CHANNEL:KIND (e.g. 1305:5:tempf).
        #[arg(long = "listen", value_parser = parse_listen_target)]
        listen: Vec<ListenTarget>,

        /// Send a byte output every second, as MAC:CHANNEL, cycling 0-255.
        #[arg(long, value_parser = parse_feed_target)]
        feed: Option<FeedTarget>,

        /// Stop after this many seconds (0 runs until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },
    /// Switch a binary output on the gateway itself.
    Binary {
        /// Server MAC (0 or 1).
        #[arg(value_parser = parse_mac_arg)]
        mac: u32,
        /// Output channel, 0-7.
        channel: u8,
        /// "on" or "off".
        #[arg(value_parser = parse_on_off)]
        state: bool,
    },
    /// Set a byte output on a device.
    Byte {
        /// Device MAC in hex.
        #[arg(value_parser = parse_mac_arg)]
        mac: u32,
        /// Output channel.
        channel: u8,
        /// Value, 0-255.
        value: u8,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ListenTarget {
    mac: u32,
    channel: u8,
    kind: ReadingKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FeedTarget {
    mac: u32,
    channel: u8,
}

// ---------------------------------------------------------------------------
// Argument parsers
// ---------------------------------------------------------------------------

fn parse_mac_arg(s: &str) -> std::result::Result<u32, String> {
    parse_mac(s).ok_or_else(|| format!("invalid MAC '{s}': expected hex such as 1305 or 0x111f"))
}

fn parse_on_off(s: &str) -> std::result::Result<bool, String> {
    match s.to_lowercase().as_str() {
        "on" | "1" | "true" => Ok(true),
        "off" | "0" | "false" => Ok(false),
        _ => Err(format!("expected 'on' or 'off', got '{s}'")),
    }
}

fn parse_listen_target(s: &str) -> std::result::Result<ListenTarget, String> {
    let parts: Vec<&str> = s.split(':').collect();
    let [mac, channel, kind] = parts.as_slice() else {
        return Err(format!("expected MAC:CHANNEL:KIND, got '{s}'"));
    };
    Ok(ListenTarget {
        mac: parse_mac_arg(mac)?,
        channel: channel
            .parse()
            .map_err(|_| format!("invalid channel '{channel}'"))?,
        kind: kind.parse().map_err(|e| format!("{e}"))?,
    })
}

fn parse_feed_target(s: &str) -> std::result::Result<FeedTarget, String> {
    let (mac, channel) = s
        .split_once(':')
        .ok_or_else(|| format!("expected MAC:CHANNEL, got '{s}'"))?;
    Ok(FeedTarget {
        mac: parse_mac_arg(mac)?,
        channel: channel
            .parse()
            .map_err(|_| format!("invalid channel '{channel}'"))?,
    })
}

// ---------------------------------------------------------------------------
// Connection helpers
// ---------------------------------------------------------------------------

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn connect(cli: &Cli) -> Result<AmpioClient> {
    let mut builder = AmpioBuilder::new(&cli.host).port(cli.port);
    if let Some(username) = &cli.username {
        builder = builder.username(username);
    }
    if let Some(password) = &cli.password {
        builder = builder.password(password);
    }
    let address = builder.address();

    let client = builder
        .build()
        .await
        .with_context(|| format!("failed to start client for {address}"))?;
    client
        .wait_until_ready(Duration::from_secs(cli.connect_timeout))
        .await
        .with_context(|| format!("gateway at {address} did not become ready"))?;
    println!("Connected to {}", client.endpoint());
    Ok(client)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_monitor(
    client: &AmpioClient,
    listen: &[ListenTarget],
    feed: Option<FeedTarget>,
    duration_secs: u64,
) -> Result<()> {
    // Kept alive for the whole run so unregistering at the end matches.
    let mut listeners = Vec::with_capacity(listen.len());
    for target in listen {
        let listener = Listener::new(|mac, channel, kind, value| {
            println!("[listener] {}/{channel}/{kind} = {value}", format_mac(mac));
        });
        client.register_listener(target.mac, target.channel, target.kind, &listener);
        println!(
            "Listening on {}/{}/{}",
            format_mac(target.mac),
            target.channel,
            target.kind
        );
        listeners.push((*target, listener));
    }

    let mut event_rx = client.subscribe();
    let mut feed_tick = tokio::time::interval(Duration::from_secs(1));
    let mut feed_value: u8 = 0;

    println!("Monitoring gateway events (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted.");
                break;
            }
            _ = tokio::time::sleep(timeout) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                    break;
                }
            }
            _ = feed_tick.tick(), if feed.is_some() => {
                if let Some(FeedTarget { mac, channel }) = feed {
                    match client.send_byte_output(mac, channel, feed_value) {
                        Ok(()) => println!("[feed] {}/{channel} <- {feed_value}", format_mac(mac)),
                        Err(e) => println!("[feed] error: {e}"),
                    }
                    feed_value = feed_value.wrapping_add(1);
                }
            }
            event = event_rx.recv() => match event {
                Ok(ClientEvent::ChannelChanged(change)) => {
                    println!(
                        "[change] {}/{}/{} = {}",
                        format_mac(change.mac),
                        change.channel,
                        change.kind,
                        change.value
                    );
                }
                Ok(other) => println!("[event] {other:?}"),
                Err(RecvError::Lagged(n)) => {
                    println!("[warning] missed {n} events (consumer too slow)");
                }
                Err(RecvError::Closed) => {
                    println!("Event channel closed.");
                    break;
                }
            },
        }
    }

    for (target, listener) in &listeners {
        client.unregister_listener(target.mac, target.channel, target.kind, listener);
    }
    Ok(())
}

fn cmd_binary(client: &AmpioClient, mac: u32, channel: u8, on: bool) -> Result<()> {
    client
        .send_binary_output(mac, channel, on)
        .with_context(|| format!("binary output {}/{channel}", format_mac(mac)))?;
    println!(
        "Queued binary output {}/{channel} -> {}",
        format_mac(mac),
        if on { "on" } else { "off" }
    );
    Ok(())
}

fn cmd_byte(client: &AmpioClient, mac: u32, channel: u8, value: u8) -> Result<()> {
    client
        .send_byte_output(mac, channel, value)
        .with_context(|| format!("byte output {}/{channel}", format_mac(mac)))?;
    println!("Queued byte output {}/{channel} -> {value}", format_mac(mac));
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.host.trim().is_empty() {
        bail!("--host must not be empty");
    }

    let client = connect(&cli).await?;

    let result = match &cli.command {
        Command::Monitor {
            listen,
            feed,
            duration,
        } => cmd_monitor(&client, listen, *feed, *duration).await,
        Command::Binary {
            mac,
            channel,
            state,
        } => cmd_binary(&client, *mac, *channel, *state),
        Command::Byte {
            mac,
            channel,
            value,
        } => cmd_byte(&client, *mac, *channel, *value),
    };

    let result = match result {
        Ok(()) => client
            .flush(Duration::from_secs(cli.connect_timeout))
            .await
            .context("queued command was not sent to the gateway"),
        Err(e) => Err(e),
    };

    client.shutdown().await;
    result
}
