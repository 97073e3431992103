// MIT License - Copyright (c) 2026 rnet contributors
// RNET bus probe

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use rnet::{Bus, BusConfig, BusEvent, RnetDeviceId, RnetPath, RnetUri};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "rnet-probe")]
#[command(about = "Talk to devices on an RNET bus")]
struct Cli {
    /// Bus address, e.g. rnet.tcp://192.168.1.50:9999 or rnet.serial:///dev/ttyUSB0?baud=19200
    #[arg(long, default_value = "rnet.tcp://127.0.0.1:9999")]
    uri: String,

    /// Device id this process uses on the bus
    #[arg(long, default_value = "00.00.70")]
    local_id: String,

    /// How long to wait for a connection before giving up
    #[arg(long, default_value_t = 10)]
    connect_seconds: u64,

    /// How long to listen for scan replies before printing the device tree
    #[arg(long, default_value_t = 3)]
    scan_seconds: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Request a value from a device and print it as hex
    Read {
        /// Device id, e.g. 00.00.7F
        device: String,
        /// Dotted path, e.g. 2.0
        path: String,
    },
    /// Write a hex value to a device
    Write {
        device: String,
        path: String,
        /// Value as hex digits, e.g. 0a0b0c
        value: String,
    },
    /// Print bus events until interrupted
    Watch {
        /// Forget devices silent for this many seconds
        #[arg(long, default_value_t = 600)]
        evict_seconds: u64,
    },
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        bail!("hex value must be an even number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte {:?}", &digits[i..i + 2]))
        })
        .collect()
}

fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

async fn wait_until_available(bus: &Bus, timeout: Duration) -> Result<()> {
    let mut state = bus.subscribe_state();
    let deadline = tokio::time::Instant::now() + timeout;
    while !bus.is_available() {
        tokio::select! {
            changed = state.changed() => {
                changed.context("Bus dropped while connecting")?;
            }
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = tokio::time::sleep_until(deadline) => bail!("Timed out connecting to the bus"),
        }
    }
    Ok(())
}

fn describe(event: &BusEvent) -> String {
    match event {
        BusEvent::StateChanged { old, new } => format!("state {old:?} -> {new:?}"),
        BusEvent::MessageSent(m) => format!("sent {m}"),
        BusEvent::MessageReceived(m) => format!("received {m}"),
        BusEvent::UnhandledError(e) => format!("error {e}"),
        BusEvent::CollectionChanged { object, change } => format!("{object:?} {change:?}"),
        BusEvent::BufferChanged { device, path, data } => {
            format!("{device} [{path}] = {}", to_hex(data))
        }
        BusEvent::DeviceEvent { device, event } => format!(
            "{device} event {:#06x} at [{}] data {:#06x} ({:?})",
            event.event_code, event.target_path, event.event_data, event.priority
        ),
    }
}

fn print_tree(bus: &Bus) {
    for controller in bus.controllers() {
        println!("controller {}", controller.id());
        for zone in controller.zones() {
            println!("  zone {}", zone.id());
            for device in zone.devices() {
                let kind = if device.is_local() { "local" } else { "remote" };
                let state = if device.is_active() { "active" } else { "inactive" };
                println!("    device {} ({kind}, {state})", device.id());
            }
        }
    }
}

async fn watch(bus: &Bus, max_idle: Duration) -> Result<()> {
    let mut events = bus.subscribe();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sweep = tokio::time::interval((max_idle / 2).max(Duration::from_secs(1)));

    info!("Watching bus. Send SIGINT/SIGTERM to stop.");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
                break;
            }
            _ = sweep.tick() => {
                let removed = bus.evict_inactive(max_idle);
                if removed > 0 {
                    info!("Evicted {removed} idle objects");
                }
            }
            event = events.recv() => match event {
                Ok(event) => println!("{}", describe(&event)),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=debug or RUST_LOG=rnet=trace).
    // Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // systemd journal already adds timestamps, so omit them when running under systemd
    if std::env::var_os("JOURNAL_STREAM").is_some() {
        tracing_subscriber::fmt().without_time().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let cli = Cli::parse();

    let uri: RnetUri = cli.uri.parse().context("Invalid bus URI")?;
    let local_id: RnetDeviceId = cli.local_id.parse().context("Invalid local device id")?;
    let config = BusConfig::builder().uri(uri).local_device_id(local_id).build();

    let bus = Bus::new(config);
    bus.start().await.context("Failed to start bus")?;

    let outcome = run(
        &bus,
        cli.command,
        Duration::from_secs(cli.connect_seconds),
        Duration::from_secs(cli.scan_seconds),
    )
    .await;

    if let Err(e) = bus.stop().await {
        warn!("Error stopping bus: {e}");
    }
    outcome
}

async fn run(
    bus: &Bus,
    command: Option<Command>,
    connect_timeout: Duration,
    scan_time: Duration,
) -> Result<()> {
    let Some(command) = command else {
        wait_until_available(bus, connect_timeout).await?;
        tokio::time::sleep(scan_time).await;
        print_tree(bus);
        return Ok(());
    };
    match command {
        Command::Read { device, path } => {
            let device: RnetDeviceId = device.parse().context("Invalid device id")?;
            let path: RnetPath = path.parse().context("Invalid path")?;
            wait_until_available(bus, connect_timeout).await?;
            let handle = bus.get_or_create_device(device)?.handle(path);
            match handle.request().await? {
                Some(data) => {
                    println!("{}", to_hex(&data));
                    Ok(())
                }
                None => Err(anyhow::anyhow!("No answer from {device} for [{path}]")),
            }
        }
        Command::Write { device, path, value } => {
            let device: RnetDeviceId = device.parse().context("Invalid device id")?;
            let path: RnetPath = path.parse().context("Invalid path")?;
            let data = parse_hex(&value)?;
            wait_until_available(bus, connect_timeout).await?;
            let handle = bus.get_or_create_device(device)?.handle(path);
            if handle.write(&data).await? {
                info!("Wrote {} bytes to {device} [{path}]", data.len());
                Ok(())
            } else {
                Err(anyhow::anyhow!("Write to {device} [{path}] was not acknowledged"))
            }
        }
        Command::Watch { evict_seconds } => {
            watch(bus, Duration::from_secs(evict_seconds.max(1))).await
        }
    }
}
