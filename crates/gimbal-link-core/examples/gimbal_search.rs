//! Gimbal Link Test Tool
//!
//! Sends one command to the gimbal controller and prints the acknowledgement.
//! Useful for checking wiring, baud rate and command codes on a new board.
//!
//! Usage:
//!   cargo run --example gimbal_search -- [OPTIONS]
//!
//! Options:
//!   --port PORT       Serial port (default: first port found)
//!   --baud RATE       Baud rate (default: 115200)
//!   --config FILE     Load link settings from a JSON file
//!   --command NAME    Command to send (default: SEARCH_TARGET)
//!   --yaw DEG         Yaw in degrees (default: 0)
//!   --pitch DEG       Pitch in degrees (default: 0)
//!   --list            List serial ports and exit
//!
//! Set RUST_LOG=gimbal_link_core=trace to see every byte on the wire.

use anyhow::{bail, Context};
use gimbal_link_core::config::LinkConfig;
use gimbal_link_core::protocol::{list_ports, Command, Dispatcher};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut config = LinkConfig::default();
    let mut port: Option<String> = None;
    let mut baud: Option<u32> = None;
    let mut command = Command::SearchTarget;
    let mut yaw = 0.0f32;
    let mut pitch = 0.0f32;

    let mut i = 0;
    while i < args.len() {
        let value = |i: usize| {
            args.get(i + 1)
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--port" | "-p" => port = Some(value(i)?.clone()),
            "--baud" | "-b" => baud = Some(value(i)?.parse().context("invalid baud rate")?),
            "--config" | "-c" => {
                let path = value(i)?;
                config = LinkConfig::load(path)
                    .with_context(|| format!("loading {path}"))?;
            }
            "--command" => command = value(i)?.parse()?,
            "--yaw" => yaw = value(i)?.parse().context("invalid yaw")?,
            "--pitch" => pitch = value(i)?.parse().context("invalid pitch")?,
            "--list" | "-l" => {
                for p in list_ports() {
                    println!("{}\t{}", p.name, p.product.as_deref().unwrap_or("-"));
                }
                return Ok(());
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => bail!("unknown option: {other}"),
        }
        // Every option except the flags above takes a value
        i += 2;
    }

    if let Some(port) = port {
        config.port_name = port;
    }
    if let Some(baud) = baud {
        config.baud_rate = baud;
    }
    if config.port_name.is_empty() {
        config.port_name = list_ports()
            .into_iter()
            .next()
            .map(|p| p.name)
            .context("no serial ports found; pass --port")?;
    }
    config.validate()?;

    println!(
        "Sending {} yaw={} pitch={} on {} @ {} baud",
        command, yaw, pitch, config.port_name, config.baud_rate
    );

    let dispatcher = Dispatcher::open(&config)?;
    let ack = dispatcher.process_one_packet(command, yaw, pitch)?;

    println!(
        "{}: echoed {:?} (code {:#04x})",
        if ack.success { "ACK" } else { "NACK" },
        ack.command,
        ack.code
    );
    if let Some(state) = ack.state {
        println!("Gimbal reports yaw={} pitch={}", state.yaw, state.pitch);
    }
    let stats = dispatcher.stats();
    println!(
        "{} frame(s) sent, {} received, {} retr{}",
        stats.tx_frames,
        stats.rx_frames,
        stats.retries,
        if stats.retries == 1 { "y" } else { "ies" }
    );
    Ok(())
}

fn print_help() {
    println!("Gimbal Link Test Tool");
    println!();
    println!("Usage: gimbal_search [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -p, --port PORT      Serial port (default: first port found)");
    println!("  -b, --baud RATE      Baud rate (default: 115200)");
    println!("  -c, --config FILE    Load link settings from a JSON file");
    println!("      --command NAME   SEARCH_TARGET, TRACK_TARGET, HOLD or CENTER");
    println!("      --yaw DEG        Yaw in degrees (default: 0)");
    println!("      --pitch DEG      Pitch in degrees (default: 0)");
    println!("  -l, --list           List serial ports and exit");
    println!("  -h, --help           Show this help");
}
