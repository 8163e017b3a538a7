//! Seven-Segment Display Control Tool
//!
//! CLI for driving the display through the sevenseg daemon via D-Bus.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sevenseg_client::{BusType, DeviceClient};
use sevenseg_hw::{Segment, SegmentPattern};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum CliBusType {
    /// Try session bus first, fall back to system bus
    #[default]
    Auto,
    /// Use session bus (for user services)
    Session,
    /// Use system bus (for system services)
    System,
}

impl From<CliBusType> for BusType {
    fn from(bus: CliBusType) -> Self {
        match bus {
            CliBusType::Auto => BusType::Auto,
            CliBusType::Session => BusType::Session,
            CliBusType::System => BusType::System,
        }
    }
}

#[derive(Parser)]
#[command(name = "sevensegctl")]
#[command(about = "Control tool for the seven-segment display daemon")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// D-Bus bus type to use
    #[arg(long, default_value = "auto", value_enum)]
    bus: CliBusType,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current segment states
    Read {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a raw bit string (e.g. 1010110); shorter strings leave later segments unchanged
    Write {
        /// Characters '1' light a segment, anything else turns it off
        bits: String,
    },
    /// Show a hex digit (0-9, a-f) or '-'
    Digit {
        /// Character to display
        digit: char,
    },
    /// Light exactly the given segments
    Segments {
        /// Segment letters (e.g. a,b,g) or a bit string
        pattern: String,
    },
    /// Flip one segment
    Toggle {
        /// Segment letter a-g
        segment: String,
    },
    /// Turn every segment off
    Clear,
    /// Show daemon and device status
    Status,
    /// Request daemon shutdown
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Connect to daemon
    let client = DeviceClient::connect_with_bus(cli.bus.into())
        .await
        .context("Failed to connect to daemon. Is sevensegd running?")?;

    match cli.command {
        Commands::Read { json } => handle_read(json, &client).await,
        Commands::Write { bits } => handle_write(&bits, &client).await,
        Commands::Digit { digit } => handle_digit(digit, &client).await,
        Commands::Segments { pattern } => handle_segments(&pattern, &client).await,
        Commands::Toggle { segment } => handle_toggle(&segment, &client).await,
        Commands::Clear => handle_show(SegmentPattern::empty(), &client).await,
        Commands::Status => handle_status(&client).await,
        Commands::Quit => {
            client.quit().await?;
            println!("Shutdown request sent to daemon");
            Ok(())
        }
    }
}

/// Renders lit segments as a comma list, or "(none)".
fn segment_list(pattern: &SegmentPattern) -> String {
    let segments = pattern.segments();
    if segments.is_empty() {
        return "(none)".to_string();
    }
    segments
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

async fn handle_read(json: bool, client: &DeviceClient) -> Result<()> {
    let pattern = client.pattern().await?;
    if json {
        let segments: Vec<String> = pattern.segments().iter().map(|s| s.to_string()).collect();
        let value = serde_json::json!({
            "bits": pattern.to_bit_string(),
            "segments": segments,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Segments: {}", pattern);
        println!("Lit: {}", segment_list(&pattern));
    }
    Ok(())
}

async fn handle_write(bits: &str, client: &DeviceClient) -> Result<()> {
    if bits.chars().any(|c| c != '0' && c != '1') {
        debug!("Bit string contains characters other than 0/1; they turn segments off");
    }
    let accepted = client.write_bits(bits).await?;
    println!("Wrote {} bytes", accepted);
    Ok(())
}

async fn handle_digit(digit: char, client: &DeviceClient) -> Result<()> {
    let pattern = SegmentPattern::digit(digit)
        .with_context(|| format!("No glyph for '{}'. Use 0-9, a-f or '-'", digit))?;
    client.show(pattern).await?;
    println!("Showing '{}' ({})", digit, pattern);
    Ok(())
}

async fn handle_segments(pattern: &str, client: &DeviceClient) -> Result<()> {
    let pattern: SegmentPattern = pattern.parse()?;
    handle_show(pattern, client).await
}

async fn handle_show(pattern: SegmentPattern, client: &DeviceClient) -> Result<()> {
    client.show(pattern).await?;
    println!("Lit: {}", segment_list(&pattern));
    Ok(())
}

async fn handle_toggle(segment: &str, client: &DeviceClient) -> Result<()> {
    let segment: Segment = segment.parse()?;
    let pattern = client.toggle(segment).await?;
    let state = if pattern.contains(segment) { "on" } else { "off" };
    println!("Segment {} {}", segment, state);
    Ok(())
}

async fn handle_status(client: &DeviceClient) -> Result<()> {
    let status = client.status().await?;
    let lines: Vec<String> = status.lines.iter().map(|l| l.to_string()).collect();
    println!("Daemon: running");
    println!("Device: {}", status.name);
    println!("Backend: {}", status.backend);
    println!("Lines ({}): {}", status.lines.len(), lines.join(", "));
    println!("Open sessions: {}", status.open_sessions);
    Ok(())
}
