// MIT License - Copyright (c) 2026 Peter Wright
// Command-line front end

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wattbox_client::constants::{DEFAULT_PASSWORD, DEFAULT_USERNAME};
use wattbox_client::{
    ClientConfig, ClientEvent, OutletAction, TlsConfig, TransportKind, WattBox,
};

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "wattbox")]
#[command(about = "Query and control a WattBox over its integration protocol")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "wattbox.toml")]
    config: PathBuf,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Identity, outlets, power and UPS readings
    Info,
    /// Outlet names and states
    Outlets,
    /// Switch an outlet (0 with RESET resets all outlets)
    Set {
        outlet: u32,
        /// ON, OFF, TOGGLE or RESET
        action: OutletAction,
        /// Seconds before power returns after RESET
        #[arg(long)]
        delay: Option<u32>,
    },
    /// Send a raw `?Name[=args]` query
    Query { name: String, args: Vec<String> },
    /// Send a raw `!Name[=args]` control
    Control { name: String, args: Vec<String> },
    /// Print unsolicited messages and connection events until Ctrl+C
    Monitor,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Config {
    device: DeviceToml,
    #[serde(default)]
    tls: TlsToml,
}

#[derive(Debug, Deserialize)]
struct DeviceToml {
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    transport: TransportKind,
    #[serde(default = "default_username")]
    username: String,
    #[serde(default = "default_password")]
    password: String,
    #[serde(default = "default_command_timeout")]
    command_timeout_ms: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_ms: u64,
    #[serde(default = "default_reconnect_delay")]
    reconnect_delay_ms: u64,
    #[serde(default = "default_max_backoff")]
    max_backoff_ms: u64,
    #[serde(default)]
    max_connect_attempts: Option<u32>,
    #[serde(default = "default_auth_attempts")]
    auth_attempts: u32,
}

#[derive(Debug, Default, Deserialize)]
struct TlsToml {
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    ca_cert: Option<PathBuf>,
    #[serde(default)]
    accept_invalid_certs: bool,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}
fn default_password() -> String {
    DEFAULT_PASSWORD.to_string()
}
fn default_command_timeout() -> u64 {
    10000
}
fn default_connect_timeout() -> u64 {
    10000
}
fn default_reconnect_delay() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    60000
}
fn default_auth_attempts() -> u32 {
    3
}

fn build_client_config(config: Config) -> ClientConfig {
    let device = config.device;
    let mut builder = ClientConfig::builder()
        .host(device.host)
        .transport(device.transport)
        .credentials(device.username, device.password)
        .command_timeout(Duration::from_millis(device.command_timeout_ms))
        .connect_timeout(Duration::from_millis(device.connect_timeout_ms))
        .reconnect_base_delay(Duration::from_millis(device.reconnect_delay_ms))
        .max_reconnect_backoff(Duration::from_millis(device.max_backoff_ms))
        .max_auth_attempts(device.auth_attempts)
        .tls(TlsConfig {
            server_name: config.tls.server_name,
            ca_cert: config.tls.ca_cert,
            accept_invalid_certs: config.tls.accept_invalid_certs,
        });
    if let Some(port) = device.port {
        builder = builder.port(port);
    }
    if let Some(attempts) = device.max_connect_attempts {
        builder = builder.max_connect_attempts(attempts);
    }
    builder.build()
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn show_info(wattbox: &WattBox, json: bool) -> Result<()> {
    let info = wattbox.device_info().await?;
    if json {
        return print_json(&info);
    }

    let sys = &info.system;
    println!("Model:        {}", sys.model);
    println!("Hostname:     {}", sys.hostname);
    println!("Firmware:     {}", sys.firmware);
    println!("Service tag:  {}", sys.service_tag);
    println!("Auto reboot:  {}", on_off(info.auto_reboot_enabled));
    if let Some(power) = &info.power_status {
        println!(
            "Power:        {:.1} W, {:.2} A, {:.1} V (safe voltage: {})",
            power.power_watts, power.current_amps, power.voltage_volts, power.safe_voltage
        );
    }
    match &info.ups_status {
        Some(ups) => println!(
            "UPS:          {}% charge, {}% load, {} min, health {}{}",
            ups.battery_charge,
            ups.battery_load,
            ups.battery_runtime,
            ups.battery_health,
            if ups.power_lost { ", ON BATTERY" } else { "" }
        ),
        None if info.ups_connected => println!("UPS:          connected, no status"),
        None => println!("UPS:          not connected"),
    }

    println!("\n--- Outlets ({}) ---", info.outlets.len());
    for outlet in &info.outlets {
        match &outlet.power {
            Some(p) => println!(
                "  {:2}: {:24} {:3}  {:7.1} W {:6.2} A",
                outlet.index,
                outlet.name,
                on_off(outlet.status),
                p.power_watts,
                p.current_amps
            ),
            None => println!(
                "  {:2}: {:24} {:3}",
                outlet.index,
                outlet.name,
                on_off(outlet.status)
            ),
        }
    }
    Ok(())
}

async fn show_outlets(wattbox: &WattBox, json: bool) -> Result<()> {
    let outlets = wattbox.outlets().await?;
    if json {
        return print_json(&outlets);
    }
    for outlet in &outlets {
        println!("{:2}: {:24} {}", outlet.index, outlet.name, on_off(outlet.status));
    }
    Ok(())
}

fn on_off(state: bool) -> &'static str {
    if state { "ON" } else { "OFF" }
}

async fn monitor(wattbox: &WattBox, json: bool) -> Result<()> {
    let mut events = wattbox.subscribe();
    info!("Monitoring, press Ctrl+C to stop");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Unsolicited(msg)) => {
                    if json {
                        print_json(&msg)?;
                    } else {
                        println!("{} {}", msg.received_at.format("%H:%M:%S"), msg);
                    }
                }
                Ok(ClientEvent::StateChanged { from, to }) => info!("Connection {} -> {}", from, to),
                Ok(ClientEvent::Reconnecting { attempt, delay }) => {
                    info!("Reconnect attempt {} in {:?}", attempt, delay)
                }
                Ok(ClientEvent::Fault(reason)) => warn!("Fault: {}", reason),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Dropped {} event(s)", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn run(wattbox: &WattBox, command: Action, json: bool) -> Result<()> {
    match command {
        Action::Info => show_info(wattbox, json).await,
        Action::Outlets => show_outlets(wattbox, json).await,
        Action::Set {
            outlet,
            action,
            delay,
        } => {
            if outlet == 0 {
                wattbox.reset_all_outlets().await?;
            } else {
                wattbox.set_outlet(outlet, action, delay).await?;
            }
            println!("OK");
            Ok(())
        }
        Action::Query { name, args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let fields = wattbox.connection().query(&name, &args).await?;
            if json {
                print_json(&fields)
            } else {
                println!("{}", fields.join(","));
                Ok(())
            }
        }
        Action::Control { name, args } => {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            wattbox.connection().control(&name, &args).await?;
            println!("OK");
            Ok(())
        }
        Action::Monitor => monitor(wattbox, json).await,
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG controls verbosity (e.g. RUST_LOG=wattbox_client=debug). Default: info.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config file {}", cli.config.display()))?;
    let config: Config = toml::from_str(&config_text).context("Failed to parse config file")?;
    let client_config = build_client_config(config);

    info!("Connecting to WattBox at {}", client_config.address());
    let wattbox = WattBox::connect(client_config)
        .await
        .context("Failed to connect to WattBox")?;

    let result = run(&wattbox, cli.command, cli.json).await;
    wattbox.close().await;
    result
}
