//! Reactant sensor Node
//!
//! Run with: cargo run --example sensor_node -- [OPTIONS]
//!
//! Examples:
//!   cargo run --example sensor_node -- --node-id 1 --subscribe temp
//!   cargo run --example sensor_node -- --node-id 2 --publish temp --period-ms 500
//!
//! Without real hardware the published readings come from a simulated
//! MCP3008 temperature probe.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reactant::{adc_to_celsius, CodecConfig, NodeClient, NodeConfig, SensorPublisher, SharedKey};

const DEMO_KEY: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";
const DEMO_IV: &str = "000102030405060708090a0b0c0d0e0f";

/// Reactant Node: publishes sensor readings and prints subscribed channels
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address of the Core
    #[arg(short, long, default_value = "127.0.0.1:10112")]
    core: SocketAddr,

    /// Node identifier (1..=32767)
    #[arg(short, long, default_value = "1")]
    node_id: u32,

    /// AES-256 key as 64 hex digits
    #[arg(long, default_value = DEMO_KEY)]
    key: String,

    /// CBC initialization vector as 32 hex digits
    #[arg(long, default_value = DEMO_IV)]
    iv: String,

    /// Expect an HMAC-SHA256 tag on every frame
    #[arg(long)]
    integrity: bool,

    /// Channels to subscribe to (repeatable)
    #[arg(short, long)]
    subscribe: Vec<String>,

    /// Channel to publish simulated temperature readings on
    #[arg(short, long)]
    publish: Option<String>,

    /// Publishing period in milliseconds
    #[arg(long, default_value = "1000")]
    period_ms: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Simulated probe sweeping the 10-bit ADC range around room temperature
fn simulated_probe() -> impl FnMut() -> reactant::Result<f32> + Send + 'static {
    let mut raw: u16 = 90;
    move || {
        raw = if raw >= 110 { 90 } else { raw + 1 };
        Ok(adc_to_celsius(raw))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let shared_key = SharedKey::from_hex(&args.key, &args.iv)?;
    let codec = CodecConfig::new(shared_key).integrity(args.integrity);
    let client = Arc::new(NodeClient::connect(NodeConfig::new(args.node_id, args.core, codec)).await?);
    println!("Node {} connected to {}", client.node_id(), client.peer_addr());

    for channel in &args.subscribe {
        let name = channel.clone();
        client
            .subscribe(channel, move |payload| println!("[{}] {}", name, payload))
            .await?;
    }

    let publisher = match &args.publish {
        Some(channel) => Some(
            SensorPublisher::new(Arc::clone(&client), channel.as_str(), simulated_probe())?
                .period(Duration::from_millis(args.period_ms))
                .spawn(),
        ),
        None => None,
    };

    match publisher {
        Some(task) => {
            tokio::select! {
                result = task => {
                    if let Err(e) = result? {
                        eprintln!("Publisher stopped: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => println!("\nDisconnecting..."),
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            println!("\nDisconnecting...");
        }
    }

    client.disconnect().await;
    Ok(())
}
