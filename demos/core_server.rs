//! Reactant Core server
//!
//! Run with: cargo run --example core_server -- [OPTIONS]
//!
//! Examples:
//!   cargo run --example core_server                         # 0.0.0.0:10112
//!   cargo run --example core_server -- --bind 127.0.0.1:4000
//!   cargo run --example core_server -- --integrity --verbose
//!
//! Nodes must use the same key, IV and integrity setting. Logging follows
//! RUST_LOG; `--verbose` raises the default level to debug.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use reactant::{CodecConfig, CoreConfig, CoreServer, SharedKey};

/// Key and IV used when none are given. Replace them in any real deployment.
const DEMO_KEY: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";
const DEMO_IV: &str = "000102030405060708090a0b0c0d0e0f";

/// Reactant Core: relays encrypted publishes to channel subscribers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:10112")]
    bind: SocketAddr,

    /// AES-256 key as 64 hex digits
    #[arg(long, default_value = DEMO_KEY)]
    key: String,

    /// CBC initialization vector as 32 hex digits
    #[arg(long, default_value = DEMO_IV)]
    iv: String,

    /// Append an HMAC-SHA256 tag to every frame
    #[arg(long)]
    integrity: bool,

    /// Maximum concurrent Nodes (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_connections: usize,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long, default_value = "0")]
    read_timeout: u64,

    /// Print periodic statistics every N seconds (0 = never)
    #[arg(long, default_value = "30")]
    stats_interval: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
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
    let mut config = CoreConfig::new(CodecConfig::new(shared_key).integrity(args.integrity))
        .bind(args.bind)
        .max_connections(args.max_connections);
    if args.read_timeout > 0 {
        config = config.read_timeout(Duration::from_secs(args.read_timeout));
    }

    let server = match CoreServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to start Core: {}", e);
            std::process::exit(1);
        }
    };
    println!("Core listening on {}", server.local_addr());

    let handle = server.handle();
    if args.stats_interval > 0 {
        let handle = handle.clone();
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(stats) = handle.stats().await else {
                    break;
                };
                println!(
                    "Stats: nodes={} channels={} publishes={} relays={} drops={} evictions={}",
                    stats.active_connections,
                    stats.channels,
                    stats.publishes,
                    stats.relays,
                    stats.relay_drops,
                    stats.evictions,
                );
            }
        });
    }

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    Ok(())
}
