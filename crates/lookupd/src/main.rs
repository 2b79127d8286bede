// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lookup discovery daemon
//!
//! # Usage
//!
//! ```bash
//! # Start server on default port (4160)
//! lookupd
//!
//! # Custom port and broadcast address
//! lookupd --port 4170 --broadcast-address 10.0.0.5
//!
//! # Config file (JSON format)
//! lookupd --config lookupd.json
//! ```

use clap::Parser;
use lookupd::{version, LookupServer, ServerConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Lookup discovery daemon - producer registry for topics and channels
#[derive(Parser, Debug)]
#[command(name = "lookupd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// TCP port to listen on (0 = ephemeral)
    #[arg(short, long, default_value = "4160")]
    port: u16,

    /// HTTP port advertised to producers
    #[arg(long, default_value = "4161")]
    http_port: u16,

    /// Address advertised to producers (default: hostname)
    #[arg(long)]
    broadcast_address: Option<String>,

    /// Seconds without a heartbeat before a producer is inactive
    #[arg(long, default_value = "300")]
    inactivity_timeout: u64,

    /// Seconds a tombstoned producer stays hidden
    #[arg(long, default_value = "45")]
    tombstone_lifetime: u64,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Filter directive for a `--log-level` value; unknown levels fall back to info.
fn log_directive(level: &str) -> &str {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => level,
        _ => "info",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --log-level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directive(&args.log_level)));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    // Load or create config
    let config = if let Some(config_path) = args.config {
        info!("Loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        let defaults = ServerConfig::default();
        ServerConfig {
            bind_address: args.bind.parse()?,
            tcp_port: args.port,
            http_port: args.http_port,
            broadcast_address: args
                .broadcast_address
                .unwrap_or_else(|| defaults.broadcast_address.clone()),
            inactivity_timeout_secs: args.inactivity_timeout,
            tombstone_lifetime_secs: args.tombstone_lifetime,
            ..defaults
        }
    };

    info!("{}", version::string("lookupd"));
    info!("+----------------------------------------------------+");
    info!("|  Bind:      {:38} |", config.listen_addr());
    info!("|  HTTP port: {:38} |", config.http_port);
    info!("|  Broadcast: {:38} |", config.broadcast_address);
    info!("|  Hostname:  {:38} |", config.hostname);
    info!(
        "|  Liveness:  {:38} |",
        format!(
            "{}s inactive, {}s tombstone",
            config.inactivity_timeout_secs, config.tombstone_lifetime_secs
        )
    );
    info!("+----------------------------------------------------+");

    // Create and run server
    let server = LookupServer::bind(config).await?;

    // Handle shutdown signals
    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        server_handle.shutdown();
    });

    // Run server
    server.run().await?;

    info!("lookupd stopped");
    Ok(())
}
