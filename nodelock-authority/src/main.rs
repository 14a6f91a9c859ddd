//! Node-lock signing authority
//!
//! Runs next to the issuer key and serves REMOTE-mode hosts:
//! 1. Signs license payloads so hosts never see the secret key
//! 2. Verifies serials for hosts without a local copy of the public key
//!
//! Usage:
//!   nodelock-authority --port 4100 --key authority.key --max-validity-days 365
//!
//! The authority keeps no license state; binding records live on each host.

use anyhow::{Context, Result};
use clap::Parser;
use nodelock_authority::{build_router, AuthorityState};
use nodelock_license::key;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "nodelock-authority")]
#[command(about = "Signing authority for node-locked licenses")]
struct Args {
    /// HTTP port to listen on
    #[arg(short, long, default_value = "4100")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: std::net::IpAddr,

    /// Path to the issuer key file (generated on first start)
    #[arg(short, long, default_value = "authority.key")]
    key: PathBuf,

    /// Longest validity window, in days, the authority will sign
    #[arg(long, default_value = "365", value_parser = clap::value_parser!(u64).range(1..=36500))]
    max_validity_days: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Node-lock authority starting...");
    let key_path = std::path::absolute(&args.key)
        .with_context(|| format!("Invalid key path {}", args.key.display()))?;
    let signing_key = key::load_or_generate_signing_key(&key_path)
        .with_context(|| format!("Failed to load issuer key {}", key_path.display()))?;

    let max_validity = Duration::from_secs(args.max_validity_days * 24 * 60 * 60);
    let state = Arc::new(AuthorityState::new(signing_key).with_max_validity(max_validity));
    let public_key = key::encode_public_key(&state.verifying_key());
    info!(key_id = state.key_id(), "Issuer key loaded");

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    println!("\n========================================");
    println!("  Node-lock Authority Running");
    println!("========================================");
    println!("  Key ID:     {}", state.key_id());
    println!("  HTTP:       http://{addr}");
    println!("  Max window: {} days", args.max_validity_days);
    println!("\n  Public key (NODELOCK_PUBLIC_KEY):");
    println!("  {public_key}");
    println!("========================================\n");

    axum::serve(listener, build_router(state))
        .await
        .context("HTTP server failed")
}
