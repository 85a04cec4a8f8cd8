// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDHT ring peer
//!
//! One peer of a circular distributed hash table: ring liveness detection,
//! churn repair, and file-lookup routing over loopback UDP/TCP sockets.
//!
//! # Usage
//!
//! ```bash
//! # Start peer 1 with initial successors 3 and 5
//! cdht-peer 1 3 5
//!
//! # Quiet the ping log lines from startup
//! cdht-peer 1 3 5 --ping off
//! ```

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cdht_peer::config::PeerConfig;
use cdht_peer::peer::Peer;

/// One peer of a circular distributed hash table ring.
#[derive(Parser, Debug)]
#[command(name = "cdht-peer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// This peer's identifier, in [0, 255].
    self_id: u32,

    /// Initial first successor identifier, in [0, 255].
    s1: u32,

    /// Initial second successor identifier, in [0, 255].
    s2: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Whether to show PING_REQ / PING_RES lines at startup ("on" or "off").
    #[arg(long, default_value = "on")]
    ping: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let show_pings = match args.ping.as_str() {
        "on" => true,
        "off" => false,
        other => {
            eprintln!("invalid --ping value {other:?}: expected \"on\" or \"off\"");
            std::process::exit(2);
        }
    };
    let config = PeerConfig::new(args.self_id, args.s1, args.s2, show_pings)?;

    info!(
        id = config.id,
        s1 = config.s1,
        s2 = config.s2,
        port = config.port(),
        "starting ring peer"
    );

    let (peer, mut events) = Peer::new(config);
    let commands = peer.command_sender();

    let ctrl_c_commands = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            // Ctrl-C is equivalent to the `quit` command: it must go through
            // the same graceful-quit path so predecessors get a PC_QUIT.
            let _ = ctrl_c_commands.send("quit".to_string());
        }
    });

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("[{:?}] {}", event.kind, event.message);
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if commands.send(line).is_err() {
                break;
            }
        }
    });

    peer.run().await?;

    info!("peer stopped");
    Ok(())
}
