//! pushmux — multiplexed push-channel relay.
//!
//! A single-process daemon that fans one upstream push-channel connection
//! (SSE or WebSocket) per URL out to every connected port that started that
//! URL. Ports connect over a local WebSocket endpoint and speak the Port
//! Session Protocol: `start`, `listen`, `close`, `status`.
//!
//! Usage:
//!   pushmux                                  # Default port 4580, SSE upstream
//!   pushmux --port 8080                      # Custom port
//!   pushmux --transport websocket            # WebSocket upstream framing
//!   pushmux --baseline-event deploy-status   # Extra always-listened category

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use pushmux_protocol::Events;
use pushmux_relay::{Registry, SseUpstream, Upstream, WebSocketUpstream};
use pushmux_transport::{TransportConfig, TransportServer};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Upstream push-channel framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// Server-Sent Events with native named-event dispatch
    Sse,
    /// WebSocket frames carrying {Name, Data} JSON objects
    Websocket,
}

#[derive(Parser, Debug)]
#[command(name = "pushmux", about = "pushmux — multiplexed push-channel relay")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "4580")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Upstream transport used for every source
    #[arg(long, value_enum, default_value_t = TransportKind::Sse)]
    transport: TransportKind,

    /// Event category listened on every source from the moment it connects
    /// (repeatable; defaults to the built-in baseline set)
    #[arg(long = "baseline-event")]
    baseline_events: Vec<String>,

    /// Maximum concurrent port connections
    #[arg(long, default_value = "64")]
    max_connections: usize,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .unwrap_or_else(|e| panic!("Failed to open log file {}: {e}", log_path.display()));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let baseline = if cli.baseline_events.is_empty() {
        Events::baseline()
    } else {
        cli.baseline_events.clone()
    };

    let upstream: Arc<dyn Upstream> = match cli.transport {
        TransportKind::Sse => Arc::new(SseUpstream::new()),
        TransportKind::Websocket => Arc::new(WebSocketUpstream),
    };

    let registry = Arc::new(Registry::new(upstream, baseline.clone()));

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        max_connections: Some(cli.max_connections),
    };

    let mut transport = match TransportServer::start(transport_config, registry).await {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    let actual_port = transport.port();

    println!();
    println!("  pushmux relay running");
    println!();
    println!("  Port endpoint:   ws://{}:{}/ws", cli.hostname, actual_port);
    println!("  Health check:    http://{}:{}/health", cli.hostname, actual_port);
    println!("  Upstream:        {:?}", cli.transport);
    println!("  Baseline events: {}", baseline.join(", "));
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    let _ = tokio::signal::ctrl_c().await;

    println!();
    println!("  Shutting down...");
    transport.stop().await;
    println!("  Relay stopped.");
}
