use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{info, warn};

use mpqsync::{ProtocolVersion, Server, ServerConfig, ServerEvent};

/// Headless daemon speaking the mpqsync patch protocol
#[derive(Debug, Parser)]
#[command(name = "mpqsyncd", version, about = "mpq data-file sync daemon")]
struct DaemonOpts {
    /// Bind address, also advertised to clients in SERVER_INFO
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Listening port (0 picks an ephemeral port)
    #[arg(long, default_value_t = 12345)]
    port: u16,

    /// Server display name sent in SERVER_INFO
    #[arg(long, default_value = "mpqsync")]
    name: String,

    /// Directory scanned (top level only) for data archives
    #[arg(long, default_value = "Data")]
    data_dir: PathBuf,

    /// Archive extension to catalog, without the dot
    #[arg(long, default_value = "mpq")]
    ext: String,

    /// Announcement text file
    #[arg(long, default_value = "G.txt")]
    notice_file: PathBuf,

    /// Speak the legacy newline-framed protocol instead of V2
    #[arg(long)]
    legacy: bool,

    /// Drop connections idle for this many seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    idle_timeout_secs: u64,

    /// Append one JSONL entry per served sync request to this file
    #[arg(long)]
    sync_log: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opts = DaemonOpts::parse();

    let config = ServerConfig {
        bind_address: opts.bind,
        bind_port: opts.port,
        server_name: opts.name,
        data_dir: opts.data_dir,
        notice_path: opts.notice_file,
        data_extension: opts.ext,
        protocol: if opts.legacy {
            ProtocolVersion::Legacy
        } else {
            ProtocolVersion::V2
        },
        idle_timeout: (opts.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(opts.idle_timeout_secs)),
        sync_log: opts.sync_log,
        ..ServerConfig::default()
    };

    println!("Starting mpqsync daemon:");
    println!("  Bind: {}:{}", config.bind_address, config.bind_port);
    println!("  Data: {}", config.data_dir.display());
    println!("  Notice: {}", config.notice_path.display());
    println!(
        "  Protocol: {}",
        if config.protocol.is_legacy() { "legacy" } else { "v2" }
    );

    let (mut server, mut events) = Server::start(config).context("failed to start server")?;
    info!(addr = %server.local_addr(), "listening");

    // Ctrl-C flips a flag; the event loop below does the actual stop so
    // sockets close in an orderly way instead of exiting mid-write
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })
        .context("failed to set Ctrl-C handler")?;
    }

    loop {
        if interrupted.swap(false, Ordering::SeqCst) {
            info!("interrupt received, stopping");
            server.stop();
        }
        match events.try_recv() {
            Ok(event) => log_event(&event),
            Err(TryRecvError::Empty) => {
                if !server.is_running() {
                    break;
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(TryRecvError::Disconnected) => break,
        }
    }
    server.stop();
    info!("daemon exit");
    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Started { addr } => info!(%addr, "server started"),
        ServerEvent::Stopped => info!("server stopped"),
        ServerEvent::ClientConnected { id, peer } => info!(id, %peer, "client connected"),
        ServerEvent::ClientDisconnected { id, peer } => info!(id, %peer, "client disconnected"),
        ServerEvent::DataError { path, detail } => {
            warn!(path = %path.display(), %detail, "data error")
        }
    }
}
