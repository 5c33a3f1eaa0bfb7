//! RDX headless client — entry point.
//!
//! ```text
//! rdx-client --host <addr> --user <name> --password <pw>
//! rdx-client --config <path>     Use config TOML
//! rdx-client --gen-config        Dump default config and exit
//! rdx-client --probe <n>         Disconnect after n bitmap batches
//! ```
//!
//! Connects a session and logs its events; rendering is a front end's
//! job, not this binary's.

mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rdx_core::{ConnectConfig, RdpClient, SessionEvent};

use config::ClientConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rdx-client", about = "Headless RDP client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rdx-client.toml")]
    config: PathBuf,

    /// Server host (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config).
    #[arg(long)]
    port: Option<u16>,

    /// Logon domain (overrides config).
    #[arg(long)]
    domain: Option<String>,

    /// Username (overrides config).
    #[arg(short, long)]
    user: Option<String>,

    /// Password (overrides config).
    #[arg(short, long)]
    password: Option<String>,

    /// Disconnect after this many bitmap batches.
    #[arg(long)]
    probe: Option<u64>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ClientConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(domain) = cli.domain {
        config.auth.domain = domain;
    }
    if let Some(user) = cli.user {
        config.auth.username = user;
    }
    if let Some(password) = cli.password {
        config.auth.password = password;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rdx-client v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Connect ──────────────────────────────────────────────

    let mut connect = ConnectConfig::new(config.server.host.clone(), config.server.port);
    connect.domain = config.auth.domain.clone();
    connect.username = config.auth.username.clone();
    connect.password = config.auth.password.clone();
    connect.width = config.display.width;
    connect.height = config.display.height;

    let (client, mut events) = match RdpClient::connect(connect).await {
        Ok(session) => session,
        Err(e) => {
            error!("connect failed: {e}");
            return Err(e.into());
        }
    };

    // ── 2. Event loop ───────────────────────────────────────────

    let mut batches: u64 = 0;
    while let Some(event) = events.next().await {
        match event {
            SessionEvent::Ready => info!("session ready"),
            SessionEvent::Bitmap(bitmaps) => {
                batches += 1;
                let pixels: usize = bitmaps
                    .iter()
                    .map(|b| b.width as usize * b.height as usize)
                    .sum();
                info!(
                    rectangles = bitmaps.len(),
                    pixels, batches, "bitmap update"
                );
                if cli.probe.is_some_and(|n| batches >= n) {
                    info!("probe complete; closing");
                    client.close().await;
                }
            }
            SessionEvent::PointerPosition { x, y } => info!(x, y, "pointer position"),
            SessionEvent::PointerUpdate(shape) => {
                info!(
                    cache = shape.cache_index,
                    width = shape.width,
                    height = shape.height,
                    "pointer shape"
                );
            }
            SessionEvent::PointerCached(index) => info!(index, "pointer from cache"),
            SessionEvent::PointerHide => info!("pointer hidden"),
            SessionEvent::PointerDefault => info!("pointer reset"),
            SessionEvent::Error(e) => warn!("session error: {e}"),
            SessionEvent::Close => {
                info!("session closed");
                break;
            }
        }
    }

    Ok(())
}
