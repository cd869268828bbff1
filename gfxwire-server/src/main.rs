//! gfxwire bridge — entry point.
//!
//! ```text
//! gfxwire                                   Run the bridge (same as `serve`)
//! gfxwire serve --listen 127.0.0.1:9000     Override the listen address
//! gfxwire gen-config                        Write default config to stdout
//! gfxwire check-destination <host> -p 3390  Evaluate the security policy
//! gfxwire --config <path> ...               Load a custom config TOML
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gfxwire_server::config::BridgeConfig;
use gfxwire_server::registry::MaxSessions;
use gfxwire_server::security::SecurityPolicy;
use gfxwire_server::service::{BridgeServer, UnavailableConnector};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gfxwire", version, about = "Remote desktop to browser streaming bridge")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gfxwire.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge listener.
    Serve {
        /// Listen address, overriding `network.listen_address`.
        #[arg(long)]
        listen: Option<String>,

        /// Concurrent session limit, overriding `sessions.max_sessions`.
        #[arg(long)]
        max_sessions: Option<String>,
    },

    /// Print the default configuration to stdout and exit.
    GenConfig,

    /// Check a destination against the configured security policy.
    CheckDestination {
        host: String,

        #[arg(short, long, default_value_t = 3389)]
        port: u16,
    },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // gen-config: dump defaults and exit.
    if let Some(Command::GenConfig) = cli.command {
        println!("{}", BridgeConfig::default().to_toml()?);
        return Ok(());
    }

    // Load config.
    let mut config = BridgeConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Some(Command::CheckDestination { host, port }) => {
            let policy = config
                .policy_path()
                .map(|path| SecurityPolicy::load_from_file(&path))
                .unwrap_or_default();
            let verdict = policy.validate(&host, port);
            if verdict.allowed {
                println!("allowed: {host}:{port}");
                return Ok(());
            }
            println!("denied: {}", verdict.reason.unwrap_or_default());
            std::process::exit(1);
        }
        Some(Command::Serve {
            listen,
            max_sessions,
        }) => {
            if let Some(listen) = listen {
                config.network.listen_address = listen;
            }
            if let Some(raw) = max_sessions {
                config.sessions.max_sessions = MaxSessions::parse(&raw);
            }
        }
        Some(Command::GenConfig) | None => {}
    }

    info!("gfxwire v{}", env!("CARGO_PKG_VERSION"));
    info!("listen address: {}", config.network.listen_address);
    info!("max sessions: {}", config.sessions.max_sessions);
    info!(
        "audio: {}",
        if config.audio.enabled { "enabled" } else { "disabled" }
    );
    warn!("no session engine is linked into this binary; connect requests will be refused");

    let server = BridgeServer::new(config, Arc::new(UnavailableConnector));
    let stop = server.shutdown_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    server.run().await?;

    Ok(())
}
