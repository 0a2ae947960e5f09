//! lmi-server: let-me-in terminal server.
//!
//! Issues access and refresh tokens over a small HTTP API and bridges
//! token-gated WebSocket connections to PTY-backed shells.

mod auth;
mod config;
mod error;
mod gate;
mod server;
mod session;
mod store;
mod terminal;
mod transport;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{CliOverrides, ServerConfig};
use server::LmiServer;
use session::PtyLauncher;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::{MemoryStore, SqliteStore, Store};
use tracing::{error, info, warn};

/// lmi-server: let-me-in terminal server
#[derive(Parser, Debug)]
#[command(name = "lmi-server", version, about = "Token-gated web terminal server")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.lmi/config.toml")]
    config: String,

    /// Database URL (overrides the config file)
    #[arg(long, env = "LMI_DATABASE_URL")]
    database_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP and terminal server
    Serve(ServeArgs),
    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(clap::Args, Debug)]
struct ServeArgs {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Shell command launched for each terminal connection
    #[arg(long)]
    shell: Option<String>,

    /// Directory served under /static
    #[arg(long)]
    static_dir: Option<String>,

    /// Hex-encoded token signing secret
    #[arg(long, env = "LMI_TOKEN_SECRET", hide_env_values = true)]
    token_secret: Option<String>,

    /// Password pepper
    #[arg(long, env = "PEPPER", hide_env_values = true)]
    pepper: Option<String>,

    /// Keep all records in memory instead of the database
    #[arg(long)]
    in_memory: bool,
}

#[derive(Subcommand, Debug)]
enum DbAction {
    /// Create any missing tables and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %format!("{e:#}"), "fatal");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = PathBuf::from(&cli.config);
    match cli.command {
        Command::Serve(args) => {
            let overrides = CliOverrides {
                bind: args.bind,
                port: args.port,
                shell: args.shell,
                static_dir: args.static_dir,
                database_url: cli.database_url,
                token_secret: args.token_secret,
                pepper: args.pepper,
            };
            let config = ServerConfig::load(Some(&config_path), &overrides)
                .context("failed to load config")?;
            serve(config, args.in_memory).await
        }
        Command::Db {
            action: DbAction::Migrate,
        } => {
            let overrides = CliOverrides {
                database_url: cli.database_url,
                ..Default::default()
            };
            let config = ServerConfig::load(Some(&config_path), &overrides)
                .context("failed to load config")?;
            SqliteStore::connect(&config.database_url)
                .await
                .context("failed to open database")?;
            info!(url = %config.database_url, "schema up to date");
            Ok(())
        }
    }
}

async fn serve(config: ServerConfig, in_memory: bool) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        port = config.port,
        shell = %config.shell,
        "starting lmi-server"
    );

    let store: Arc<dyn Store> = if in_memory {
        warn!("using in-memory store; all records are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(
            SqliteStore::connect(&config.database_url)
                .await
                .context("failed to open database")?,
        )
    };

    let server = LmiServer::new(config, store, Arc::new(PtyLauncher))
        .context("failed to create server")?;
    server
        .run(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
