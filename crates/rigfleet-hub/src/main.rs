//! RigFleet Hub
//!
//! Accepts rig agent connections, dispatches commands to them and streams
//! fleet state to dashboards.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use rigfleet_core::config::{DEV_JWT_SECRET, load_config};
use rigfleet_core::tracing_init::{LogFormat, init_tracing};

use rigfleet_hub::hub::Hub;
use rigfleet_hub::server;
use rigfleet_hub::storage::HubDatabase;

#[derive(Parser, Debug)]
#[command(name = "rigfleet-hub")]
#[command(
    version,
    about = "RigFleet hub - agent connections, command dispatch and dashboards"
)]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// JWT secret for dashboard tokens.
    #[arg(long, global = true)]
    jwt_secret: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "RIGFLEET_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub (default).
    Serve {
        /// Address to listen on.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Provision a rig and print its agent token.
    AddRig {
        #[arg(long)]
        name: String,
    },
    /// Mint a dashboard access token.
    IssueToken {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(LogFormat::from_json_flag(args.log_json))?;

    let mut config = load_config(args.config.as_deref())?;
    if let Some(path) = args.db_path {
        config.server.database_path = Some(path);
    }
    if let Some(secret) = args.jwt_secret {
        config.server.jwt_secret = secret;
    }
    if let Some(Command::Serve { addr: Some(addr) }) = &args.command {
        config.server.addr = *addr;
    }
    config.validate()?;

    let db_path = config
        .database_path()
        .context("Cannot determine home directory for the default database path")?;
    info!(path = %db_path.display(), "Opening hub database");
    let db = HubDatabase::open(&db_path).await?;
    let hub = Hub::new(config, db).await?;

    match args.command {
        None | Some(Command::Serve { .. }) => serve(hub).await,
        Some(Command::AddRig { name }) => add_rig(&hub, &name).await,
        Some(Command::IssueToken { user }) => issue_token(&hub, &user),
    }
}

async fn serve(hub: Hub) -> anyhow::Result<()> {
    let addr = hub.config().server.addr;
    if hub.config().server.jwt_secret == DEV_JWT_SECRET {
        warn!("Using the built-in development JWT secret");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let background = hub.spawn_background(&shutdown_rx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        "Hub listening"
    );

    tokio::select! {
        result = axum::serve(listener, server::router(hub.clone())) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    hub.shutdown().await;
    let _ = shutdown_tx.send(true);
    for task in background {
        let _ = task.await;
    }

    info!("Hub stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn add_rig(hub: &Hub, name: &str) -> anyhow::Result<()> {
    let (rig, token) = hub.provision_rig(name).await?;
    println!("Rig:   {} ({})", rig.name, rig.id);
    println!("Token: {token}");
    println!("The token is shown only once; configure the agent with it now.");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn issue_token(hub: &Hub, user: &str) -> anyhow::Result<()> {
    let (token, expires_in) = hub.jwt().issue_access_token(user)?;
    println!("{token}");
    info!(user_id = %user, expires_in, "Dashboard token issued");
    Ok(())
}
