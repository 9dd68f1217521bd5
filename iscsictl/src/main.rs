//! iSCSI session control CLI
//!
//! Local counterpart of the iscsi-agent gRPC service: discovers and logs
//! in/out of every target behind a list of portals, driving the same
//! session orchestration directly. Per-portal failures are logged, never
//! turned into a failing exit code, so automation that runs this in an
//! init or sidecar container keeps going past unreachable portals.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

use iscsi_agent::iscsi::{IscsiAdmCli, SessionManager};

#[derive(Parser, Debug)]
#[command(name = "iscsictl")]
#[command(about = "iSCSI session login/logout for block volume attach/detach")]
struct Cli {
    /// Path to the iscsiadm binary
    #[arg(long, env = "ISCSIADM_PATH", default_value = "iscsiadm")]
    iscsiadm: String,

    /// Deadline for each iscsiadm invocation, in seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value = "120")]
    command_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover and log in to every target behind the given portals
    Login {
        /// Comma-separated list of discovery portals
        #[arg(long)]
        portals: String,
    },
    /// Discover and log out of every target behind the given portals
    Logout {
        /// Comma-separated list of discovery portals
        #[arg(long)]
        portals: String,
    },
    /// Block forever; keeps a companion container alive
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let admin = Arc::new(IscsiAdmCli::new(
        cli.iscsiadm,
        Duration::from_secs(cli.command_timeout_secs),
    ));
    let sessions = SessionManager::new(admin);

    match cli.command {
        Commands::Login { portals } => login(&sessions, &portals).await,
        Commands::Logout { portals } => logout(&sessions, &portals).await,
        Commands::Watch => watch().await,
    }

    Ok(())
}

async fn login(sessions: &SessionManager, portals: &str) {
    require_portals(portals);
    info!("Starting to login portals: {}", portals);

    for portal in portals.split(',') {
        if let Err(e) = sessions.discover_and_login(portal).await {
            error!(portal = %portal, error = %e, "Failed to login portal");
        }
    }

    info!("Finished to login portals");
}

async fn logout(sessions: &SessionManager, portals: &str) {
    require_portals(portals);
    info!("Starting to logout portals: {}", portals);

    for portal in portals.split(',') {
        if let Err(e) = sessions.discover_and_logout(portal).await {
            error!(portal = %portal, error = %e, "Failed to logout portal");
        }
    }

    info!("Finished to logout portals");
}

async fn watch() {
    info!("Watching; blocking until terminated");
    std::future::pending::<()>().await;
}

/// An empty portal list is a usage error, caught before any orchestration.
fn require_portals(portals: &str) {
    if portals.is_empty() {
        error!("--portals is required");
        std::process::exit(1);
    }
}
