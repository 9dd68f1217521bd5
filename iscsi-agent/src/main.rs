use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tonic::transport::Server;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use iscsi_agent::iscsi::{IscsiAdmCli, SessionManager};
use iscsi_agent::metrics;
use iscsi_agent::service::AgentService;
use iscsi_agent::service::proto::iscsi_agent_server::IscsiAgentServer;

#[derive(Parser, Debug)]
#[command(name = "iscsi-agent")]
#[command(about = "Host-side iSCSI session agent for block volume attach/detach")]
struct Args {
    /// gRPC listen address
    #[arg(long, env = "ADDRESS")]
    listen: String,

    /// Path to the iscsiadm binary
    #[arg(long, env = "ISCSIADM_PATH", default_value = "iscsiadm")]
    iscsiadm: String,

    /// Deadline for each iscsiadm invocation, in seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value = "120")]
    command_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Prometheus metrics HTTP address (e.g., 0.0.0.0:9091)
    /// If not set, metrics endpoint is disabled
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing with configured log level
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Initialize Prometheus metrics endpoint if configured
    if let Some(ref addr_str) = args.metrics_addr {
        let addr = addr_str
            .parse()
            .map_err(|e| format!("Invalid metrics address '{}': {}", addr_str, e))?;
        if let Err(e) = metrics::init_metrics(addr) {
            return Err(format!("Failed to initialize metrics: {}", e).into());
        }
    }

    info!("Starting iscsi-agent on {}", args.listen);
    info!("Log level: {}", args.log_level);
    info!("iscsiadm binary: {}", args.iscsiadm);
    info!("Command timeout: {}s", args.command_timeout_secs);

    let admin = Arc::new(IscsiAdmCli::new(
        args.iscsiadm,
        Duration::from_secs(args.command_timeout_secs),
    ));
    let sessions = Arc::new(SessionManager::new(admin));
    let service = AgentService::new(sessions);

    // Parse the listen address
    let addr = args.listen.parse()?;

    info!("gRPC server listening on {}", addr);

    // Start the gRPC server with graceful shutdown
    Server::builder()
        .add_service(IscsiAgentServer::new(service))
        .serve_with_shutdown(addr, async {
            shutdown_signal().await;
            info!("Shutdown signal received, draining connections...");
        })
        .await?;

    info!("iscsi-agent shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Unix-only: the agent runs on Linux hosts next to the initiator tool.
async fn shutdown_signal() {
    use signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGTERM handler: {}", e);
            None
        }
    };

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!("Failed to install SIGINT handler: {}", e);
            None
        }
    };

    tokio::select! {
        _ = async { sigterm.as_mut().unwrap().recv().await }, if sigterm.is_some() => {
            info!("Received SIGTERM");
        }
        _ = async { sigint.as_mut().unwrap().recv().await }, if sigint.is_some() => {
            info!("Received SIGINT");
        }
    }
}
