//! Compliance audit router service binary.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use audit_router::{
    build_router, AlertPipeline, AppState, Config, DirectoryClient, JiraConnector, LdapDirectory,
    Metrics, SplunkClient, TicketSettings, TrackerFactory,
};

#[derive(Parser, Debug)]
#[command(name = "audit-router", version, about = "Route compliance alerts into Jira")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "CAR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Emit logs as JSON
    #[arg(long, env = "CAR_JSON_LOGS")]
    json_logs: bool,
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("audit_router={default_level},tower_http=info")))?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.listen_port {
        config.listen_port = port;
    }

    init_tracing(config.verbose, cli.json_logs)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting compliance audit router");
    info!(settings = ?config, "Loaded configuration");
    if config.dry_run {
        warn!("Dry-run mode enabled; no Jira tickets will be created or updated");
    }

    let metrics = Metrics::new().context("Failed to register metrics")?;
    let ticket_settings = Arc::new(TicketSettings::from_config(&config));
    let trackers: Arc<dyn TrackerFactory> = Arc::new(
        JiraConnector::new(config.jira.clone()).context("Failed to create Jira HTTP client")?,
    );
    let search = Arc::new(SplunkClient::new(&config.splunk).context("Failed to create Splunk client")?);

    let directory = if config.ldap.enabled {
        let ldap = LdapDirectory::new(config.ldap.clone()).context("Failed to create LDAP client")?;
        info!(host = %config.ldap.host, "LDAP lookups enabled");
        Some(Arc::new(ldap) as Arc<dyn DirectoryClient>)
    } else {
        info!("LDAP lookups disabled");
        None
    };

    let pipeline = AlertPipeline::new(
        search,
        directory,
        trackers.clone(),
        ticket_settings.clone(),
        metrics.clone(),
    );
    let app = build_router(AppState {
        pipeline,
        trackers,
        ticket_settings,
        metrics,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Compliance audit router stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down gracefully"),
        () = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
