//! holehubd - HoleHub control plane server

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use holehub_api::{ApiServer, ApiServerConfig};
use holehub_auth::SessionKeys;
use holehub_control::{ControlConfig, ControlPlane};

/// HoleHub control plane: provisions holes and issues per-user certificates
#[derive(Parser, Debug)]
#[command(name = "holehubd")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Address the HTTP API binds to
    #[arg(long, env = "HOLEHUB_HOST", default_value = "127.0.0.1")]
    host: String,

    /// HTTP API port
    #[arg(long, env = "HOLEHUB_PORT", default_value = "3000")]
    port: u16,

    /// Public host reported to clients for rendezvous ports (defaults to --host)
    #[arg(long, env = "HOLEHUB_HOLE_HOST")]
    hole_host: Option<String>,

    /// Directory for activation artifacts and certificates
    #[arg(long, env = "HOLEHUB_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Lowest rendezvous port handed out
    #[arg(long, env = "HOLEHUB_MIN_PORT", default_value = "10000")]
    min_port: u16,

    /// Database URL (sqlite://... or postgres://...)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://holehub.db?mode=rwc")]
    database_url: String,

    /// Secret used to sign session tokens
    #[arg(long, env = "HOLEHUB_JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Tunnel server binary to spawn for started holes; without it only
    /// activation artifacts are written for an external supervisor
    #[arg(long, env = "HOLEHUB_SERVER_COMMAND")]
    server_command: Option<PathBuf>,

    /// Session lifetime in hours
    #[arg(long, env = "HOLEHUB_SESSION_TTL_HOURS", default_value = "24")]
    session_ttl_hours: i64,

    /// Validity of issued certificates in days
    #[arg(long, env = "HOLEHUB_CERT_VALIDITY_DAYS", default_value = "3650")]
    cert_validity_days: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    info!("Starting holehubd {} ({})", env!("GIT_TAG"), env!("GIT_HASH"));

    let bind_addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", cli.host, cli.port))?;

    let mut config = ControlConfig::new(
        &cli.config_dir,
        cli.hole_host.clone().unwrap_or_else(|| cli.host.clone()),
    )
    .with_min_port(cli.min_port)
    .with_cert_validity(Duration::from_secs(cli.cert_validity_days * 24 * 60 * 60));
    if let Some(command) = &cli.server_command {
        config = config.with_server_command(command);
    }

    std::fs::create_dir_all(config.certs_dir()).with_context(|| {
        format!("Failed to create config directory {}", cli.config_dir.display())
    })?;

    let plane = ControlPlane::open(config, &cli.database_url)
        .await
        .context("Failed to open control plane")?;

    let restored = plane
        .holes
        .reconcile()
        .await
        .context("Failed to reconcile started holes")?;
    if restored > 0 {
        info!("Re-activated {} started hole(s)", restored);
    }

    let secret = match cli.jwt_secret {
        Some(secret) => secret,
        None => {
            warn!("No --jwt-secret given, generated one; sessions will not survive a restart");
            format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
        }
    };
    let sessions = SessionKeys::new(secret.as_bytes())
        .with_ttl(chrono::Duration::hours(cli.session_ttl_hours));

    let holes = plane.holes.clone();
    let server = ApiServer::new(ApiServerConfig { bind_addr }, plane, sessions);
    let result = server.start(shutdown_signal()?).await;

    info!("Stopping tunnel servers...");
    holes.shutdown().await;
    info!("holehubd stopped");

    result
}

/// Resolves on SIGINT or SIGTERM
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()> + Send + 'static> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        Ok(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        })
    }

    #[cfg(not(unix))]
    {
        Ok(async {
            tokio::signal::ctrl_c().await.ok();
        })
    }
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
