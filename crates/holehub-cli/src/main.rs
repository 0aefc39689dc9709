//! HoleHub CLI - expose a local service through a hole

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use holehub_client::{
    AgentOptions, CachedHole, ClientAgent, ClientConfig, ClientError, ClientPaths, ControlClient,
    HoleCache, RetryPolicy, TlsTunnelEngine, CONFIG_KEYS, DEFAULT_RETRY_BUDGET,
};
use holehub_proto::{HoleStatus, Scheme};

#[derive(Parser, Debug)]
#[command(name = "holehub")]
#[command(about = "Expose local services through HoleHub tunnels", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Client state directory (defaults to ~/.holehub)
    #[arg(long, env = "HOLEHUB_HOME", global = true)]
    state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in and store the session token
    Login {
        /// Control plane address (host:port or URL)
        #[arg(long, env = "HOLEHUB_HOST")]
        host: Option<String>,
        /// User name or email
        #[arg(short, long, env = "HOLEHUB_USERNAME")]
        username: Option<String>,
        #[arg(long, env = "HOLEHUB_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Read or change the client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Create a hole, start it and keep a tunnel connected until interrupted
    Run {
        /// Scheme (tcp, udp, tcp6, udp6)
        #[arg(short, long, default_value = "tcp")]
        scheme: Scheme,
        /// Unique hole name
        #[arg(short, long)]
        name: Option<String>,
        /// Local host to forward to
        #[arg(long, default_value = "127.0.0.1")]
        local_host: String,
        /// Local port to forward to
        #[arg(short = 'p', long, default_value = "8080")]
        local_port: u16,
        /// Remove the hole on exit
        #[arg(long)]
        rm: bool,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// List holes
    Ls,
    /// Start an existing hole and keep its tunnel connected
    Start {
        /// Hole id or name
        hole: String,
        #[command(flatten)]
        retry: RetryArgs,
    },
    /// Stop a hole, interrupting the agent that drives it
    Stop {
        /// Hole id or name
        hole: String,
    },
    /// Stop and remove a hole
    Rm {
        /// Hole id or name
        hole: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print a value
    Get { key: String },
    /// Set a value (an empty value clears it)
    Set { key: String, value: String },
}

#[derive(clap::Args, Debug)]
struct RetryArgs {
    /// Connection attempts before giving up
    #[arg(long, default_value_t = DEFAULT_RETRY_BUDGET)]
    retries: u32,
    /// Seconds between connection attempts
    #[arg(long, default_value = "2")]
    retry_interval: u64,
}

impl RetryArgs {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_secs(self.retry_interval))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let paths = cli
        .state_dir
        .map(ClientPaths::new)
        .unwrap_or_else(ClientPaths::default_location);

    match cli.command {
        Commands::Login {
            host,
            username,
            password,
        } => handle_login(&paths, host, username, password).await,
        Commands::Config { command } => handle_config(&paths, command),
        Commands::Run {
            scheme,
            name,
            local_host,
            local_port,
            rm,
            retry,
        } => {
            let options = AgentOptions {
                scheme,
                name,
                local_host,
                local_port,
                auto_remove: rm,
                retry: retry.policy(),
                existing: None,
            };
            run_agent(&paths, options).await
        }
        Commands::Ls => handle_list(&paths).await,
        Commands::Start { hole, retry } => {
            let cached = HoleCache::new(&paths)
                .resolve(&hole)?
                .with_context(|| format!("Hole '{}' is not in the local cache", hole))?;
            let options = AgentOptions {
                scheme: cached.scheme,
                name: cached.name.clone(),
                local_host: cached.local_host.clone(),
                local_port: cached.local_port,
                auto_remove: false,
                retry: retry.policy(),
                existing: Some(cached.id),
            };
            run_agent(&paths, options).await
        }
        Commands::Stop { hole } => handle_stop(&paths, &hole).await.map(|_| ()),
        Commands::Rm { hole } => handle_remove(&paths, &hole).await,
    }
}

async fn handle_login(
    paths: &ClientPaths,
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let mut config = ClientConfig::load(paths)?;
    if let Some(host) = host {
        config.set("host", &host)?;
    }
    if let Some(username) = username {
        config.set("username", &username)?;
    }
    if let Some(password) = password {
        config.set("password", &password)?;
    }

    let (Some(username), Some(password)) = (config.username.clone(), config.password.clone())
    else {
        bail!("Username and password are required: pass --username/--password or set HOLEHUB_USERNAME/HOLEHUB_PASSWORD");
    };

    let mut client = ControlClient::new(&config.host);
    let session = client
        .signin(&username, &password)
        .await
        .with_context(|| format!("Failed to sign in to {}", client.base_url()))?;
    config.session_token = Some(session.token);
    config.save(paths)?;

    println!("Logged in as {} (session valid until {})", session.username, session.expires_at);
    Ok(())
}

fn handle_config(paths: &ClientPaths, command: ConfigCommands) -> Result<()> {
    let mut config = ClientConfig::load(paths)?;
    match command {
        ConfigCommands::Get { key } => match config.get(&key)? {
            Some(value) => println!("{}", value),
            None => println!(),
        },
        ConfigCommands::Set { key, value } => {
            config.set(&key, &value)?;
            config.save(paths)?;
            info!("Set {} (known keys: {})", key, CONFIG_KEYS.join(", "));
        }
    }
    Ok(())
}

async fn run_agent(paths: &ClientPaths, options: AgentOptions) -> Result<()> {
    let config = ClientConfig::load(paths)?;
    let local = format!("{}:{}", options.local_host, options.local_port);
    let mut agent = ClientAgent::new(config, paths.clone(), TlsTunnelEngine::new(), options);

    let shutdown = shutdown_signal()?;
    let report = agent.run(shutdown).await?;

    match (report.hole_id, report.port) {
        (Some(id), Some(port)) => println!(
            "Hole {} (port {}, forwarding to {}) finished with status {}",
            id,
            port,
            local,
            report
                .final_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".into())
        ),
        _ => println!("Interrupted before a hole was provisioned"),
    }
    Ok(())
}

async fn authenticated(paths: &ClientPaths) -> Result<ControlClient> {
    let mut config = ClientConfig::load(paths)?;
    let mut client = ControlClient::new(&config.host);
    if client.ensure_session(&mut config).await? {
        config.save(paths)?;
    }
    Ok(client)
}

async fn handle_list(paths: &ClientPaths) -> Result<()> {
    let cache = HoleCache::new(paths);

    let rows = match authenticated(paths).await {
        Ok(client) => match client.list_holes().await {
            Ok(list) => {
                let mut rows = Vec::with_capacity(list.holes.len());
                for hole in &list.holes {
                    let cached = cache.refresh(hole)?;
                    rows.push(Row {
                        id: hole.id.clone(),
                        name: hole.name.clone(),
                        scheme: hole.scheme,
                        port: cached.as_ref().and_then(|c| c.port),
                        local: cached.map(|c| format!("{}:{}", c.local_host, c.local_port)),
                        status: hole.status,
                    });
                }
                rows
            }
            Err(e) => cached_rows(&cache, e)?,
        },
        Err(e) => match e.downcast::<ClientError>() {
            Ok(e) => cached_rows(&cache, e)?,
            Err(e) => return Err(e),
        },
    };

    if rows.is_empty() {
        println!("No holes. Create one with: holehub run -p <local-port>");
        return Ok(());
    }

    println!(
        "{:<34} {:<16} {:<6} {:<7} {:<22} {}",
        "ID", "NAME", "SCHEME", "PORT", "LOCAL", "STATUS"
    );
    for row in rows {
        println!(
            "{:<34} {:<16} {:<6} {:<7} {:<22} {}",
            row.id,
            row.name.unwrap_or_else(|| "-".into()),
            row.scheme,
            row.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            row.local.unwrap_or_else(|| "-".into()),
            row.status
        );
    }
    Ok(())
}

struct Row {
    id: String,
    name: Option<String>,
    scheme: Scheme,
    port: Option<u16>,
    local: Option<String>,
    status: HoleStatus,
}

/// Fall back to the advisory cache when the control plane cannot be reached
fn cached_rows(cache: &HoleCache, error: ClientError) -> Result<Vec<Row>> {
    if !matches!(error, ClientError::Transport(_)) {
        return Err(error.into());
    }
    warn!("Control plane unreachable ({}), showing cached holes", error);

    Ok(cache
        .list()?
        .into_iter()
        .map(|hole| Row {
            local: Some(format!("{}:{}", hole.local_host, hole.local_port)),
            id: hole.id,
            name: hole.name,
            scheme: hole.scheme,
            port: hole.port,
            status: hole.status,
        })
        .collect())
}

/// Interrupt the owning agent if it is alive, then stop the hole remotely
async fn handle_stop(paths: &ClientPaths, hole: &str) -> Result<Option<CachedHole>> {
    let cache = HoleCache::new(paths);
    let cached = cache.resolve(hole)?;
    let id = cached.as_ref().map(|c| c.id.clone()).unwrap_or_else(|| hole.to_string());

    if let Some(pid) = cached.as_ref().and_then(|c| c.pid) {
        interrupt_agent(pid);
    }

    let client = authenticated(paths).await?;
    let ack = client.kill_hole(&id).await?;
    cache.set_status(&id, ack.status)?;
    println!("Hole {} {}", id, ack.status);
    Ok(cached)
}

async fn handle_remove(paths: &ClientPaths, hole: &str) -> Result<()> {
    let cached = handle_stop(paths, hole).await?;
    let id = cached.map(|c| c.id).unwrap_or_else(|| hole.to_string());

    let client = authenticated(paths).await?;
    match client.remove_hole(&id).await {
        Ok(ack) => println!("Hole {} {}", id, ack.status),
        Err(e) if e.is_not_found() => warn!("Hole {} was already gone", id),
        Err(e) => return Err(e.into()),
    }
    HoleCache::new(paths).remove(&id)?;
    Ok(())
}

#[cfg(unix)]
fn interrupt_agent(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    if pid as u32 == std::process::id() {
        return;
    }

    // SAFETY: signalling a pid has no memory safety implications
    let alive = unsafe { libc::kill(pid, 0) } == 0;
    if alive {
        info!("Interrupting agent process {}", pid);
        unsafe {
            libc::kill(pid, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
fn interrupt_agent(pid: u32) {
    warn!("Cannot signal agent process {} on this platform", pid);
}

/// Resolves on SIGINT or SIGTERM
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
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
