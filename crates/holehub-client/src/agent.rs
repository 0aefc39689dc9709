//! The client agent
//!
//! Drives one hole from registration to teardown:
//!
//! ```text
//! Idle -> Registering -> Provisioned -> Connecting -> Connected
//!                                          ^             |
//!                                          +- Disconnected
//! any state -> Terminated
//! ```
//!
//! Connecting runs under a bounded [`RetryPolicy`], with a fresh budget every
//! time the agent re-enters it. Once a hole exists the agent always stops it
//! on the way out (and removes it when asked to), whether it exits because of
//! an interrupt, an exhausted budget or a registration failure.

use std::future::Future;
use std::pin::{pin, Pin};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use holehub_proto::{HoleStatus, Scheme};

use crate::engine::join_host_port;
use crate::retry::{RetryError, RetryPolicy};
use crate::{
    CachedHole, ClientConfig, ClientError, ClientPaths, ControlClient, HoleCache, TunnelEngine,
    TunnelTarget,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Registering,
    Provisioned,
    Connecting,
    Connected,
    Disconnected,
    Terminated,
}

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub scheme: Scheme,
    pub name: Option<String>,
    pub local_host: String,
    pub local_port: u16,
    /// Remove the hole on exit instead of only stopping it
    pub auto_remove: bool,
    pub retry: RetryPolicy,
    /// Drive an existing hole (id or name from the local cache)
    pub existing: Option<String>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            scheme: Scheme::Tcp,
            name: None,
            local_host: "127.0.0.1".to_string(),
            local_port: 8080,
            auto_remove: false,
            retry: RetryPolicy::default(),
            existing: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentExit {
    /// The shutdown signal fired
    Interrupted,
    /// The agent's cancellation token fired
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AgentReport {
    pub exit: AgentExit,
    pub hole_id: Option<String>,
    pub port: Option<u16>,
    /// Number of successful tunnel connections
    pub connections: u32,
    /// Status acknowledged by the control plane during teardown
    pub final_status: Option<HoleStatus>,
}

/// One `holehub run` invocation
///
/// The agent owns the hole it created or resumed for its whole lifetime.
/// Reports and the transition history stay readable after [`ClientAgent::run`]
/// returns, which the CLI uses for its exit message.
pub struct ClientAgent<E> {
    control: ControlClient,
    config: ClientConfig,
    paths: ClientPaths,
    cache: HoleCache,
    engine: E,
    options: AgentOptions,
    cancel: CancellationToken,
    state: AgentState,
    history: Vec<AgentState>,
    hole: Option<CachedHole>,
    connections: u32,
}

impl<E: TunnelEngine> ClientAgent<E> {
    pub fn new(config: ClientConfig, paths: ClientPaths, engine: E, options: AgentOptions) -> Self {
        let control = ControlClient::new(&config.host).with_token(config.session_token.clone());
        Self {
            control,
            cache: HoleCache::new(&paths),
            config,
            paths,
            engine,
            options,
            cancel: CancellationToken::new(),
            state: AgentState::Idle,
            history: vec![AgentState::Idle],
            hole: None,
            connections: 0,
        }
    }

    /// Token aborting the agent between or during connection attempts
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Every state visited so far, in order
    pub fn history(&self) -> &[AgentState] {
        &self.history
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn transition(&mut self, next: AgentState) {
        debug!("Agent state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }

    /// Run until `shutdown` resolves, the cancel token fires or connecting
    /// gives up
    ///
    /// Teardown happens before this returns, on success and on error. When the
    /// agent never got as far as creating a hole there is nothing to tear down
    /// and the report carries no hole id.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Api`] when the control plane rejects a request, for
    ///   example bad credentials (code 4)
    /// - [`ClientError::Unreachable`] when the retry budget runs out
    /// - [`ClientError::UnknownHole`] when resuming a hole the cache does not know
    pub async fn run<F>(&mut self, shutdown: F) -> Result<AgentReport, ClientError>
    where
        F: Future<Output = ()>,
    {
        let outcome = self.drive(pin!(shutdown)).await;
        if let Err(e) = &outcome {
            error!("Agent failed: {}", e);
        }

        let hole_id = self.hole.as_ref().map(|h| h.id.clone());
        let port = self.hole.as_ref().and_then(|h| h.port);
        let final_status = self.teardown().await;
        self.transition(AgentState::Terminated);

        outcome.map(|exit| AgentReport {
            exit,
            hole_id,
            port,
            connections: self.connections,
            final_status,
        })
    }

    async fn drive<F>(&mut self, mut shutdown: Pin<&mut F>) -> Result<AgentExit, ClientError>
    where
        F: Future<Output = ()>,
    {
        self.transition(AgentState::Registering);
        tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Ok(AgentExit::Interrupted),
            session = self.authenticate() => session?,
        }

        // Not raced against shutdown: a create dropped mid-flight can commit
        // a hole whose id never reaches the agent
        let hole = self.acquire_hole().await?;
        if shutdown.as_mut().now_or_never().is_some() {
            return Ok(AgentExit::Interrupted);
        }

        let target = tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Ok(AgentExit::Interrupted),
            target = self.provision(hole) => target?,
        };
        self.transition(AgentState::Provisioned);

        loop {
            self.transition(AgentState::Connecting);
            let policy = self.options.retry;
            let engine = &self.engine;
            let cancel = &self.cancel;
            let target_ref = &target;

            let connected = tokio::select! {
                biased;
                _ = shutdown.as_mut() => return Ok(AgentExit::Interrupted),
                result = policy.run(cancel, move |attempt| {
                    debug!(attempt, "Connecting to {}", target_ref.remote);
                    engine.connect(target_ref)
                }) => result,
            };

            let mut link = match connected {
                Ok(link) => link,
                Err(RetryError::Cancelled { .. }) => return Ok(AgentExit::Cancelled),
                Err(RetryError::Exhausted {
                    attempts,
                    last_error,
                }) => {
                    return Err(ClientError::Unreachable {
                        endpoint: target.remote.clone(),
                        attempts,
                        reason: last_error.to_string(),
                    })
                }
            };

            self.connections += 1;
            self.transition(AgentState::Connected);
            info!("Forwarding {} -> {}", target.remote, target.local_addr);

            let processed = tokio::select! {
                biased;
                _ = shutdown.as_mut() => return Ok(AgentExit::Interrupted),
                _ = self.cancel.cancelled() => return Ok(AgentExit::Cancelled),
                result = link.process() => result,
            };
            match processed {
                Ok(()) => info!("Tunnel connection closed, reconnecting"),
                Err(e) => warn!("Tunnel connection failed: {}, reconnecting", e),
            }
            self.transition(AgentState::Disconnected);
        }
    }

    /// Reuse the cached session or log in once
    async fn authenticate(&mut self) -> Result<(), ClientError> {
        if self.control.ensure_session(&mut self.config).await? {
            self.config.save(&self.paths)?;
        }
        Ok(())
    }

    /// Create the hole, or look up the cached one, and record it for teardown
    /// before anything else can fail
    async fn acquire_hole(&mut self) -> Result<CachedHole, ClientError> {
        let hole = match self.options.existing.clone() {
            Some(id_or_name) => {
                let cached = self
                    .cache
                    .resolve(&id_or_name)?
                    .ok_or(ClientError::UnknownHole(id_or_name))?;
                let descriptor = self.control.get_hole(&cached.id).await?;
                self.cache.refresh(&descriptor)?.unwrap_or(cached)
            }
            None => {
                let descriptor = self
                    .control
                    .create_hole(self.options.name.as_deref(), self.options.scheme)
                    .await?;
                info!(
                    hole_id = %descriptor.id,
                    port = ?descriptor.port,
                    "Created {} hole on {}",
                    descriptor.scheme,
                    descriptor.host
                );
                let hole = CachedHole::from_descriptor(
                    &descriptor,
                    &self.options.local_host,
                    self.options.local_port,
                );
                self.hole = Some(hole.clone());
                self.cache.save(&hole)?;
                hole
            }
        };

        self.hole = Some(hole.clone());
        Ok(hole)
    }

    /// Start the hole and fetch the certificates the tunnel engine needs
    async fn provision(&mut self, mut hole: CachedHole) -> Result<TunnelTarget, ClientError> {
        let port = hole.port.ok_or_else(|| {
            ClientError::Config(format!("rendezvous port of hole {} is not cached", hole.id))
        })?;

        let ack = self.control.start_hole(&hole.id).await?;
        hole.status = ack.status;
        hole.pid = Some(std::process::id());
        self.cache.save(&hole)?;
        self.hole = Some(hole.clone());

        if !self.engine.supports(hole.scheme) {
            return Err(ClientError::Process(format!(
                "scheme {} is not supported by this tunnel engine",
                hole.scheme
            )));
        }

        let material = self.control.fetch_material().await?;
        Ok(TunnelTarget::new(
            &hole.host,
            port,
            hole.scheme,
            join_host_port(&hole.local_host, hole.local_port),
            material,
        ))
    }

    /// Stop (and optionally remove) the hole; failures are only logged
    async fn teardown(&mut self) -> Option<HoleStatus> {
        let hole = self.hole.take()?;
        info!(hole_id = %hole.id, "Stopping hole");

        let mut status = None;
        match self.control.kill_hole(&hole.id).await {
            Ok(ack) => status = Some(ack.status),
            Err(e) => warn!("Failed to stop hole {}: {}", hole.id, e),
        }

        if self.options.auto_remove {
            match self.control.remove_hole(&hole.id).await {
                Ok(ack) => {
                    status = Some(ack.status);
                    if let Err(e) = self.cache.remove(&hole.id) {
                        warn!("Failed to drop cache entry {}: {}", hole.id, e);
                    }
                }
                Err(e) => warn!("Failed to remove hole {}: {}", hole.id, e),
            }
        } else if let Some(status) = status {
            if let Err(e) = self.cache.set_status(&hole.id, status) {
                warn!("Failed to update cache entry {}: {}", hole.id, e);
            }
        }

        status
    }
}
