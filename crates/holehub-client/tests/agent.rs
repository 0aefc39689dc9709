//! Agent flows against an in-process control plane

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::Method;
use axum::middleware::{self, Next};
use holehub_api::{build_router, AppState};
use holehub_auth::SessionKeys;
use holehub_client::{
    AgentExit, AgentOptions, AgentState, ClientAgent, ClientConfig, ClientError, ClientPaths,
    HoleCache, RetryPolicy, TlsTunnelEngine, TunnelEngine, TunnelLink, TunnelTarget,
};
use holehub_control::{ControlConfig, ControlPlane};
use holehub_proto::{HoleStatus, Scheme};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Notify;

struct TestServer {
    host: String,
    plane: ControlPlane,
    _dir: TempDir,
}

async fn spawn_server() -> TestServer {
    spawn_server_with(None).await
}

/// `created` is notified once a create request has committed on the server.
/// The response is then held back briefly.
async fn spawn_server_with(created: Option<Arc<Notify>>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ControlConfig::new(dir.path().join("config"), "127.0.0.1").with_min_port(10000);
    let plane = ControlPlane::open(config, "sqlite::memory:").await.unwrap();
    plane
        .users
        .signup("alice", "alice@example.com", "secret")
        .await
        .unwrap();

    let state = Arc::new(AppState {
        plane: plane.clone(),
        sessions: SessionKeys::new(b"agent-test-secret"),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let host = listener.local_addr().unwrap().to_string();
    let mut router = build_router(state);
    if let Some(created) = created {
        router = router.layer(middleware::from_fn(move |req: Request, next: Next| {
            let created = created.clone();
            async move {
                let creating = req.method() == Method::POST && req.uri().path() == "/api/holes";
                let response = next.run(req).await;
                if creating {
                    created.notify_one();
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                response
            }
        }));
    }
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    TestServer {
        host,
        plane,
        _dir: dir,
    }
}

fn client_config(server: &TestServer, password: &str) -> ClientConfig {
    ClientConfig {
        host: server.host.clone(),
        username: Some("alice".into()),
        password: Some(password.into()),
        session_token: None,
    }
}

/// Outcome of one scripted connection attempt
#[derive(Clone, Copy)]
enum Step {
    Refuse,
    /// Connects, then the link fails right away
    Drop,
    Hold,
}

/// Engine that never touches the network
#[derive(Clone, Default)]
struct MockEngine {
    refuse: bool,
    script: Arc<Mutex<VecDeque<Step>>>,
    attempts: Arc<AtomicU32>,
    links: Arc<AtomicU32>,
    connected: Arc<Notify>,
    targets: Arc<Mutex<Vec<TunnelTarget>>>,
}

impl MockEngine {
    fn scripted(steps: &[Step]) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.iter().copied().collect())),
            ..Default::default()
        }
    }
}

struct IdleLink;

struct BrokenLink;

#[async_trait]
impl TunnelLink for BrokenLink {
    async fn process(&mut self) -> Result<(), ClientError> {
        Err(ClientError::Process("connection reset by peer".into()))
    }
}

#[async_trait]
impl TunnelLink for IdleLink {
    async fn process(&mut self) -> Result<(), ClientError> {
        futures::future::pending::<()>().await;
        Ok(())
    }
}

#[async_trait]
impl TunnelEngine for MockEngine {
    async fn connect(&self, target: &TunnelTarget) -> Result<Box<dyn TunnelLink>, ClientError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());

        let fallback = if self.refuse { Step::Refuse } else { Step::Hold };
        let step = self.script.lock().unwrap().pop_front().unwrap_or(fallback);
        if let Step::Refuse = step {
            return Err(ClientError::Process("connection refused".into()));
        }

        self.links.fetch_add(1, Ordering::SeqCst);
        self.connected.notify_one();
        match step {
            Step::Drop => Ok(Box::new(BrokenLink)),
            _ => Ok(Box::new(IdleLink)),
        }
    }
}

#[tokio::test]
async fn test_connect_then_interrupt_stops_hole() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();
    let paths = ClientPaths::new(state_dir.path());

    let engine = MockEngine::default();
    let options = AgentOptions {
        name: Some("web".into()),
        local_port: 8080,
        ..Default::default()
    };
    let mut agent = ClientAgent::new(client_config(&server, "secret"), paths.clone(), engine.clone(), options);

    let connected = engine.connected.clone();
    let report = agent
        .run(async move { connected.notified().await })
        .await
        .unwrap();

    assert_eq!(report.exit, AgentExit::Interrupted);
    assert_eq!(report.port, Some(10000));
    assert_eq!(report.connections, 1);
    assert_eq!(report.final_status, Some(HoleStatus::Stopped));
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 1);

    let history = agent.history();
    assert_eq!(
        &history[..5],
        &[
            AgentState::Idle,
            AgentState::Registering,
            AgentState::Provisioned,
            AgentState::Connecting,
            AgentState::Connected
        ]
    );
    assert_eq!(agent.state(), AgentState::Terminated);

    let target = engine.targets.lock().unwrap()[0].clone();
    assert_eq!(target.remote, "127.0.0.1:10000");
    assert_eq!(target.local_addr, "127.0.0.1:8080");
    assert!(target.material.cert_pem.contains("BEGIN CERTIFICATE"));
    assert!(target.material.key_pem.contains("PRIVATE KEY"));

    let id = report.hole_id.unwrap();
    let hole = server.plane.holes.get("alice", &id).await.unwrap();
    assert_eq!(hole.status, HoleStatus::Stopped);

    // Session and cache were persisted for later invocations
    assert!(ClientConfig::load(&paths).unwrap().session_token.is_some());
    let cached = HoleCache::new(&paths).resolve("web").unwrap().unwrap();
    assert_eq!(cached.id, id);
    assert_eq!(cached.port, Some(10000));
    assert_eq!(cached.status, HoleStatus::Stopped);
    assert_eq!(cached.pid, None);
}

#[tokio::test]
async fn test_unreachable_rendezvous_exhausts_budget() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();
    let paths = ClientPaths::new(state_dir.path());

    let engine = MockEngine {
        refuse: true,
        ..Default::default()
    };
    let options = AgentOptions {
        name: Some("db".into()),
        auto_remove: true,
        retry: RetryPolicy::new(3, Duration::from_millis(10)),
        ..Default::default()
    };
    let mut agent = ClientAgent::new(client_config(&server, "secret"), paths.clone(), engine.clone(), options);

    let err = agent.run(futures::future::pending()).await.unwrap_err();
    match err {
        ClientError::Unreachable {
            endpoint, attempts, ..
        } => {
            assert_eq!(endpoint, "127.0.0.1:10000");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 3);
    assert_eq!(agent.state(), AgentState::Terminated);

    // Auto-cleanup removed the hole and released its name
    let holes = server.plane.holes.list("alice").await.unwrap();
    assert!(holes.is_empty());
    assert!(HoleCache::new(&paths).list().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_token_aborts_connecting() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();

    let engine = MockEngine {
        refuse: true,
        ..Default::default()
    };
    let options = AgentOptions {
        retry: RetryPolicy::new(1000, Duration::from_millis(20)),
        ..Default::default()
    };
    let mut agent = ClientAgent::new(
        client_config(&server, "secret"),
        ClientPaths::new(state_dir.path()),
        engine.clone(),
        options,
    );

    let cancel = agent.cancel_token();
    let attempts = engine.attempts.clone();
    tokio::spawn(async move {
        while attempts.load(Ordering::SeqCst) < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
    });

    let report = agent.run(futures::future::pending()).await.unwrap();
    assert_eq!(report.exit, AgentExit::Cancelled);
    assert_eq!(report.final_status, Some(HoleStatus::Stopped));
    assert!(engine.attempts.load(Ordering::SeqCst) < 1000);
}

#[tokio::test]
async fn test_cached_session_is_reused() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();
    let paths = ClientPaths::new(state_dir.path());

    let engine = MockEngine::default();
    let mut agent = ClientAgent::new(client_config(&server, "secret"), paths.clone(), engine.clone(), AgentOptions::default());
    let connected = engine.connected.clone();
    agent.run(async move { connected.notified().await }).await.unwrap();
    let token = ClientConfig::load(&paths).unwrap().session_token.unwrap();

    // A wrong password is never needed while the token is still accepted
    let mut config = client_config(&server, "wrong");
    config.session_token = Some(token.clone());
    let engine = MockEngine::default();
    let mut agent = ClientAgent::new(config, paths.clone(), engine.clone(), AgentOptions::default());
    let connected = engine.connected.clone();
    agent.run(async move { connected.notified().await }).await.unwrap();
    assert_eq!(agent.config().session_token.as_deref(), Some(token.as_str()));

    // A rejected token falls back to a single login
    let mut config = client_config(&server, "secret");
    config.session_token = Some("stale".into());
    let engine = MockEngine::default();
    let mut agent = ClientAgent::new(config, paths.clone(), engine.clone(), AgentOptions::default());
    let connected = engine.connected.clone();
    agent.run(async move { connected.notified().await }).await.unwrap();
    let refreshed = ClientConfig::load(&paths).unwrap().session_token.unwrap();
    assert_ne!(refreshed, "stale");
}

#[tokio::test]
async fn test_bad_credentials_fail_before_provisioning() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();

    let engine = MockEngine::default();
    let mut agent = ClientAgent::new(
        client_config(&server, "wrong"),
        ClientPaths::new(state_dir.path()),
        engine.clone(),
        AgentOptions::default(),
    );

    let err = agent.run(futures::future::pending()).await.unwrap_err();
    assert_eq!(err.code(), Some(4));
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 0);
    assert!(server.plane.holes.list("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restart_existing_hole_from_cache() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();
    let paths = ClientPaths::new(state_dir.path());

    let engine = MockEngine::default();
    let options = AgentOptions {
        name: Some("web".into()),
        local_port: 3000,
        ..Default::default()
    };
    let mut agent = ClientAgent::new(client_config(&server, "secret"), paths.clone(), engine.clone(), options);
    let connected = engine.connected.clone();
    let first = agent.run(async move { connected.notified().await }).await.unwrap();

    let engine = MockEngine::default();
    let options = AgentOptions {
        existing: Some("web".into()),
        ..Default::default()
    };
    let mut agent = ClientAgent::new(client_config(&server, "secret"), paths.clone(), engine.clone(), options);
    let connected = engine.connected.clone();
    let second = agent.run(async move { connected.notified().await }).await.unwrap();

    assert_eq!(second.hole_id, first.hole_id);
    assert_eq!(second.port, Some(10000));
    let target = engine.targets.lock().unwrap()[0].clone();
    assert_eq!(target.local_addr, "127.0.0.1:3000");

    // Unknown holes are rejected locally
    let mut agent = ClientAgent::new(
        client_config(&server, "secret"),
        paths,
        MockEngine::default(),
        AgentOptions {
            existing: Some("nope".into()),
            ..Default::default()
        },
    );
    let err = agent.run(futures::future::pending()).await.unwrap_err();
    assert!(matches!(err, ClientError::UnknownHole(_)));
}

#[tokio::test]
async fn test_udp_is_unsupported_by_tls_engine() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();

    let options = AgentOptions {
        scheme: Scheme::Udp,
        ..Default::default()
    };
    let mut agent = ClientAgent::new(
        client_config(&server, "secret"),
        ClientPaths::new(state_dir.path()),
        TlsTunnelEngine::new(),
        options,
    );

    let err = agent.run(futures::future::pending()).await.unwrap_err();
    assert!(matches!(err, ClientError::Process(_)));

    // The hole was created and started, so teardown stopped it
    let holes = server.plane.holes.list("alice").await.unwrap();
    assert_eq!(holes.len(), 1);
    assert_eq!(holes[0].status, HoleStatus::Stopped);
}

#[tokio::test]
async fn test_dropped_link_reconnects_with_fresh_budget() {
    let server = spawn_server().await;
    let state_dir = tempfile::tempdir().unwrap();

    // Each Connecting phase needs both attempts of its budget
    let engine = MockEngine::scripted(&[Step::Refuse, Step::Drop, Step::Refuse, Step::Hold]);
    let options = AgentOptions {
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
        ..Default::default()
    };
    let mut agent = ClientAgent::new(
        client_config(&server, "secret"),
        ClientPaths::new(state_dir.path()),
        engine.clone(),
        options,
    );

    let links = engine.links.clone();
    let report = agent
        .run(async move {
            while links.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

    assert_eq!(report.exit, AgentExit::Interrupted);
    assert_eq!(report.connections, 2);
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(
        agent.history(),
        &[
            AgentState::Idle,
            AgentState::Registering,
            AgentState::Provisioned,
            AgentState::Connecting,
            AgentState::Connected,
            AgentState::Disconnected,
            AgentState::Connecting,
            AgentState::Connected,
            AgentState::Terminated,
        ]
    );
    assert_eq!(report.final_status, Some(HoleStatus::Stopped));
}

#[tokio::test]
async fn test_interrupt_during_create_still_cleans_up() {
    let created = Arc::new(Notify::new());
    let server = spawn_server_with(Some(created.clone())).await;
    let state_dir = tempfile::tempdir().unwrap();
    let paths = ClientPaths::new(state_dir.path());

    let engine = MockEngine::default();
    let options = AgentOptions {
        name: Some("web".into()),
        auto_remove: true,
        ..Default::default()
    };
    let mut agent = ClientAgent::new(client_config(&server, "secret"), paths.clone(), engine.clone(), options);

    let report = agent
        .run(async move { created.notified().await })
        .await
        .unwrap();

    assert_eq!(report.exit, AgentExit::Interrupted);
    assert!(report.hole_id.is_some());
    assert_eq!(report.final_status, Some(HoleStatus::Removed));
    assert_eq!(engine.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(
        agent.history(),
        &[AgentState::Idle, AgentState::Registering, AgentState::Terminated]
    );

    // The name binding was released along with the hole
    assert!(server.plane.holes.list("alice").await.unwrap().is_empty());
    assert!(HoleCache::new(&paths).list().unwrap().is_empty());
    server
        .plane
        .holes
        .create("alice", Some("web"), None)
        .await
        .unwrap();
}
