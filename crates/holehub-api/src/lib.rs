//! HTTP surface of the HoleHub control plane

pub mod handlers;
pub mod middleware;
pub mod models;

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use holehub_auth::SessionKeys;
use holehub_control::ControlPlane;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;

/// Application state shared across handlers
pub struct AppState {
    pub plane: ControlPlane,
    pub sessions: SessionKeys,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "HoleHub API",
        version = "0.1.0",
        description = "Control plane for provisioning tunnel endpoints (holes)"
    ),
    paths(
        handlers::health_check,
        handlers::signup,
        handlers::signin,
        handlers::ping,
        handlers::create_hole,
        handlers::list_holes,
        handlers::get_hole,
        handlers::start_hole,
        handlers::kill_hole,
        handlers::remove_hole,
        handlers::new_ca,
        handlers::new_cert,
        handlers::ca_pem,
        handlers::cert_pem,
        handlers::cert_key,
    ),
    components(
        schemas(
            holehub_proto::Scheme,
            holehub_proto::HoleStatus,
            holehub_proto::HoleDescriptor,
            holehub_proto::HoleList,
            holehub_proto::CreateHoleRequest,
            holehub_proto::AckResponse,
            holehub_proto::SignupRequest,
            holehub_proto::SignupResponse,
            holehub_proto::SigninRequest,
            holehub_proto::SessionResponse,
            holehub_proto::PingResponse,
            holehub_proto::ErrorResponse,
            models::HealthResponse,
        )
    ),
    tags(
        (name = "holes", description = "Hole lifecycle endpoints"),
        (name = "auth", description = "Accounts and sessions"),
        (name = "certificates", description = "Per-user certificate authority"),
        (name = "system", description = "System health and info endpoints")
    )
)]
pub struct ApiDoc;

/// API server configuration
pub struct ApiServerConfig {
    pub bind_addr: SocketAddr,
}

/// API Server
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, plane: ControlPlane, sessions: SessionKeys) -> Self {
        Self {
            config,
            state: Arc::new(AppState { plane, sessions }),
        }
    }

    pub fn build_router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<(), anyhow::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        info!("Starting API server on {}", listener.local_addr()?);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

        Ok(())
    }
}

/// Build the router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/signup", post(handlers::signup))
        .route("/api/signin", post(handlers::signin))
        .route("/api/ping", get(handlers::ping))
        .route("/api/openapi.json", get(openapi_json))
        .with_state(state.clone());

    let protected_router = Router::new()
        .route(
            "/api/holes",
            get(handlers::list_holes).post(handlers::create_hole),
        )
        .route("/api/holes/{id}", get(handlers::get_hole))
        .route("/api/holes/{id}/start", post(handlers::start_hole))
        .route("/api/holes/{id}/kill", post(handlers::kill_hole))
        .route("/api/holes/{id}/remove", post(handlers::remove_hole))
        .route("/api/ca", post(handlers::new_ca))
        .route("/api/cert", post(handlers::new_cert))
        .route("/api/ca.pem", get(handlers::ca_pem))
        .route("/api/cert.pem", get(handlers::cert_pem))
        .route("/api/cert.key", get(handlers::cert_key))
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    public_router
        .merge(protected_router)
        .layer(TraceLayer::new_for_http())
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
