//! HTTP handlers

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use holehub_control::ControlError;
use holehub_proto::{
    AckResponse, CreateHoleRequest, ErrorResponse, HoleDescriptor, HoleList, PingResponse,
    SessionResponse, SigninRequest, SignupRequest, SignupResponse, SESSION_COOKIE,
};
use tracing::{debug, info};

use crate::middleware::{extract_token, AuthUser};
use crate::models::{api_error, ApiError, HealthResponse};
use crate::AppState;

const PEM_CONTENT_TYPE: &str = "application/x-pem-file";

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Register a user and issue their certificate authority
#[utoipa::path(
    post,
    path = "/api/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created", body = SignupResponse),
        (status = 400, description = "Invalid username, email or password", body = ErrorResponse),
        (status = 409, description = "Username or email already registered", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let user = state
        .plane
        .users
        .signup(&req.username, &req.email, &req.password)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            username: user.name,
            email: user.email,
        }),
    ))
}

/// Exchange credentials for a session token
#[utoipa::path(
    post,
    path = "/api/signin",
    request_body = SigninRequest,
    responses(
        (status = 200, description = "Session issued; also set as the session_token cookie", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn signin(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SigninRequest>,
) -> Result<Response, ApiError> {
    let user = state
        .plane
        .users
        .authenticate(&req.username, &req.password)
        .await
        .map_err(api_error)?;

    let (token, claims) = state
        .sessions
        .issue(&user.name)
        .map_err(|e| api_error(ControlError::Internal(format!("cannot issue session: {}", e))))?;

    info!(user = %user.name, "Signed in");

    let cookie = format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        state.sessions.ttl().num_seconds()
    );
    let body = SessionResponse {
        username: user.name,
        token,
        expires_at: claims.expires_at(),
    };

    Ok(([(header::SET_COOKIE, cookie)], Json(body)).into_response())
}

/// Whether the presented session is still valid
#[utoipa::path(
    get,
    path = "/api/ping",
    responses(
        (status = 200, description = "Session validity", body = PingResponse)
    ),
    tag = "auth"
)]
pub async fn ping(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<PingResponse> {
    let username = match extract_token(&headers).map(|t| state.sessions.validate(&t)) {
        Some(Ok(claims)) => match state.plane.users.exists(&claims.sub).await {
            Ok(true) => Some(claims.sub),
            _ => None,
        },
        _ => None,
    };

    Json(PingResponse {
        ok: username.is_some(),
        username,
    })
}

/// Create a hole; the only response that reveals its port
#[utoipa::path(
    post,
    path = "/api/holes",
    request_body = CreateHoleRequest,
    responses(
        (status = 201, description = "Hole created", body = HoleDescriptor),
        (status = 400, description = "Invalid scheme or name", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse)
    ),
    tag = "holes"
)]
pub async fn create_hole(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateHoleRequest>,
) -> Result<(StatusCode, Json<HoleDescriptor>), ApiError> {
    let hole = state
        .plane
        .holes
        .create(&user.username, req.name.as_deref(), req.scheme.as_deref())
        .await
        .map_err(api_error)?;

    Ok((StatusCode::CREATED, Json(hole)))
}

/// List the caller's holes
#[utoipa::path(
    get,
    path = "/api/holes",
    responses(
        (status = 200, description = "Holes owned by the caller", body = HoleList)
    ),
    tag = "holes"
)]
pub async fn list_holes(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<HoleList>, ApiError> {
    let holes = state
        .plane
        .holes
        .list(&user.username)
        .await
        .map_err(api_error)?;
    Ok(Json(HoleList { holes }))
}

/// Get one hole
#[utoipa::path(
    get,
    path = "/api/holes/{id}",
    params(("id" = String, Path, description = "Hole ID")),
    responses(
        (status = 400, description = "Malformed hole ID", body = ErrorResponse),
        (status = 200, description = "Hole descriptor", body = HoleDescriptor),
        (status = 403, description = "Hole belongs to another user", body = ErrorResponse),
        (status = 404, description = "Hole not found", body = ErrorResponse)
    ),
    tag = "holes"
)]
pub async fn get_hole(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<HoleDescriptor>, ApiError> {
    let hole = state
        .plane
        .holes
        .get(&user.username, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(hole))
}

/// Activate a hole's tunnel server
#[utoipa::path(
    post,
    path = "/api/holes/{id}/start",
    params(("id" = String, Path, description = "Hole ID")),
    responses(
        (status = 400, description = "Malformed hole ID", body = ErrorResponse),
        (status = 200, description = "Hole started", body = AckResponse),
        (status = 403, description = "Hole belongs to another user", body = ErrorResponse),
        (status = 404, description = "Hole not found", body = ErrorResponse)
    ),
    tag = "holes"
)]
pub async fn start_hole(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    let hole = state
        .plane
        .holes
        .start(&user.username, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(AckResponse {
        id,
        status: hole.status,
    }))
}

/// Deactivate a hole; idempotent
#[utoipa::path(
    post,
    path = "/api/holes/{id}/kill",
    params(("id" = String, Path, description = "Hole ID")),
    responses(
        (status = 400, description = "Malformed hole ID", body = ErrorResponse),
        (status = 200, description = "Hole stopped", body = AckResponse),
        (status = 403, description = "Hole belongs to another user", body = ErrorResponse)
    ),
    tag = "holes"
)]
pub async fn kill_hole(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    let status = state
        .plane
        .holes
        .kill(&user.username, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(AckResponse { id, status }))
}

/// Delete a hole and release its name
#[utoipa::path(
    post,
    path = "/api/holes/{id}/remove",
    params(("id" = String, Path, description = "Hole ID")),
    responses(
        (status = 400, description = "Malformed hole ID", body = ErrorResponse),
        (status = 200, description = "Hole removed", body = AckResponse),
        (status = 403, description = "Hole belongs to another user", body = ErrorResponse),
        (status = 404, description = "Hole not found", body = ErrorResponse)
    ),
    tag = "holes"
)]
pub async fn remove_hole(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    let status = state
        .plane
        .holes
        .remove(&user.username, &id)
        .await
        .map_err(api_error)?;
    Ok(Json(AckResponse { id, status }))
}

/// Replace the caller's root CA (and leaf certificate)
#[utoipa::path(
    post,
    path = "/api/ca",
    responses(
        (status = 204, description = "New CA and leaf certificate issued"),
        (status = 500, description = "Certificate generation failed", body = ErrorResponse)
    ),
    tag = "certificates"
)]
pub async fn new_ca(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state
        .plane
        .users
        .reissue_ca(&user.username)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Reissue the caller's leaf certificate
#[utoipa::path(
    post,
    path = "/api/cert",
    responses(
        (status = 204, description = "New leaf certificate issued"),
        (status = 404, description = "No CA issued yet", body = ErrorResponse)
    ),
    tag = "certificates"
)]
pub async fn new_cert(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<StatusCode, ApiError> {
    state
        .plane
        .users
        .reissue_leaf(&user.username)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn pem_response(pem: String) -> Response {
    ([(header::CONTENT_TYPE, PEM_CONTENT_TYPE)], pem).into_response()
}

/// The caller's CA certificate
#[utoipa::path(
    get,
    path = "/api/ca.pem",
    responses(
        (status = 200, description = "CA certificate", content_type = "application/x-pem-file", body = String),
        (status = 404, description = "No CA issued", body = ErrorResponse)
    ),
    tag = "certificates"
)]
pub async fn ca_pem(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    debug!(user = %user.username, "Serving CA certificate");
    let pem = state
        .plane
        .ca
        .read_ca_cert(&user.username)
        .map_err(|e| api_error(e.into()))?;
    Ok(pem_response(pem))
}

/// The caller's leaf certificate
#[utoipa::path(
    get,
    path = "/api/cert.pem",
    responses(
        (status = 200, description = "Leaf certificate", content_type = "application/x-pem-file", body = String),
        (status = 404, description = "No certificate issued", body = ErrorResponse)
    ),
    tag = "certificates"
)]
pub async fn cert_pem(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let pem = state
        .plane
        .ca
        .read_leaf_cert(&user.username)
        .map_err(|e| api_error(e.into()))?;
    Ok(pem_response(pem))
}

/// The caller's leaf private key
#[utoipa::path(
    get,
    path = "/api/cert.key",
    responses(
        (status = 200, description = "Leaf private key", content_type = "application/x-pem-file", body = String),
        (status = 404, description = "No certificate issued", body = ErrorResponse)
    ),
    tag = "certificates"
)]
pub async fn cert_key(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let pem = state
        .plane
        .ca
        .read_leaf_key(&user.username)
        .map_err(|e| api_error(e.into()))?;
    Ok(pem_response(pem))
}
