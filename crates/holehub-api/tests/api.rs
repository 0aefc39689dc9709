//! Router tests driven in-process with `oneshot`

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use holehub_api::{build_router, AppState};
use holehub_auth::SessionKeys;
use holehub_control::{ControlConfig, ControlPlane};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

async fn setup_app() -> (Router, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = ControlConfig::new(dir.path().join("config"), "hub.test").with_min_port(10000);
    let plane = ControlPlane::open(config, "sqlite::memory:")
        .await
        .expect("Failed to open control plane");

    let state = Arc::new(AppState {
        plane,
        sessions: SessionKeys::new(b"api-test-secret"),
    });
    (build_router(state), dir)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let (status, bytes) = send(app, request).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn signup_and_signin(app: &Router, username: &str) -> String {
    let (status, _) = send_json(
        app,
        "POST",
        "/api/signup",
        None,
        Some(json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": "secret"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send_json(
        app,
        "POST",
        "/api/signin",
        None,
        Some(json!({ "username": username, "password": "secret" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let (app, _dir) = setup_app().await;
    let (status, body) = send_json(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_signup_errors_carry_codes() {
    let (app, _dir) = setup_app().await;
    signup_and_signin(&app, "alice").await;

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/signup",
        None,
        Some(json!({"username": "alice", "email": "new@example.com", "password": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 1);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/signup",
        None,
        Some(json!({"username": "bob", "email": "alice@example.com", "password": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 2);

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/signup",
        None,
        Some(json!({"username": "carol", "email": "nope", "password": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 3);
    assert!(body["suggestion"].is_string());
}

#[tokio::test]
async fn test_signin_sets_cookie_and_rejects_bad_password() {
    let (app, _dir) = setup_app().await;
    signup_and_signin(&app, "alice").await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/signin")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "alice", "password": "secret"}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session_token="));
    assert!(cookie.contains("HttpOnly"));

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/signin",
        None,
        Some(json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 4);
}

#[tokio::test]
async fn test_ping() {
    let (app, _dir) = setup_app().await;
    let token = signup_and_signin(&app, "alice").await;

    let (_, body) = send_json(&app, "GET", "/api/ping", Some(&token), None).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["username"], "alice");

    let (_, body) = send_json(&app, "GET", "/api/ping", None, None).await;
    assert_eq!(body["ok"], false);

    let (_, body) = send_json(&app, "GET", "/api/ping", Some("garbage"), None).await;
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn test_protected_routes_require_session() {
    let (app, _dir) = setup_app().await;

    let (status, body) = send_json(&app, "GET", "/api/holes", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 14);

    let (status, _) = send_json(&app, "GET", "/api/holes", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_session_cookie_is_accepted() {
    let (app, _dir) = setup_app().await;
    let token = signup_and_signin(&app, "alice").await;

    let request = Request::builder()
        .uri("/api/holes")
        .header(header::COOKIE, format!("session_token={}", token))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_hole_lifecycle_over_http() {
    let (app, _dir) = setup_app().await;
    let token = signup_and_signin(&app, "alice").await;

    let (status, created) = send_json(
        &app,
        "POST",
        "/api/holes",
        Some(&token),
        Some(json!({"name": "web", "scheme": "tcp"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["port"], 10000);
    assert_eq!(created["status"], "unstarted");
    assert_eq!(created["host"], "hub.test");
    let id = created["id"].as_str().unwrap().to_string();

    // Port is only revealed at creation
    let (status, hole) = send_json(&app, "GET", &format!("/api/holes/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(hole.get("port").is_none());

    let (status, body) = send_json(
        &app,
        "POST",
        "/api/holes",
        Some(&token),
        Some(json!({"name": "web"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], 11);

    let (status, ack) = send_json(&app, "POST", &format!("/api/holes/{}/start", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "started");

    for _ in 0..2 {
        let (status, ack) = send_json(&app, "POST", &format!("/api/holes/{}/kill", id), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ack["status"], "stopped");
    }

    let (status, list) = send_json(&app, "GET", "/api/holes", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["holes"].as_array().unwrap().len(), 1);

    let (status, ack) = send_json(&app, "POST", &format!("/api/holes/{}/remove", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "removed");

    let (status, body) = send_json(&app, "POST", &format!("/api/holes/{}/remove", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 10);
}

#[tokio::test]
async fn test_other_users_hole_is_forbidden() {
    let (app, _dir) = setup_app().await;
    let alice = signup_and_signin(&app, "alice").await;
    let bob = signup_and_signin(&app, "bob").await;

    let (_, created) = send_json(&app, "POST", "/api/holes", Some(&alice), Some(json!({}))).await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send_json(&app, "POST", &format!("/api/holes/{}/start", id), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 12);
}

#[tokio::test]
async fn test_encoded_traversal_ids_are_rejected() {
    let (app, dir) = setup_app().await;
    let token = signup_and_signin(&app, "alice").await;

    std::fs::create_dir_all(dir.path().join("config")).unwrap();
    let victim = dir.path().join("victim.json");
    std::fs::write(&victim, b"{}").unwrap();

    for (method, uri) in [
        ("POST", "/api/holes/..%2Fvictim/kill"),
        ("POST", "/api/holes/..%2Fvictim/start"),
        ("POST", "/api/holes/..%2Fvictim/remove"),
        ("GET", "/api/holes/..%2Fvictim"),
    ] {
        let (status, body) = send_json(&app, method, uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{} {}", method, uri);
        assert_eq!(body["code"], 13);
    }
    assert!(victim.exists());
}

#[tokio::test]
async fn test_certificate_downloads() {
    let (app, _dir) = setup_app().await;
    let token = signup_and_signin(&app, "alice").await;

    for (uri, marker) in [
        ("/api/ca.pem", "BEGIN CERTIFICATE"),
        ("/api/cert.pem", "BEGIN CERTIFICATE"),
        ("/api/cert.key", "PRIVATE KEY"),
    ] {
        let request = Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/x-pem-file"
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains(marker));
    }

    // The CA private key is never served
    let (status, _) = send_json(&app, "GET", "/api/ca.key", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_json(&app, "POST", "/api/cert", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send_json(&app, "POST", "/api/ca", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_openapi_document() {
    let (app, _dir) = setup_app().await;
    let (status, doc) = send_json(&app, "GET", "/api/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/api/holes"].is_object());
    assert!(doc["paths"]["/api/holes/{id}/kill"].is_object());
}
