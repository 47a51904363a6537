use std::io::Write;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::DefaultBodyLimit;
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use ride_hail::auth::middleware::{require_role, RoleGuard};
use ride_hail::auth::{Claims, JwtManager, Role, ACCESS_TOKEN_TTL};
use ride_hail::config::Config;
use ride_hail::error::AppJson;

const TEST_SECRET: &str = "integration-test-secret-key-0123456789";

fn jwt_manager() -> Arc<JwtManager> {
    JwtManager::new(TEST_SECRET, ACCESS_TOKEN_TTL)
}

/// A minimal router behind the real role middleware, echoing the verified
/// subject.
fn protected_router(role: Role) -> Router {
    let guard = RoleGuard::new(jwt_manager(), role);
    Router::new()
        .route(
            "/whoami",
            get(|Extension(claims): Extension<Claims>| async move {
                Json(json!({ "sub": claims.sub }))
            }),
        )
        .layer(middleware::from_fn_with_state(guard, require_role))
}

/// A minimal router using the crate's Json extractor and body limit, the way
/// every service route does.
fn json_router() -> Router {
    #[derive(serde::Deserialize)]
    struct Echo {
        value: i64,
    }

    Router::new()
        .route(
            "/echo",
            post(|AppJson(body): AppJson<Echo>| async move { Json(json!({ "value": body.value })) }),
        )
        .layer(DefaultBodyLimit::max(256))
}

fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = protected_router(Role::Passenger);
    let response = app.oneshot(get_request("/whoami", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("authorization"));
}

#[tokio::test]
async fn garbage_token_is_unauthorized() {
    let app = protected_router(Role::Passenger);
    let response = app
        .oneshot(get_request("/whoami", Some("not-a-jwt")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn wrong_role_is_forbidden() {
    let token = jwt_manager().issue(Uuid::new_v4(), Role::Driver).unwrap();

    let app = protected_router(Role::Passenger);
    let response = app
        .oneshot(get_request("/whoami", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("DRIVER"));
}

#[tokio::test]
async fn valid_token_passes_and_exposes_claims() {
    let user = Uuid::new_v4();
    let token = jwt_manager().issue(user, Role::Passenger).unwrap();

    let app = protected_router(Role::Passenger);
    let response = app
        .oneshot(get_request("/whoami", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["sub"], json!(user));
}

#[tokio::test]
async fn missing_json_content_type_is_unsupported_media_type() {
    let app = json_router();
    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .body(Body::from(r#"{"value":1}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body = body_json(response).await;
    assert!(body.get("error").is_some());
}

#[tokio::test]
async fn malformed_json_is_bad_request_with_error_body() {
    let app = json_router();
    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"value": oops}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("invalid JSON"));
}

#[tokio::test]
async fn oversized_body_is_payload_too_large() {
    let app = json_router();
    let huge = format!(r#"{{"value": 1, "padding": "{}"}}"#, "x".repeat(1024));
    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(huge))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn well_formed_json_round_trips() {
    let app = json_router();
    let request = Request::builder()
        .method("POST")
        .uri("/echo")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"value": 41}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["value"], json!(41));
}

#[test]
fn config_file_loads_with_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
database:
  user: app
  password: secret
  name: ridehail
rabbitmq:
  user: guest
  password: guest
jwt:
  secret_key: {TEST_SECRET}
"#
    )
    .unwrap();

    let cfg = Config::load_from(file.path()).unwrap();
    assert_eq!(cfg.services.ride_service_port, 3000);
    assert_eq!(cfg.services.driver_location_service_port, 3001);
    assert_eq!(cfg.services.admin_service_port, 3004);
    assert_eq!(cfg.jwt.secret_key, TEST_SECRET);
}

#[test]
fn config_without_required_database_keys_fails() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
rabbitmq:
  user: guest
  password: guest
"#
    )
    .unwrap();

    assert!(Config::load_from(file.path()).is_err());
}
