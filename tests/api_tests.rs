//! End-to-end admin API tests
//!
//! Drives the full router through `tower::ServiceExt::oneshot` with a
//! scripted identity provider: bearer extraction, introspection, role
//! gating, and the CRUD surface over devices, bindings, and rules.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use tower::ServiceExt;

use fleet_manager::auth::provider::{Claims, IdentityProvider, ProviderError, ProviderUser};
use fleet_manager::auth::{CredentialStore, ServiceCredential, TokenValidator, UserDirectory};
use fleet_manager::catalog::Catalog;
use fleet_manager::config::{CorsConfig, KeycloakConfig};
use fleet_manager::routes::{AppState, create_router};

/// Build a structurally valid (unsigned) JWT carrying the given payload.
fn make_jwt(payload: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header}.{body}.unsigned")
}

/// Scripted identity provider. `None` in any slot makes that operation fail.
struct ScriptedProvider {
    login: Option<ServiceCredential>,
    active: Option<bool>,
    claims: Option<Claims>,
    users: Option<Vec<ProviderUser>>,
}

impl ScriptedProvider {
    fn healthy_with_roles(roles: &[&str]) -> Self {
        Self {
            login: Some(ServiceCredential {
                access_token: "svc-token".to_string(),
                expires_in: 3600,
            }),
            active: Some(true),
            claims: json!({
                "sub": "user-1",
                "realm_access": {"roles": roles}
            })
            .as_object()
            .cloned(),
            users: Some(vec![]),
        }
    }

    fn outage() -> ProviderError {
        ProviderError::Rejected {
            status: 599,
            body: "scripted outage".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn login(
        &self,
        _client_id: &str,
        _client_secret: &str,
        _realm: &str,
    ) -> Result<ServiceCredential, ProviderError> {
        self.login.clone().ok_or_else(Self::outage)
    }

    async fn introspect(
        &self,
        _token: &str,
        _client_id: &str,
        _client_secret: &str,
        _realm: &str,
    ) -> Result<bool, ProviderError> {
        self.active.ok_or_else(Self::outage)
    }

    async fn decode(&self, _token: &str, _realm: &str) -> Result<Claims, ProviderError> {
        self.claims
            .clone()
            .ok_or_else(|| ProviderError::MalformedToken("no claims scripted".to_string()))
    }

    async fn list_users(
        &self,
        _admin_token: &str,
        _realm: &str,
    ) -> Result<Vec<ProviderUser>, ProviderError> {
        self.users.clone().ok_or_else(Self::outage)
    }

    async fn set_user_enabled(
        &self,
        _admin_token: &str,
        _realm: &str,
        user_id: &str,
        _enabled: bool,
    ) -> Result<(), ProviderError> {
        let known = self
            .users
            .as_ref()
            .is_some_and(|users| users.iter().any(|u| u.id == user_id));
        if known {
            Ok(())
        } else {
            Err(ProviderError::Rejected {
                status: 404,
                body: "user not found".to_string(),
            })
        }
    }
}

fn build_app(provider: ScriptedProvider) -> Router {
    let config = KeycloakConfig::default();
    let provider: Arc<dyn IdentityProvider> = Arc::new(provider);
    let credentials = Arc::new(CredentialStore::new());
    let validator = Arc::new(TokenValidator::new(
        Arc::clone(&provider),
        Arc::clone(&credentials),
        config.clone(),
    ));
    let directory = Arc::new(UserDirectory::new(provider, credentials, config));
    let state = AppState {
        catalog: Arc::new(Catalog::new()),
        validator,
        directory,
    };
    create_router(
        state,
        &CorsConfig {
            enabled: false,
            allowed_origins: vec![],
        },
    )
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

fn json_request(method: &str, uri: &str, token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn health_is_public() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));

    let response = app.oneshot(get("/health", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));

    let response = app
        .oneshot(get("/api/admin/devices", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
}

#[tokio::test]
async fn inactive_token_is_unauthorized() {
    let mut provider = ScriptedProvider::healthy_with_roles(&["admin"]);
    provider.active = Some(false);
    let app = build_app(provider);

    let token = make_jwt(&json!({"sub": "user-1"}));
    let response = app
        .oneshot(get("/api/admin/devices", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_role_is_forbidden() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["viewer"]));

    let token = make_jwt(&json!({"sub": "user-1"}));
    let response = app
        .oneshot(get("/api/admin/devices", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn provider_outage_is_service_unavailable() {
    let mut provider = ScriptedProvider::healthy_with_roles(&["admin"]);
    provider.login = None;
    let app = build_app(provider);

    let token = make_jwt(&json!({"sub": "user-1"}));
    let response = app
        .oneshot(get("/api/admin/devices", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn device_crud_round_trip() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));
    let token = make_jwt(&json!({"sub": "admin-1"}));

    // Create
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/admin/devices",
            &token,
            json!({"unique_hardware_id": "hw-1", "os": "linux", "hostname": "edge-1"}),
        ))
        .await
        .expect("create");
    assert_eq!(response.status(), StatusCode::CREATED);
    let device = read_json(response).await;
    let id = device["id"].as_str().expect("id").to_string();

    // Duplicate hardware id
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/admin/devices",
            &token,
            json!({"unique_hardware_id": "hw-1"}),
        ))
        .await
        .expect("duplicate");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // List
    let response = app
        .clone()
        .oneshot(get("/api/admin/devices", Some(&token)))
        .await
        .expect("list");
    assert_eq!(response.status(), StatusCode::OK);
    let listed = read_json(response).await;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    // Update
    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/admin/devices/{id}"),
            &token,
            json!({"hostname": "edge-renamed"}),
        ))
        .await
        .expect("update");
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await;
    assert_eq!(updated["hostname"], "edge-renamed");
    assert_eq!(updated["os"], "linux");

    // Delete
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/admin/devices/{id}"))
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Gone
    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/admin/devices/{id}"),
            &token,
            json!({"hostname": "ghost"}),
        ))
        .await
        .expect("update gone");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn binding_requires_known_device() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));
    let token = make_jwt(&json!({"sub": "admin-1"}));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/admin/bindings",
            &token,
            json!({
                "subject_id": "user-1",
                "device_id": "00000000-0000-0000-0000-000000000000"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn binding_round_trip() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));
    let token = make_jwt(&json!({"sub": "admin-1"}));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/admin/devices",
            &token,
            json!({"unique_hardware_id": "hw-1"}),
        ))
        .await
        .expect("device");
    let device = read_json(response).await;
    let device_id = device["id"].as_str().expect("id").to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/admin/bindings",
            &token,
            json!({"subject_id": "user-1", "device_id": device_id}),
        ))
        .await
        .expect("binding");
    assert_eq!(response.status(), StatusCode::CREATED);
    let binding = read_json(response).await;
    assert_eq!(binding["status"], "active");
    let binding_id = binding["id"].as_str().expect("id").to_string();

    // Same pair again conflicts
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/admin/bindings",
            &token,
            json!({"subject_id": "user-1", "device_id": device["id"]}),
        ))
        .await
        .expect("duplicate binding");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/admin/bindings/{binding_id}"))
                .header("authorization", format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("delete binding");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn rule_round_trip_with_wire_names() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));
    let token = make_jwt(&json!({"sub": "admin-1"}));

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/admin/rules",
            &token,
            json!({
                "name": "block-ads",
                "type": "http-proxy",
                "match": "*.ads.example.com",
                "action": "block"
            }),
        ))
        .await
        .expect("create rule");
    assert_eq!(response.status(), StatusCode::CREATED);
    let rule = read_json(response).await;
    // Wire field names, not the internal ones
    assert_eq!(rule["type"], "http-proxy");
    assert_eq!(rule["match"], "*.ads.example.com");
    let id = rule["id"].as_str().expect("id").to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/admin/rules/{id}"),
            &token,
            json!({"action": "proxy"}),
        ))
        .await
        .expect("update rule");
    assert_eq!(response.status(), StatusCode::OK);
    let updated = read_json(response).await;
    assert_eq!(updated["action"], "proxy");
    assert_eq!(updated["name"], "block-ads");

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/admin/rules",
            &token,
            json!({
                "name": "block-ads",
                "type": "tcp-proxy",
                "match": "10.0.0.1:443",
                "action": "block"
            }),
        ))
        .await
        .expect("duplicate rule");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn user_list_is_proxied_from_the_provider() {
    let mut provider = ScriptedProvider::healthy_with_roles(&["admin"]);
    provider.users = Some(vec![
        serde_json::from_value(json!({
            "id": "u1",
            "username": "alice",
            "email": "alice@example.com",
            "firstName": "Alice",
            "enabled": true
        }))
        .expect("user"),
    ]);
    let app = build_app(provider);
    let token = make_jwt(&json!({"sub": "admin-1"}));

    let response = app
        .oneshot(get("/api/admin/users", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let users = read_json(response).await;
    assert_eq!(users.as_array().map(Vec::len), Some(1));
    assert_eq!(users[0]["username"], "alice");
    assert_eq!(users[0]["firstName"], "Alice");
}

#[tokio::test]
async fn user_status_toggle_round_trip() {
    let mut provider = ScriptedProvider::healthy_with_roles(&["admin"]);
    provider.users = Some(vec![
        serde_json::from_value(json!({"id": "u1", "username": "alice", "enabled": true}))
            .expect("user"),
    ]);
    let app = build_app(provider);
    let token = make_jwt(&json!({"sub": "admin-1"}));

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/admin/users/u1/status",
            &token,
            json!({"enabled": false}),
        ))
        .await
        .expect("toggle");
    assert_eq!(response.status(), StatusCode::OK);

    // Unknown provider-side user id surfaces as 404
    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/admin/users/ghost/status",
            &token,
            json!({"enabled": true}),
        ))
        .await
        .expect("unknown user");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn user_endpoints_require_admin_role() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["viewer"]));
    let token = make_jwt(&json!({"sub": "user-1"}));

    let response = app
        .oneshot(get("/api/admin/users", Some(&token)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn validation_errors_are_bad_request() {
    let app = build_app(ScriptedProvider::healthy_with_roles(&["admin"]));
    let token = make_jwt(&json!({"sub": "admin-1"}));

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/admin/devices",
            &token,
            json!({"unique_hardware_id": ""}),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}
