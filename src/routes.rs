//! HTTP router and handlers
//!
//! The admin API is a plain CRUD surface over the catalog. Every route under
//! `/api/admin` passes through the bearer-token middleware and the admin role
//! gate; `/health` stays public for load balancers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, put},
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;
use uuid::Uuid;

use serde::Deserialize;

use crate::Result;
use crate::auth::{
    ProviderUser, TokenValidator, UserDirectory, auth_middleware, require_admin,
};
use crate::catalog::{
    Binding, BindingDraft, Catalog, Device, DeviceDraft, DeviceUpdate, ProxyRule, RuleDraft,
    RuleUpdate,
};
use crate::config::CorsConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Record catalog
    pub catalog: Arc<Catalog>,
    /// Token validation pipeline
    pub validator: Arc<TokenValidator>,
    /// Provider-side user administration
    pub directory: Arc<UserDirectory>,
}

/// Create the router
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    let validator = Arc::clone(&state.validator);

    let admin_api = Router::new()
        .route("/devices", get(list_devices).post(create_device))
        .route("/devices/{id}", put(update_device).delete(delete_device))
        .route("/bindings", get(list_bindings).post(create_binding))
        .route("/bindings/{id}", delete(delete_binding))
        .route("/rules", get(list_rules).post(create_rule))
        .route("/rules/{id}", put(update_rule).delete(delete_rule))
        .route("/users", get(list_users))
        .route("/users/{id}/status", put(update_user_status))
        // Layers run bottom-up: authentication first, then the role gate.
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(validator, auth_middleware));

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .nest("/api/admin", admin_api)
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    if cors.enabled {
        router = router.layer(cors_layer(cors));
    }

    router.with_state(state)
}

fn cors_layer(cors: &CorsConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    if cors.allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %origin, "Skipping unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Devices ──────────────────────────────────────────────────────────────

async fn list_devices(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.catalog.devices())
}

async fn create_device(
    State(state): State<AppState>,
    Json(draft): Json<DeviceDraft>,
) -> Result<(StatusCode, Json<Device>)> {
    let device = state.catalog.create_device(draft)?;
    Ok((StatusCode::CREATED, Json(device)))
}

async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<DeviceUpdate>,
) -> Result<Json<Device>> {
    Ok(Json(state.catalog.update_device(id, update)?))
}

async fn delete_device(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.catalog.delete_device(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Bindings ─────────────────────────────────────────────────────────────

async fn list_bindings(State(state): State<AppState>) -> Json<Vec<Binding>> {
    Json(state.catalog.bindings())
}

async fn create_binding(
    State(state): State<AppState>,
    Json(draft): Json<BindingDraft>,
) -> Result<(StatusCode, Json<Binding>)> {
    let binding = state.catalog.create_binding(draft)?;
    Ok((StatusCode::CREATED, Json(binding)))
}

async fn delete_binding(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.catalog.delete_binding(id)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Users (proxied to the identity provider) ─────────────────────────────

/// Body of `PUT /api/admin/users/{id}/status`.
#[derive(Debug, Deserialize)]
struct StatusUpdate {
    enabled: bool,
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<ProviderUser>>> {
    Ok(Json(state.directory.users().await?))
}

async fn update_user_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<StatusCode> {
    state.directory.set_user_enabled(&id, update.enabled).await?;
    Ok(StatusCode::OK)
}

// ── Rules ────────────────────────────────────────────────────────────────

async fn list_rules(State(state): State<AppState>) -> Json<Vec<ProxyRule>> {
    Json(state.catalog.rules())
}

async fn create_rule(
    State(state): State<AppState>,
    Json(draft): Json<RuleDraft>,
) -> Result<(StatusCode, Json<ProxyRule>)> {
    let rule = state.catalog.create_rule(draft)?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn update_rule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<RuleUpdate>,
) -> Result<Json<ProxyRule>> {
    Ok(Json(state.catalog.update_rule(id, update)?))
}

async fn delete_rule(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    state.catalog.delete_rule(id)?;
    Ok(StatusCode::NO_CONTENT)
}
