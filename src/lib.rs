//! Fleet Manager Library
//!
//! Administration backend for a managed device fleet: devices, user-device
//! bindings, and proxy rules, behind a Keycloak-backed token pipeline.
//!
//! # Features
//!
//! - **Service credential cache**: single admin token shared by all requests,
//!   renewed ahead of expiry by a background task
//! - **Token validation**: introspection against the identity provider, then
//!   claim extraction for role-based access control
//! - **Admin API**: CRUD over devices, bindings, and proxy rules
//! - **Production Ready**: structured logging, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
