//! Fleet manager server
//!
//! Assembles the credential renewer, token validator, catalog, and HTTP
//! router, then serves until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::auth::{
    CredentialStore, IdentityProvider, KeycloakClient, TokenValidator, UserDirectory,
    spawn_renewer,
};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::routes::{AppState, create_router};
use crate::{Error, Result};

/// Fleet manager server
pub struct Server {
    /// Configuration
    config: Config,
}

impl Server {
    /// Create a new server from configuration.
    ///
    /// # Errors
    ///
    /// `Config` if the identity-provider base URL is unparseable.
    pub fn new(config: Config) -> Result<Self> {
        // Fail fast on a bad provider URL rather than at first login.
        KeycloakClient::new(&config.keycloak.base_url)?;
        Ok(Self { config })
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let provider: Arc<dyn IdentityProvider> =
            Arc::new(KeycloakClient::new(&self.config.keycloak.base_url)?);
        let credentials = Arc::new(CredentialStore::new());

        // The renewer fires an eager first login and keeps the service
        // credential fresh for the lifetime of the process.
        let _renewer = spawn_renewer(
            Arc::clone(&credentials),
            Arc::clone(&provider),
            self.config.keycloak.clone(),
            shutdown_tx.subscribe(),
        );

        let validator = Arc::new(TokenValidator::new(
            Arc::clone(&provider),
            Arc::clone(&credentials),
            self.config.keycloak.clone(),
        ));
        let directory = Arc::new(UserDirectory::new(
            provider,
            credentials,
            self.config.keycloak.clone(),
        ));

        let state = AppState {
            catalog: Arc::new(Catalog::new()),
            validator,
            directory,
        };

        let app = create_router(state, &self.config.cors)
            .layer(TimeoutLayer::new(self.config.server.request_timeout));
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("FLEET MANAGER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            realm = %self.config.keycloak.realm,
            client = %self.config.keycloak.admin_client_id,
            provider = %self.config.keycloak.base_url,
            "Identity provider configured"
        );
        if self.config.keycloak.admin_client_secret.is_empty() {
            warn!("Admin client secret is empty - service logins will be rejected");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
