//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order, later files override earlier. Missing files are
    /// silently skipped.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Keycloak (identity provider) configuration
    pub keycloak: KeycloakConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider configuration.
///
/// Two client identities are involved: the `admin_client_*` pair is the
/// service's own client-credentials identity (used by the renewal loop),
/// while `frontend_client_id` is the audience the caller-facing tokens were
/// issued to (used for introspection scoping).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeycloakConfig {
    /// Base URL of the Keycloak server (no trailing `/realms/...` path)
    pub base_url: String,
    /// Realm name
    pub realm: String,
    /// Client ID this service logs in with (client-credentials grant)
    pub admin_client_id: String,
    /// Client secret for `admin_client_id`
    pub admin_client_secret: String,
    /// Client ID the frontend authenticates against (introspection audience)
    pub frontend_client_id: String,
}

impl Default for KeycloakConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8180".to_string(),
            realm: "master".to_string(),
            admin_client_id: "admin-cli".to_string(),
            admin_client_secret: String::new(),
            frontend_client_id: "admin-frontend-client".to_string(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable the CORS layer
    pub enabled: bool,
    /// Allowed origins. Empty means "any origin".
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (FLEET_MANAGER_ prefix)
        figment = figment.merge(Env::prefixed("FLEET_MANAGER_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into the process environment
        config.load_env_files();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {path_str}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {path_str}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }
}
