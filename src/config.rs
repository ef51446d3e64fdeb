//! Status dashboard configuration
//!
//! All settings come from `SD_`-prefixed environment variables, e.g.
//! `SD_PORT=8000`, `SD_KEYCLOAK_URL=https://idp.example.com`. Defaults follow
//! the deployment conventions of the service:
//!
//! ```text
//! SD_DB=status-dashboard.db
//! SD_PORT=8000
//! SD_HOSTNAME=localhost
//! SD_WEB_URL=http://localhost:9000
//! SD_LOG_LEVEL=devel
//! ```
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};

use config::{ConfigError, Environment};

/// A Configuration structure
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Path of the SQLite database file
    #[serde(default = "default_db")]
    pub db: String,
    /// Cache backend connection string; accepted for compatibility, unused
    #[serde(default)]
    pub cache: Option<String>,
    /// Log verbosity; `devel` maps to debug-level tracing
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Port to bind to; must fall into [1024, 50000]
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host name to bind to
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Public URL of the web frontend (CORS origin, error redirects)
    #[serde(default = "default_web_url")]
    pub web_url: String,
    /// Disable the whole authentication/RBAC pipeline (dev mode)
    #[serde(default)]
    pub authentication_disabled: bool,
    /// Shared secret for legacy HS256 tokens
    #[serde(default)]
    pub secret_key: String,
    /// Legacy single authorization group; stands in for the operator group
    /// when `SD_GROUP_OPERATORS` is unset
    #[serde(default)]
    pub auth_group: Option<String>,
    /// Group granting the Creator role
    #[serde(default)]
    pub group_creators: Option<String>,
    /// Group granting the Operator role
    #[serde(default)]
    pub group_operators: Option<String>,
    /// Group granting the Admin role
    #[serde(default)]
    pub group_admins: Option<String>,
    /// Keycloak base URL
    #[serde(default)]
    pub keycloak_url: Option<String>,
    /// Keycloak realm name
    #[serde(default)]
    pub keycloak_realm: Option<String>,
    /// OAuth2 client id
    #[serde(default)]
    pub keycloak_client_id: Option<String>,
    /// OAuth2 client secret
    #[serde(default)]
    pub keycloak_client_secret: Option<String>,
}

impl Config {
    /// Returns a configuration object assembled from `SD_`-prefixed
    /// environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let s = config::Config::builder()
            .add_source(Environment::with_prefix("SD").prefix_separator("_"))
            .build()?;
        let config: Config = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port < 1024 || self.port > 50000 {
            return Err(ConfigError::Message(format!(
                "port {} outside of the allowed range [1024, 50000]",
                self.port
            )));
        }
        Ok(())
    }

    /// Returns socket address to use for binding
    pub fn get_socket_addr(&self) -> std::io::Result<SocketAddr> {
        format!("{}:{}", self.hostname, self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("can not resolve {}", self.hostname),
                )
            })
    }

    /// Base URL under which this API itself is reachable; used for the OIDC
    /// redirect_uri.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.hostname, self.port)
    }

    /// The group name granting the Operator role, honoring the legacy
    /// `SD_AUTH_GROUP` alias.
    pub fn operator_group(&self) -> Option<String> {
        self.group_operators.clone().or_else(|| self.auth_group.clone())
    }

    /// Tracing filter directive derived from the configured log level.
    pub fn tracing_filter(&self) -> String {
        let level = match self.log_level.as_str() {
            "devel" | "debug" => "debug",
            "trace" => "trace",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        };
        format!("status_dashboard={},tower_http={}", level, level)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db: default_db(),
            cache: None,
            log_level: default_log_level(),
            port: default_port(),
            hostname: default_hostname(),
            web_url: default_web_url(),
            authentication_disabled: false,
            secret_key: String::new(),
            auth_group: None,
            group_creators: None,
            group_operators: None,
            group_admins: None,
            keycloak_url: None,
            keycloak_realm: None,
            keycloak_client_id: None,
            keycloak_client_secret: None,
        }
    }
}

fn default_db() -> String {
    "status-dashboard.db".to_string()
}

fn default_log_level() -> String {
    "devel".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_web_url() -> String {
    "http://localhost:9000".to_string()
}
