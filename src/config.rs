use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, error};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HS256 secret used to validate access tokens
    pub jwt_secret: Option<String>,

    /// Full database URL, takes precedence over the discrete db_* fields
    pub db_url: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<String>,
    pub db_name: Option<String>,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Capacity of each connection's outbound queue
    #[serde(default = "default_ws_send_buffer")]
    pub ws_send_buffer: usize,

    /// Largest inbound websocket message accepted
    #[serde(default = "default_ws_max_message_bytes")]
    pub ws_max_message_bytes: usize,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        // Load from environment variables using envy
        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the Postgres connection string.
    ///
    /// `db_url` wins when set; otherwise the DSN is assembled from the discrete
    /// fields, which must at least name a database.
    pub fn database_url(&self) -> Option<String> {
        if let Some(url) = &self.db_url {
            return Some(url.clone());
        }

        let name = self.db_name.as_ref()?;
        let host = self.db_host.as_deref().unwrap_or("localhost");
        let port = self.db_port.as_deref().unwrap_or("5432");
        let user = self.db_user.as_deref().unwrap_or("postgres");
        let credentials = match &self.db_password {
            Some(password) => format!("{}:{}", user, password),
            None => user.to_string(),
        };
        Some(format!("postgres://{}@{}:{}/{}?sslmode=disable", credentials, host, port, name))
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            jwt_secret: None,
            db_url: None,
            db_user: None,
            db_password: None,
            db_host: None,
            db_port: None,
            db_name: None,
            db_max_connections: default_db_max_connections(),
            ws_send_buffer: default_ws_send_buffer(),
            ws_max_message_bytes: default_ws_max_message_bytes(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_ws_send_buffer() -> usize {
    256
}

fn default_ws_max_message_bytes() -> usize {
    1024 * 1024
}
