//! Daemon settings — TOML file with environment variable overrides.
//!
//! Looks for `homenode.toml` in the working directory. Every field has a
//! default so the file is optional; environment variables take precedence
//! over file values. The *node* config (devices, sensors, schedules) is a
//! separate JSON document pointed at by `node.config_path`.

use serde::Deserialize;

/// Top-level daemon settings.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API listener settings.
    pub server: ServerConfig,
    /// Node config file location.
    pub node: NodeFileConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// API listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port; also the default port for outbound remote commands.
    pub port: u16,
}

/// Location of the JSON node config.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeFileConfig {
    pub config_path: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
    /// Log to this file instead of stderr; enables the `clear_log`
    /// API endpoint.
    pub file: Option<String>,
}

impl Config {
    /// Load settings from `homenode.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("homenode.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOMENODE_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("HOMENODE_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("HOMENODE_BIND") {
            if let Some((host, port)) = val.rsplit_once(':') {
                self.server.host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.server.port = port;
                }
            }
        }
        if let Ok(val) = std::env::var("HOMENODE_CONFIG") {
            self.node.config_path = val;
        }
        if let Ok(val) = std::env::var("HOMENODE_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("HOMENODE_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        Ok(())
    }

    /// The `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: homenode_adapter_api_tcp::DEFAULT_PORT,
        }
    }
}

impl Default for NodeFileConfig {
    fn default() -> Self {
        Self {
            config_path: "node.json".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "homenoded=info,homenode=info".to_string(),
            file: None,
        }
    }
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
