//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub backend: BackendConfig,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Log every request through the tower-http trace layer
    #[serde(default = "default_true")]
    pub log_requests: bool,

    /// Allow any origin
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4242
}

fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_requests: true,
            cors_permissive: true,
        }
    }
}

impl ApiConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryConfig {
    /// Version reported by `/api/version`
    #[serde(default = "default_version")]
    pub version: String,

    /// Log pipeline details at debug level
    #[serde(default)]
    pub verbose: bool,

    /// Default `max` for `/api/suggest`
    #[serde(default = "default_suggest_max")]
    pub suggest_max: usize,
}

fn default_version() -> String {
    "2.2.0".to_string()
}

fn default_suggest_max() -> usize {
    25
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            verbose: false,
            suggest_max: default_suggest_max(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// In-memory backend configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    /// JSON file of series to load at startup
    pub seed_file: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tsdb-shim").join("config.toml")),
            Some(PathBuf::from("/etc/tsdb-shim/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `TSDB_SHIM_*` overrides resolved through `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("TSDB_SHIM_HOST") {
            self.api.host = host;
        }
        if let Some(port) = lookup("TSDB_SHIM_PORT") {
            if let Ok(p) = port.parse() {
                self.api.port = p;
            }
        }

        if let Some(version) = lookup("TSDB_SHIM_VERSION") {
            self.query.version = version;
        }
        if let Some(verbose) = lookup("TSDB_SHIM_VERBOSE") {
            self.query.verbose = matches!(verbose.as_str(), "1" | "true" | "yes");
        }

        if let Some(level) = lookup("TSDB_SHIM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TSDB_SHIM_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(seed) = lookup("TSDB_SHIM_SEED_FILE") {
            self.backend.seed_file = Some(seed);
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# tsdb-shim Configuration
#
# Environment variables override these settings:
# - TSDB_SHIM_HOST
# - TSDB_SHIM_PORT
# - TSDB_SHIM_VERSION
# - TSDB_SHIM_VERBOSE
# - TSDB_SHIM_LOG_LEVEL
# - TSDB_SHIM_LOG_FORMAT
# - TSDB_SHIM_SEED_FILE

[api]
# API server host
host = "0.0.0.0"

# API server port (OpenTSDB default)
port = 4242

# Log each HTTP request
log_requests = true

# Allow cross-origin requests from any origin
cors_permissive = true

[query]
# Version string reported by /api/version
version = "2.2.0"

# Log parsed queries and tag sets at debug level
verbose = false

# Default number of results for /api/suggest
suggest_max = 25

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

[backend]
# Optional JSON file of series loaded into the in-memory backend at startup
# seed_file = "seed.json"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.port, 4242);
        assert_eq!(config.query.version, "2.2.0");
        assert_eq!(config.query.suggest_max, 25);
        assert!(!config.query.verbose);
        assert!(config.backend.seed_file.is_none());
    }

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.api.host, defaults.api.host);
        assert_eq!(config.api.port, defaults.api.port);
        assert_eq!(config.query.version, defaults.query.version);
        assert_eq!(config.logging.format, defaults.logging.format);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[api]\nport = 9999\n\n[query]\nverbose = true").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api.port, 9999);
        assert_eq!(config.api.host, "0.0.0.0");
        assert!(config.query.verbose);
        assert_eq!(config.query.version, "2.2.0");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[api\nport = ").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TSDB_SHIM_PORT", "5000"),
            ("TSDB_SHIM_VERSION", "2.4.0"),
            ("TSDB_SHIM_VERBOSE", "true"),
            ("TSDB_SHIM_SEED_FILE", "/tmp/seed.json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.api.port, 5000);
        assert_eq!(config.query.version, "2.4.0");
        assert!(config.query.verbose);
        assert_eq!(config.backend.seed_file.as_deref(), Some("/tmp/seed.json"));
        assert_eq!(config.logging.level, "info");
    }
}
