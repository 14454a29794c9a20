//! Configuration management for shell-bridge.
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. Configuration file (JSON)
//! 4. Default values

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::api::{ServerConfig, DEFAULT_BODY_LIMIT};
use crate::channel::{DrainPolicy, DEFAULT_MAX_BYTES, DEFAULT_MAX_DURATION};
use crate::cli::Args;
use crate::power::DEFAULT_CREDENTIALS_PATH;
use crate::session::ReaperConfig;
use crate::transport::{SshOptions, DEFAULT_SSH_PORT};

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerSection,
    /// SSH connection limits.
    pub ssh: SshSection,
    /// Session lifetime and channel timing.
    pub session: SessionSection,
    /// Local files.
    pub storage: StorageSection,
    /// Logging configuration.
    pub logging: LoggingSection,
}

/// Server configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable graceful shutdown.
    pub graceful_shutdown: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            graceful_shutdown: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub connect_timeout_secs: u64,
    pub keepalive_secs: u64,
    pub exec_timeout_secs: u64,
    /// Port used when a request does not name one.
    pub default_port: u16,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keepalive_secs: 30,
            exec_timeout_secs: 60,
            default_port: DEFAULT_SSH_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Sessions unused this long are closed. 0 disables reaping.
    pub idle_timeout_secs: u64,
    pub reap_interval_secs: u64,
    /// 0 means unlimited.
    pub max_sessions: usize,
    /// Idle window that ends a command's output.
    pub read_idle_ms: u64,
    pub poll_interval_ms: u64,
    /// Idle window for the prompt probe and completion queries.
    pub prompt_probe_ms: u64,
    pub bootstrap_pause_ms: u64,
    /// Upper bound on collecting one command's output, even if it keeps printing.
    pub max_drain_secs: u64,
    /// Cap on bytes collected per command.
    pub max_output_bytes: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 30 * 60,
            reap_interval_secs: 60,
            max_sessions: 64,
            read_idle_ms: 1000,
            poll_interval_ms: 100,
            prompt_probe_ms: 300,
            bootstrap_pause_ms: 100,
            max_drain_secs: DEFAULT_MAX_DURATION.as_secs(),
            max_output_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Saved host login for the power endpoints.
    pub credentials_path: PathBuf,
    /// Staging directory for uploads; the system temp dir when unset.
    pub upload_dir: Option<PathBuf>,
    /// Largest accepted request body, uploads included.
    pub max_upload_bytes: usize,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            upload_dir: None,
            max_upload_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (error, warn, info, debug, trace) or a full filter directive.
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Json)
    }

    /// Apply environment variable overrides.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = var("SHELL_BRIDGE_HOST") {
            self.server.host = host;
        }

        if let Some(port) = var("SHELL_BRIDGE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }

        if let Some(path) = var("SHELL_BRIDGE_CREDENTIALS") {
            if !path.is_empty() {
                self.storage.credentials_path = PathBuf::from(path);
            }
        }

        if let Some(level) = var("SHELL_BRIDGE_LOG_LEVEL") {
            self.logging.level = level;
        } else if let Some(level) = var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    /// Apply CLI argument overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(host) = args.host {
            self.server.host = host.to_string();
        }
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
        if let Some(ref path) = args.credentials {
            self.storage.credentials_path = path.clone();
        }
        if let Some(secs) = args.idle_timeout {
            self.session.idle_timeout_secs = secs;
        }
        if let Some(max) = args.max_sessions {
            self.session.max_sessions = max;
        }
    }

    /// Load configuration with full priority chain.
    ///
    /// Priority: CLI args > env vars > config file > defaults
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match args.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        config.apply_env();
        config.apply_args(args);
        Ok(config)
    }

    /// Convert to ServerConfig for the API server.
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let host: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidHost(self.server.host.clone()))?;

        let server_config = ServerConfig::new(host.to_string(), self.server.port);
        if self.server.graceful_shutdown {
            Ok(server_config)
        } else {
            Ok(server_config.without_graceful_shutdown())
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            keepalive_interval: Duration::from_secs(self.ssh.keepalive_secs),
            exec_timeout: Duration::from_secs(self.ssh.exec_timeout_secs),
        }
    }

    pub fn drain_policy(&self) -> DrainPolicy {
        DrainPolicy {
            idle_timeout: Duration::from_millis(self.session.read_idle_ms),
            poll_interval: Duration::from_millis(self.session.poll_interval_ms),
            probe_timeout: Duration::from_millis(self.session.prompt_probe_ms),
            bootstrap_pause: Duration::from_millis(self.session.bootstrap_pause_ms),
            max_duration: Duration::from_secs(self.session.max_drain_secs),
            max_bytes: self.session.max_output_bytes,
        }
    }

    pub fn reaper_config(&self) -> ReaperConfig {
        ReaperConfig {
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
            interval: Duration::from_secs(self.session.reap_interval_secs),
        }
    }

    /// Get the log level filter string.
    pub fn log_filter(&self) -> &str {
        &self.logging.level
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// JSON parsing error.
    Json(serde_json::Error),
    /// Invalid host address.
    InvalidHost(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "failed to read config file: {}", e),
            Self::Json(e) => write!(f, "failed to parse config file: {}", e),
            Self::InvalidHost(host) => write!(f, "invalid host address: {}", host),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.ssh.default_port, 22);
        assert_eq!(config.session.max_sessions, 64);
        assert_eq!(config.session.idle_timeout_secs, 1800);
        assert_eq!(
            config.storage.credentials_path,
            PathBuf::from("host_credentials.json")
        );
    }

    #[test]
    fn test_config_from_json() {
        let file = write_config(
            r#"{
                "server": { "host": "0.0.0.0", "port": 8080 },
                "session": { "max_sessions": 4, "read_idle_ms": 1500 },
                "storage": { "upload_dir": "/var/tmp/uploads" }
            }"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.max_sessions, 4);
        assert_eq!(config.session.poll_interval_ms, 100); // Default
        assert_eq!(
            config.storage.upload_dir,
            Some(PathBuf::from("/var/tmp/uploads"))
        );
        assert_eq!(
            config.drain_policy().idle_timeout,
            Duration::from_millis(1500)
        );
    }

    #[test]
    fn test_drain_limits_from_json() {
        let file = write_config(
            r#"{ "session": { "max_drain_secs": 5, "max_output_bytes": 4096 } }"#,
        );

        let policy = Config::from_file(file.path()).unwrap().drain_policy();
        assert_eq!(policy.max_duration, Duration::from_secs(5));
        assert_eq!(policy.max_bytes, 4096);

        let defaults = Config::default().drain_policy();
        assert_eq!(defaults.max_duration, DEFAULT_MAX_DURATION);
        assert_eq!(defaults.max_bytes, DEFAULT_MAX_BYTES);
    }

    #[test]
    fn test_config_invalid_json() {
        let file = write_config("{ server: ");
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_config_missing_file() {
        let result = Config::from_file(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("SHELL_BRIDGE_HOST", "0.0.0.0"),
            ("SHELL_BRIDGE_PORT", "9000"),
            ("SHELL_BRIDGE_CREDENTIALS", "/etc/shell-bridge/creds.json"),
            ("RUST_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.storage.credentials_path,
            PathBuf::from("/etc/shell-bridge/creds.json")
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_env_log_level_beats_rust_log() {
        let mut config = Config::default();
        config.apply_env_from(|name| match name {
            "SHELL_BRIDGE_LOG_LEVEL" => Some("warn".into()),
            "RUST_LOG" => Some("trace".into()),
            _ => None,
        });
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_env_ignores_bad_port() {
        let mut config = Config::default();
        config.apply_env_from(|name| (name == "SHELL_BRIDGE_PORT").then(|| "http".to_string()));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.server.port = 8080;
        let args = Args {
            host: Some("192.168.1.1".parse().unwrap()),
            idle_timeout: Some(0),
            max_sessions: Some(2),
            ..Args::default()
        };

        config.apply_args(&args);

        assert_eq!(config.server.host, "192.168.1.1");
        // Unset flags leave the value alone.
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.session.max_sessions, 2);
        assert!(!config.reaper_config().is_enabled());
    }

    #[test]
    fn test_to_server_config() {
        let config = Config::default();
        let server_config = config.to_server_config().unwrap();

        assert_eq!(server_config.host, "127.0.0.1");
        assert_eq!(server_config.port, 3000);
        assert!(server_config.graceful_shutdown);
    }

    #[test]
    fn test_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_string();

        let result = config.to_server_config();
        assert!(matches!(result, Err(ConfigError::InvalidHost(_))));
    }

    #[test]
    fn test_ssh_options() {
        let mut config = Config::default();
        config.ssh.connect_timeout_secs = 3;
        let options = config.ssh_options();
        assert_eq!(options.connect_timeout, Duration::from_secs(3));
        assert_eq!(options.keepalive_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains("\"credentials_path\""));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
