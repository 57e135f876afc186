//! Configuration for tasksync
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TASKSYNC_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::sync::socket::{self, SyncMode};
use crate::sync::{RetryPolicy, SyncOptions};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Rendezvous location and mode
    pub sync: SyncSettings,

    /// Deadlines and intervals
    pub timing: TimingSettings,

    /// Secondary reconnection backoff
    pub reconnect: ReconnectSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Rendezvous settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Enable inter-instance sync
    pub enabled: bool,

    /// production or development; picks the socket file name
    pub mode: SyncMode,

    /// Directory holding the socket and its lock file
    pub state_dir: String,

    /// Explicit socket path, overriding state_dir + mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

/// Timing settings, all in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub accept_poll_ms: u64,
    pub server_read_timeout_ms: u64,
    pub client_read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub dial_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub settle_delay_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub idle_retry_ms: u64,
    pub closed_pause_ms: u64,
}

/// Reconnection backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Attempts per reconnection sequence
    pub max_attempts: u32,

    /// Wait before the first attempt in milliseconds
    pub initial_delay_ms: u64,

    /// Growth factor between attempts
    pub multiplier: f64,

    /// Cap on any single wait in milliseconds
    pub max_delay_ms: u64,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Maximum log file size in MB before rotation
    pub max_file_size_mb: u64,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SyncMode::Production,
            state_dir: default_state_dir(),
            socket_path: None,
        }
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            accept_poll_ms: 1000,
            server_read_timeout_ms: 120_000,
            client_read_timeout_ms: 90_000,
            write_timeout_ms: 5000,
            dial_timeout_ms: 2000,
            heartbeat_interval_ms: 10_000,
            settle_delay_ms: 100,
            shutdown_timeout_ms: 5000,
            idle_retry_ms: 1000,
            closed_pause_ms: 100,
        }
    }
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_file_size_mb: 100,
            max_files: 5,
            json_format: false,
        }
    }
}

/// Platform state directory for tasksync
fn default_state_dir() -> String {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|p| p.join("tasksync"))
        .unwrap_or_else(|| PathBuf::from("/tmp/tasksync"))
        .to_string_lossy()
        .into_owned()
}

impl SyncConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.expand_paths();
        config.validate()?;

        Ok(config)
    }

    /// Parse one TOML file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");
        let content = fs::read_to_string(path).map_err(|source| Error::IoRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content)?;
        info!(path = %path.display(), "Configuration loaded from file");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.message().to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("tasksync.toml"),
            dirs::config_dir()
                .map(|p| p.join("tasksync").join("config.toml"))
                .unwrap_or_default(),
            dirs::home_dir()
                .map(|p| p.join(".tasksync").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/tasksync/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Sync settings
        if let Ok(val) = std::env::var("TASKSYNC_ENABLED") {
            self.sync.enabled = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("TASKSYNC_MODE") {
            match val.to_lowercase().as_str() {
                "production" | "prod" => self.sync.mode = SyncMode::Production,
                "development" | "dev" => self.sync.mode = SyncMode::Development,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("TASKSYNC_STATE_DIR") {
            self.sync.state_dir = val;
        }
        if let Ok(val) = std::env::var("TASKSYNC_SOCKET_PATH") {
            self.sync.socket_path = Some(val);
        }

        // Timing settings
        env_u64("TASKSYNC_HEARTBEAT_INTERVAL_MS", &mut self.timing.heartbeat_interval_ms);
        env_u64("TASKSYNC_SERVER_READ_TIMEOUT_MS", &mut self.timing.server_read_timeout_ms);
        env_u64("TASKSYNC_CLIENT_READ_TIMEOUT_MS", &mut self.timing.client_read_timeout_ms);
        env_u64("TASKSYNC_WRITE_TIMEOUT_MS", &mut self.timing.write_timeout_ms);
        env_u64("TASKSYNC_DIAL_TIMEOUT_MS", &mut self.timing.dial_timeout_ms);

        // Reconnect settings
        if let Ok(val) = std::env::var("TASKSYNC_RECONNECT_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.reconnect.max_attempts = n;
            }
        }
        env_u64("TASKSYNC_RECONNECT_INITIAL_DELAY_MS", &mut self.reconnect.initial_delay_ms);
        env_u64("TASKSYNC_RECONNECT_MAX_DELAY_MS", &mut self.reconnect.max_delay_ms);

        // Logging settings
        if let Ok(val) = std::env::var("TASKSYNC_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TASKSYNC_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TASKSYNC_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.sync.state_dir = expand_path(&self.sync.state_dir);

        if let Some(ref path) = self.sync.socket_path {
            self.sync.socket_path = Some(expand_path(path));
        }
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        let timeouts = [
            ("timing.accept_poll_ms", self.timing.accept_poll_ms),
            ("timing.server_read_timeout_ms", self.timing.server_read_timeout_ms),
            ("timing.client_read_timeout_ms", self.timing.client_read_timeout_ms),
            ("timing.write_timeout_ms", self.timing.write_timeout_ms),
            ("timing.dial_timeout_ms", self.timing.dial_timeout_ms),
            ("timing.heartbeat_interval_ms", self.timing.heartbeat_interval_ms),
            ("timing.shutdown_timeout_ms", self.timing.shutdown_timeout_ms),
            ("timing.idle_retry_ms", self.timing.idle_retry_ms),
        ];
        for (field, value) in timeouts {
            if value == 0 {
                return Err(Error::config_field_invalid(field, "must be greater than zero"));
            }
        }

        if self.reconnect.max_attempts == 0 {
            return Err(Error::config_field_invalid(
                "reconnect.max_attempts",
                "must be at least 1",
            ));
        }
        if !(self.reconnect.multiplier >= 1.0) {
            return Err(Error::config_field_invalid(
                "reconnect.multiplier",
                "must be at least 1.0",
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(Error::config_field_invalid(
                "reconnect.max_delay_ms",
                "must not be smaller than initial_delay_ms",
            ));
        }

        socket::validate_socket_path(&self.socket_path()?)
    }

    /// Rendezvous socket path derived from the settings
    pub fn socket_path(&self) -> Result<PathBuf> {
        if let Some(explicit) = &self.sync.socket_path {
            return Ok(PathBuf::from(explicit));
        }
        if self.sync.state_dir.is_empty() {
            return Err(Error::config_field_invalid(
                "sync.state_dir",
                "state directory cannot be empty",
            ));
        }
        Ok(socket::socket_path(Path::new(&self.sync.state_dir), self.sync.mode))
    }

    /// Runtime options for the server, client and coordinator
    pub fn sync_options(&self) -> SyncOptions {
        let t = &self.timing;
        let r = &self.reconnect;

        SyncOptions {
            accept_poll_interval: Duration::from_millis(t.accept_poll_ms),
            server_read_timeout: Duration::from_millis(t.server_read_timeout_ms),
            client_read_timeout: Duration::from_millis(t.client_read_timeout_ms),
            write_timeout: Duration::from_millis(t.write_timeout_ms),
            dial_timeout: Duration::from_millis(t.dial_timeout_ms),
            heartbeat_interval: Duration::from_millis(t.heartbeat_interval_ms),
            settle_delay: Duration::from_millis(t.settle_delay_ms),
            shutdown_timeout: Duration::from_millis(t.shutdown_timeout_ms),
            idle_retry_interval: Duration::from_millis(t.idle_retry_ms),
            closed_pause: Duration::from_millis(t.closed_pause_ms),
            retry: RetryPolicy {
                max_attempts: r.max_attempts,
                initial_delay: Duration::from_millis(r.initial_delay_ms),
                multiplier: r.multiplier,
                max_delay: Duration::from_millis(r.max_delay_ms),
            },
            ..SyncOptions::default()
        }
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

fn env_u64(name: &str, target: &mut u64) {
    if let Ok(val) = std::env::var(name) {
        if let Ok(n) = val.parse() {
            *target = n;
        }
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location for `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tasksync")
        .join("config.toml")
}

/// Initialize a new configuration file, returning where it was written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::config_validation(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|source| Error::IoWrite {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|source| Error::IoWrite {
        path: config_path.clone(),
        source,
    })?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# tasksync configuration

[sync]
# Enable inter-instance sync
enabled = true

# production or development; each mode has its own socket
mode = "production"

# Directory holding the rendezvous socket (default: platform state dir)
# state_dir = "~/.local/state/tasksync"

# Explicit socket path (absolute, at most 100 characters)
# socket_path = "/run/user/1000/tasksync.sock"

[timing]
# All values in milliseconds
accept_poll_ms = 1000
server_read_timeout_ms = 120000
client_read_timeout_ms = 90000
write_timeout_ms = 5000
dial_timeout_ms = 2000
heartbeat_interval_ms = 10000
settle_delay_ms = 100
shutdown_timeout_ms = 5000
idle_retry_ms = 1000
closed_pause_ms = 100

[reconnect]
# Attempts per reconnection sequence
max_attempts = 5

# Wait before the first attempt in milliseconds
initial_delay_ms = 500

# Growth factor between attempts
multiplier = 2.0

# Cap on any single wait in milliseconds
max_delay_ms = 30000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.local/state/tasksync/tasksync.log"

# Maximum log file size in MB before rotation
max_file_size_mb = 100

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
