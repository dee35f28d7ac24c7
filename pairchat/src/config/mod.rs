//! Configuration system for the `Pairchat` sync engine.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/pairchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use pairchat_proto::message::ChatId;
use url::Url;

use crate::session::{
    DEFAULT_AUTH_REDIRECT_DELAY, DEFAULT_CHANNEL_CAPACITY, DEFAULT_NOTICE_DISMISS,
    DEFAULT_RECONNECT_DELAY, SessionConfig,
};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    ws_url: Option<String>,
    token: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    reconnect_delay_ms: Option<u64>,
    auth_redirect_delay_ms: Option<u64>,
    notice_dismiss_ms: Option<u64>,
    channel_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// HTTP API base URL.
    pub base_url: Option<String>,
    /// `WebSocket` base URL.
    pub ws_url: Option<String>,
    /// Bearer token for both surfaces.
    pub token: Option<String>,

    // -- Sync --
    /// Fixed delay between live-channel reconnect attempts.
    pub reconnect_delay: Duration,
    /// Delay before navigating away after an auth failure.
    pub auth_redirect_delay: Duration,
    /// Auto-dismiss delay for transient notices.
    pub notice_dismiss: Duration,
    /// Channel capacity for command/event mpsc channels.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            ws_url: None,
            token: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            auth_redirect_delay: DEFAULT_AUTH_REDIRECT_DELAY,
            notice_dismiss: DEFAULT_NOTICE_DISMISS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/pairchat/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. This is separated from `load()` to
    /// enable unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            base_url: cli
                .server_url
                .clone()
                .or_else(|| file.server.base_url.clone()),
            ws_url: cli.ws_url.clone().or_else(|| file.server.ws_url.clone()),
            token: cli.token.clone().or_else(|| file.server.token.clone()),
            reconnect_delay: file
                .sync
                .reconnect_delay_ms
                .map_or(defaults.reconnect_delay, Duration::from_millis),
            auth_redirect_delay: file
                .sync
                .auth_redirect_delay_ms
                .map_or(defaults.auth_redirect_delay, Duration::from_millis),
            notice_dismiss: file
                .sync
                .notice_dismiss_ms
                .map_or(defaults.notice_dismiss, Duration::from_millis),
            channel_capacity: file
                .sync
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
        }
    }

    /// Build a [`SessionConfig`] for one conversation, if all required
    /// server fields are present and parse as URLs.
    ///
    /// Returns `None` when `base_url`, `ws_url`, or `token` is missing:
    /// without a token there is nothing to fetch and nothing to subscribe
    /// to, so no session starts at all.
    #[must_use]
    pub fn to_session_config(&self, chat_id: ChatId, peer_deleted: bool) -> Option<SessionConfig> {
        let base_url = Url::parse(self.base_url.as_deref()?).ok()?;
        let ws_url = Url::parse(self.ws_url.as_deref()?).ok()?;
        let token = self.token.clone()?;
        if token.is_empty() {
            return None;
        }

        let mut session = SessionConfig::new(base_url, ws_url, token, chat_id);
        session.peer_deleted = peer_deleted;
        session.reconnect_delay = self.reconnect_delay;
        session.auth_redirect_delay = self.auth_redirect_delay;
        session.notice_dismiss = self.notice_dismiss;
        session.channel_capacity = self.channel_capacity;
        Some(session)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "One-to-one chat synchronization client")]
pub struct CliArgs {
    /// HTTP API base URL, e.g. `http://localhost:8000`.
    #[arg(long, env = "PAIRCHAT_SERVER_URL")]
    pub server_url: Option<String>,

    /// WebSocket base URL, e.g. `ws://localhost:8000`.
    #[arg(long, env = "PAIRCHAT_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer token for the API and the live channel.
    #[arg(long, env = "PAIRCHAT_TOKEN")]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/pairchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "PAIRCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/pairchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("pairchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
