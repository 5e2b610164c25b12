//! Server configuration: TOML file, then environment overrides, then
//! validation.
//!
//! ```toml
//! bind = "0.0.0.0:10140"
//! transport = "tcp"
//! codec = "bincode"
//! tick_interval_ms = 100
//! idle_timeout_secs = 30
//!
//! [auth]
//! mode = "timestamp"
//! token_validity_window_secs = 180
//!
//! [tls]
//! cert_path = "server.crt"
//! key_path = "server.key"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use matchsync_participant::{
    DEFAULT_DEV_MARKER, DevTokenVerifier, ParticipantError, PlainTextDecryptor,
    TimestampTokenVerifier, TokenVerifier,
};
use matchsync_protocol::UserId;
use matchsync_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when no path is given.
pub const CONFIG_PATH_ENV: &str = "MATCHSYNC_CONFIG";

const MIN_FRAME_BYTES: usize = 64;

/// Errors produced while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which byte-stream transport the server listens with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Length-prefixed frames over TCP.
    #[default]
    Tcp,
    /// One binary WebSocket message per frame.
    Websocket,
}

/// Which body codec frames use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Bincode,
    Json,
}

/// How Join tokens are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Any token containing `dev_marker`.
    #[default]
    Dev,
    /// Base64 RFC 3339 timestamp within the validity window.
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub dev_marker: String,
    pub token_validity_window_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Dev,
            dev_marker: DEFAULT_DEV_MARKER.into(),
            token_validity_window_secs: 180,
        }
    }
}

impl AuthConfig {
    pub fn token_validity_window(&self) -> Duration {
        Duration::from_secs(self.token_validity_window_secs)
    }

    /// The verifier this section selects.
    pub fn verifier(&self) -> ConfiguredVerifier {
        match self.mode {
            AuthMode::Dev => ConfiguredVerifier::Dev(DevTokenVerifier::new(self.dev_marker.clone())),
            AuthMode::Timestamp => ConfiguredVerifier::Timestamp(TimestampTokenVerifier::new(
                PlainTextDecryptor,
                self.token_validity_window(),
            )),
        }
    }
}

/// A [`TokenVerifier`] chosen at startup from [`AuthConfig::mode`].
#[derive(Debug, Clone)]
pub enum ConfiguredVerifier {
    Dev(DevTokenVerifier),
    Timestamp(TimestampTokenVerifier),
}

impl TokenVerifier for ConfiguredVerifier {
    async fn verify(&self, token: &str, claimed: UserId) -> Result<(), ParticipantError> {
        match self {
            Self::Dev(verifier) => verifier.verify(token, claimed).await,
            Self::Timestamp(verifier) => verifier.verify(token, claimed).await,
        }
    }
}

/// PEM files for TLS termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Everything the `matchsync` binary needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub transport: TransportKind,
    pub codec: CodecKind,
    pub tick_interval_ms: u64,
    pub idle_timeout_secs: u64,
    pub max_frame_bytes: usize,
    pub auth: AuthConfig,
    /// Absent means plaintext.
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:10140".into(),
            transport: TransportKind::Tcp,
            codec: CodecKind::Bincode,
            tick_interval_ms: 100,
            idle_timeout_secs: 30,
            max_frame_bytes: 65_536,
            auth: AuthConfig::default(),
            tls: None,
        }
    }
}

impl ServerConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Loads `path` (or the file named by `MATCHSYNC_CONFIG`, or nothing),
    /// applies `MATCHSYNC_*` environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `MATCHSYNC_*` overrides. `lookup` returns the raw value of
    /// a variable; empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(bind) = get("MATCHSYNC_BIND") {
            self.bind = bind;
        }
        if let Some(v) = get("MATCHSYNC_TICK_INTERVAL_MS") {
            self.tick_interval_ms = parse_number("MATCHSYNC_TICK_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("MATCHSYNC_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = parse_number("MATCHSYNC_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("MATCHSYNC_TOKEN_WINDOW_SECS") {
            self.auth.token_validity_window_secs = parse_number("MATCHSYNC_TOKEN_WINDOW_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("bind must not be empty".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be >= 1".into()));
        }
        // Clients are told the interval as a u32.
        if self.tick_interval_ms > u64::from(u32::MAX) {
            return Err(ConfigError::Invalid(format!(
                "tick_interval_ms must be <= {}",
                u32::MAX
            )));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid("idle_timeout_secs must be >= 1".into()));
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(ConfigError::Invalid(format!(
                "max_frame_bytes must be >= {MIN_FRAME_BYTES}"
            )));
        }
        if self.auth.mode == AuthMode::Dev && self.auth.dev_marker.is_empty() {
            return Err(ConfigError::Invalid("auth.dev_marker must not be empty".into()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// The slice of this config every session shares.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            tick_interval_ms: self.tick_interval_ms,
            ..SessionConfig::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: not a number: {value:?}")))
}
