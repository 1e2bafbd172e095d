//! Gateway configuration: TOML file + CLI overrides.

use hub_core::{HubError, HubResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewaySection,
}

/// `[gateway]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_login_timeout_ms")]
    pub login_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_pre_auth_queue")]
    pub max_pre_auth_queue: usize,
    #[serde(default = "default_true")]
    pub login_ack: bool,
    /// Channels to create on startup.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            path: default_path(),
            login_timeout_ms: default_login_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_pre_auth_queue: default_max_pre_auth_queue(),
            login_ack: true,
            channels: Vec::new(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8888
}
fn default_path() -> String {
    "/hubiquitus".to_string()
}
fn default_login_timeout_ms() -> u64 {
    30_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_pre_auth_queue() -> usize {
    1024
}
fn default_true() -> bool {
    true
}

/// Values given on the command line; `None` keeps the file/default value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub path: Option<String>,
    pub login_timeout_ms: Option<u64>,
    pub channels: Vec<String>,
}

/// Resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// URL path prefix clients must connect under.
    pub path: String,
    /// How long a connection may stay unauthenticated.
    pub login_timeout: Duration,
    /// Deadline for client requests that expect a reply.
    pub request_timeout: Duration,
    /// Envelopes buffered before login; overflow closes the connection.
    pub max_pre_auth_queue: usize,
    /// Answer login envelopes with a `res` envelope.
    pub login_ack: bool,
    pub channels: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_section(GatewaySection::default())
    }
}

impl GatewayConfig {
    /// Load config from TOML file, then apply CLI overrides.
    pub fn load(config_path: Option<&Path>, overrides: Overrides) -> HubResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    parse(&content)?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let mut section = file_config.gateway;
        if let Some(port) = overrides.port {
            section.port = port;
        }
        if let Some(path) = overrides.path {
            section.path = path;
        }
        if let Some(ms) = overrides.login_timeout_ms {
            section.login_timeout_ms = ms;
        }
        for channel in overrides.channels {
            if !section.channels.contains(&channel) {
                section.channels.push(channel);
            }
        }

        let config = Self::from_section(section);
        config.validate()?;
        Ok(config)
    }

    fn from_section(section: GatewaySection) -> Self {
        Self {
            bind: section.bind,
            port: section.port,
            path: normalize_path(&section.path),
            login_timeout: Duration::from_millis(section.login_timeout_ms),
            request_timeout: Duration::from_millis(section.request_timeout_ms),
            max_pre_auth_queue: section.max_pre_auth_queue,
            login_ack: section.login_ack,
            channels: section.channels,
        }
    }

    fn validate(&self) -> HubResult<()> {
        if self.login_timeout.is_zero() {
            return Err(HubError::Config("login_timeout_ms must be positive".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(HubError::Config("request_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Whether an upgrade request for `path` falls under `prefix`.
pub(crate) fn path_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

fn parse(content: &str) -> HubResult<ConfigFile> {
    toml::from_str::<ConfigFile>(content)
        .map_err(|e| HubError::Config(format!("config parse error: {e}")))
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
