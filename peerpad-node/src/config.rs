//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Node configuration. File: ~/.config/peerpad/config.toml or /etc/peerpad/config.toml.
/// Env overrides: PEERPAD_DISCOVERY_PORT, PEERPAD_TRANSPORT_PORT, PEERPAD_DOWNLOAD_DIR,
/// PEERPAD_STORE_DIR, PEERPAD_LOG.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 45680).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Session TCP port a host listens on (default 45681).
    #[serde(default = "default_transport_port")]
    pub transport_port: u16,
    /// How long a guest waits to find the host (default 15 s).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Where received files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Root of the local expiring store.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
    /// Language tag recorded with saved snippets.
    #[serde(default = "default_language")]
    pub language: String,
    /// tracing filter used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_discovery_port() -> u16 {
    45680
}
fn default_transport_port() -> u16 {
    45681
}
fn default_connect_timeout_secs() -> u64 {
    15
}
fn default_download_dir() -> PathBuf {
    PathBuf::from("received")
}
fn default_store_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(h) => PathBuf::from(h).join(".local/share/peerpad/store"),
        None => PathBuf::from(".peerpad/store"),
    }
}
fn default_language() -> String {
    "plaintext".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            transport_port: default_transport_port(),
            connect_timeout_secs: default_connect_timeout_secs(),
            download_dir: default_download_dir(),
            store_dir: default_store_dir(),
            language: default_language(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("PEERPAD_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.discovery_port = p;
    }
    if let Some(p) = var("PEERPAD_TRANSPORT_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.transport_port = p;
    }
    if let Some(d) = var("PEERPAD_DOWNLOAD_DIR") {
        c.download_dir = PathBuf::from(d);
    }
    if let Some(d) = var("PEERPAD_STORE_DIR") {
        c.store_dir = PathBuf::from(d);
    }
    if let Some(l) = var("PEERPAD_LOG") {
        c.log_level = l;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/peerpad/config.toml"));
    }
    out.push(PathBuf::from("/etc/peerpad/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    let path = config_paths().into_iter().find(|p| p.exists())?;
    let s = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<Config>(&s) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config");
            None
        }
    }
}
