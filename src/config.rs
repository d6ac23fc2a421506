use serde::Deserialize;
use std::path::{Path, PathBuf};

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Interface the DBGp listener binds.
    pub listen_host: String,
    /// Port the DBGp listener binds. Xdebug's default is 9003.
    pub listen_port: u16,
    /// How long a single engine command may stay unanswered.
    pub command_timeout_ms: u64,
    /// Negotiated property tree depth.
    pub max_depth: u32,
    /// Negotiated children per property level.
    pub max_children: u32,
    /// Negotiated bytes per property value.
    pub max_data: u32,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 9003,
            command_timeout_ms: 30_000,
            max_depth: 3,
            max_children: 128,
            max_data: 2_048,
            log_level: "info".to_string(),
        }
    }
}

/// Raw JSON representation — all fields optional for partial overrides.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "listen.host")]
    listen_host: Option<String>,
    #[serde(rename = "listen.port")]
    listen_port: Option<u16>,
    #[serde(rename = "engine.commandTimeoutMs")]
    command_timeout_ms: Option<u64>,
    #[serde(rename = "inspect.maxDepth")]
    max_depth: Option<u32>,
    #[serde(rename = "inspect.maxChildren")]
    max_children: Option<u32>,
    #[serde(rename = "inspect.maxData")]
    max_data: Option<u32>,
    #[serde(rename = "log.level")]
    log_level: Option<String>,
}

/// Directory holding the settings file, socket, and pid file.
pub fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dbgp-mcp")
}

/// Resolve settings: defaults → `~/.dbgp-mcp/settings.json`.
pub fn resolve() -> Config {
    resolve_with_path(Some(&home_dir().join("settings.json")))
}

/// Testable resolver that accepts an explicit file path (no home dir dependency).
fn resolve_with_path(path: Option<&Path>) -> Config {
    let mut config = Config::default();
    if let Some(path) = path {
        apply_file(&mut config, path);
    }
    config
}

fn apply_file(config: &mut Config, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };
    if let Some(v) = file.listen_host {
        config.listen_host = v;
    }
    if let Some(v) = file.listen_port {
        if v > 0 {
            config.listen_port = v;
        } else {
            tracing::warn!("listen.port must be non-zero, using default");
        }
    }
    if let Some(v) = file.command_timeout_ms {
        if (100..=600_000).contains(&v) {
            config.command_timeout_ms = v;
        } else {
            tracing::warn!(
                "engine.commandTimeoutMs ({}) out of range (100..600000), using default",
                v
            );
        }
    }
    if let Some(v) = file.max_depth {
        if (1..=32).contains(&v) {
            config.max_depth = v;
        } else {
            tracing::warn!("inspect.maxDepth ({}) out of range (1..32), using default", v);
        }
    }
    if let Some(v) = file.max_children {
        if (1..=10_000).contains(&v) {
            config.max_children = v;
        } else {
            tracing::warn!(
                "inspect.maxChildren ({}) out of range (1..10000), using default",
                v
            );
        }
    }
    if let Some(v) = file.max_data {
        if (16..=10_485_760).contains(&v) {
            config.max_data = v;
        } else {
            tracing::warn!(
                "inspect.maxData ({}) out of range (16..10485760), using default",
                v
            );
        }
    }
    if let Some(v) = file.log_level {
        match v.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => config.log_level = v,
            _ => tracing::warn!("log.level '{}' not recognized, using default", v),
        }
    }
}
