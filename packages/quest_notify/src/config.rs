use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::reconnect::{MAX_RECONNECT_ATTEMPTS, ReconnectPolicy};

// =============================================================================
// File config (figment-deserialized from defaults / notify.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   notify.toml:     [reconnect]
//                    interval_ms = 5000
//
//   env var:         QUEST_NOTIFY_RECONNECT__INTERVAL_MS=5000
//                    (double underscore = nesting)

/// Name of the optional config file inside the config directory.
pub const CONFIG_FILE: &str = "notify.toml";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "QUEST_NOTIFY_";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Lives under `[server]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    /// Base WebSocket URL; the token is appended as `/?token=...`.
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            ws_base_url: default_ws_base_url(),
        }
    }
}

/// Lives under `[reconnect]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_ws_base_url() -> String {
    "ws://localhost:8000/ws/notifications".to_string()
}
fn default_max_attempts() -> u32 {
    MAX_RECONNECT_ATTEMPTS
}
fn default_interval_ms() -> u64 {
    3000
}

/// Build a figment that layers: defaults → notify.toml → QUEST_NOTIFY_* env vars.
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Default config directory (`~/.config/quest-notify` on Linux).
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("quest-notify")
}

// =============================================================================
// Runtime config
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChannelConfig {
    pub ws_base_url: String,
    pub reconnect: ReconnectPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

impl ChannelConfig {
    pub fn new(ws_base_url: impl Into<String>) -> Self {
        Self {
            ws_base_url: ws_base_url.into(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            ws_base_url: fc.server.ws_base_url.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: fc.reconnect.max_attempts,
                interval: Duration::from_millis(fc.reconnect.interval_ms),
            },
        }
    }

    /// Resolve the layered configuration rooted at `config_dir`.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let file: FileConfig = load_config(config_dir)
            .extract()
            .with_context(|| format!("Failed to load config from {:?}", config_dir))?;
        debug!(?file, "resolved configuration");
        Ok(Self::from_file(&file))
    }
}
