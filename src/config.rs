use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::TransportPreference;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    /// Saved hardware address; a random one is generated when absent
    pub mac_address: Option<String>,
    pub bootstrap_url: String,
    #[serde(default)]
    pub transport: TransportPreference,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub bootstrap_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub hello_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub keep_alive_secs: u64,
    pub user_agent: String,
    pub locale: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_timeout_secs: 30,
            connect_timeout_secs: 5,
            hello_timeout_secs: 10,
            reconnect_delay_secs: 5,
            keep_alive_secs: 120,
            user_agent: "esp32s3/1.6.2".to_string(),
            locale: "zh-CN".to_string(),
        }
    }
}

impl NetworkConfig {
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// JSON file holding cached broker port → TLS decisions
    pub port_cache_path: Option<String>,
    /// Directory for completed speech segments (WAV + JSON lines index)
    pub archive_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            port_cache_path: None,
            archive_dir: "recordings".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn port_cache_path(&self) -> Option<PathBuf> {
        self.port_cache_path.as_deref().map(expand_path)
    }

    pub fn archive_dir(&self) -> PathBuf {
        expand_path(&self.archive_dir)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AudioConfig {
    /// WAV file used as the capture source
    pub input_wav: Option<String>,
    /// Directory receiving rendered playback as WAV
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl Config {
    /// Load from a config file (extension optional) with `VOXLINK__*` env overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOXLINK").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
