use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::services::registry::HeartbeatConfig;

pub const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "REGISTRY_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid environment override: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid listen address: {0}")]
    Addr(#[from] std::net::AddrParseError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub heartbeat: HeartbeatSettings,
    pub http: HttpClientConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    pub recovery_cycles: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            max_attempts: 3,
            retry_interval_ms: 1000,
            recovery_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// 环境变量覆盖项，例如 REGISTRY_PORT=3100
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    host: Option<String>,
    port: Option<u16>,
    heartbeat_interval_secs: Option<u64>,
    heartbeat_max_attempts: Option<u32>,
    heartbeat_retry_interval_ms: Option<u64>,
    heartbeat_recovery_cycles: Option<u32>,
    request_timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    log_level: Option<String>,
}

impl Config {
    /// 依次加载 `.env`、`config.toml`（不存在时使用默认值）和 `REGISTRY_*` 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!(error = %e, "Failed to load .env file");
            }
        }

        let mut config = Self::from_file(CONFIG_FILE)?;
        let overrides: EnvOverrides = envy::prefixed(ENV_PREFIX).from_env()?;
        config.apply(overrides);
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read_to_string(path.as_ref()) {
            Ok(config_str) => Self::from_toml(&config_str),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(config_str)?)
    }

    fn apply(&mut self, overrides: EnvOverrides) {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(secs) = overrides.heartbeat_interval_secs {
            self.heartbeat.interval_secs = secs;
        }
        if let Some(attempts) = overrides.heartbeat_max_attempts {
            self.heartbeat.max_attempts = attempts;
        }
        if let Some(ms) = overrides.heartbeat_retry_interval_ms {
            self.heartbeat.retry_interval_ms = ms;
        }
        if let Some(cycles) = overrides.heartbeat_recovery_cycles {
            self.heartbeat.recovery_cycles = cycles;
        }
        if let Some(secs) = overrides.request_timeout_secs {
            self.http.request_timeout_secs = secs;
        }
        if let Some(secs) = overrides.connect_timeout_secs {
            self.http.connect_timeout_secs = secs;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        Ok(format!("{}:{}", self.server.host, self.server.port).parse()?)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat.interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect_timeout_secs)
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: self.heartbeat_interval(),
            // 至少探测一次
            max_attempts: self.heartbeat.max_attempts.max(1),
            retry_interval: self.retry_interval(),
            recovery_cycles: self.heartbeat.recovery_cycles,
        }
    }

    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout())
            .timeout(self.request_timeout())
            .build()
    }
}
