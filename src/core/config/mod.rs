pub mod sse_config;

pub use sse_config::StreamConfig;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "boardserver.toml";
pub const CONFIG_PATH_VAR: &str = "BOARD_CONFIG";
pub const ENV_PREFIX: &str = "BOARD_";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub board: BoardSettings,
    pub stream: StreamConfig,
    pub database: DatabaseConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    /// Upper bound on cards returned by one stage request.
    pub card_cap: usize,
    pub default_page_size: usize,
    /// JSON file of pipelines and records loaded into the in-memory store.
    pub seed_path: Option<PathBuf>,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            card_cap: 200,
            default_page_size: 200,
            seed_path: None,
        }
    }
}

impl BoardSettings {
    /// Requested page size bounded to `1..=card_cap`.
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        let cap = self.card_cap.max(1);
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, cap)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: 10,
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file, then `BOARD_*` variables
    /// (`BOARD_STREAM__MAX_CONNECTIONS=50`).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load() -> Result<Self, figment::Error> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| CONFIG_FILE.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(path).extract()?;
        config.stream = config.stream.normalized();
        Ok(config)
    }
}
