use holdfast_core::{HoldError, QuotaDefaults, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logical identity of this server instance. Claims from a shared
    /// store are only activated when their server_name matches.
    pub server_name: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub storage: StorageConfig,
    #[serde(default)]
    pub quotas: QuotaConfig,
    pub activation: ActivationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Registry name of the backend to select: "flatfile" or "sqlite".
    pub backend: String,
    #[serde(default)]
    pub flatfile: Option<FlatFileConfig>,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatFileConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

/// Default per-type claim limits for owners without an explicit balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_player_limit")]
    pub player: u32,
    #[serde(default = "default_always_on_limit")]
    pub always_on: u32,
    #[serde(default = "default_admin_limit")]
    pub admin: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            player: default_player_limit(),
            always_on: default_always_on_limit(),
            admin: default_admin_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Base URL of the host's forced-activation service.
    pub endpoint: String,
    #[serde(default = "default_activation_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_listen_addr() -> String {
    "127.0.0.1:7187".to_string()
}

fn default_player_limit() -> u32 {
    16
}

fn default_always_on_limit() -> u32 {
    4
}

fn default_admin_limit() -> u32 {
    64
}

fn default_activation_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("HOLDFAST"))
            .build()
            .map_err(|e| HoldError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| HoldError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn quota_defaults(&self) -> QuotaDefaults {
        QuotaDefaults {
            player: self.quotas.player,
            always_on: self.quotas.always_on,
            admin: self.quotas.admin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_fills_defaults() {
        let raw = r#"
            server_name: main
            storage:
              backend: flatfile
              flatfile:
                path: /var/lib/holdfast/claims.json
            activation:
              endpoint: http://127.0.0.1:9090
        "#;

        let config: Config = ::config::Config::builder()
            .add_source(::config::File::from_str(raw, ::config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.server_name, "main");
        assert_eq!(config.listen_addr, "127.0.0.1:7187");
        assert_eq!(config.quotas.always_on, 4);
        assert_eq!(config.activation.timeout_secs, 10);
        assert!(config.storage.sqlite.is_none());
    }
}
