//! Application configuration, persisted as JSON in the asset directory.

use std::path::Path;

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub scheduling: SchedulingConfig,
    pub maintenance: MaintenanceConfig,
    pub growatt: GrowattConfig,
    pub facturalo: FacturaloConfig,
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
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Hours kept free between two visits of the same technician
    pub travel_buffer_hours: i32,
    pub working_weekdays: Vec<Weekday>,
    /// Start hour given to visits that could not be assigned
    pub default_start_hour: i32,
    pub search_horizon_days: i64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            travel_buffer_hours: 1,
            working_weekdays: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
            ],
            default_start_hour: 9,
            search_horizon_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub planner_interval_secs: u64,
    pub lookahead_days: i64,
    pub default_duration_hours: i32,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            planner_interval_secs: 3600,
            lookahead_days: 7,
            default_duration_hours: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrowattConfig {
    pub enabled: bool,
    pub base_url: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub sync_interval_secs: u64,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub cache_ttl_secs: i64,
}

impl Default for GrowattConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://openapi.growatt.com".to_string(),
            username: None,
            password: None,
            sync_interval_secs: 900,
            batch_size: 5,
            batch_delay_ms: 1000,
            cache_ttl_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacturaloConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub plugin_key: Option<String>,
}

impl Default for FacturaloConfig {
    fn default() -> Self {
        Self {
            base_url: "https://sandbox.factura.com/api".to_string(),
            api_key: None,
            secret_key: None,
            plugin_key: None,
        }
    }
}

impl Config {
    /// Read the config file, writing the defaults when it does not exist yet.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&raw)?
        } else {
            info!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            if let Err(e) = config.save(path) {
                warn!("Failed to write default config: {}", e);
            }
            config
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Secrets come from the environment and are never written back to disk
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(username) = var("GROWATT_USERNAME") {
            self.growatt.username = Some(username);
        }
        if let Some(password) = var("GROWATT_PASSWORD") {
            self.growatt.password = Some(password);
        }
        if let Some(api_key) = var("FACTURALO_API_KEY") {
            self.facturalo.api_key = Some(api_key);
        }
        if let Some(secret_key) = var("FACTURALO_SECRET_KEY") {
            self.facturalo.secret_key = Some(secret_key);
        }
        if let Some(plugin_key) = var("FACTURALO_PLUGIN_KEY") {
            self.facturalo.plugin_key = Some(plugin_key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduling.travel_buffer_hours < 0 {
            return Err(ConfigError::Invalid {
                field: "scheduling.travel_buffer_hours",
                reason: "must not be negative".to_string(),
            });
        }
        if !(0..24).contains(&self.scheduling.default_start_hour) {
            return Err(ConfigError::Invalid {
                field: "scheduling.default_start_hour",
                reason: "must be between 0 and 23".to_string(),
            });
        }
        if self.growatt.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "growatt.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.maintenance.default_duration_hours < 1 {
            return Err(ConfigError::Invalid {
                field: "maintenance.default_duration_hours",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "growatt": { "enabled": true, "batch_size": 3 } }"#).unwrap();
        assert!(config.growatt.enabled);
        assert_eq!(config.growatt.batch_size, 3);
        assert_eq!(config.growatt.cache_ttl_secs, 1800);
        assert_eq!(config.scheduling.travel_buffer_hours, 1);
        assert_eq!(config.scheduling.working_weekdays.len(), 6);
    }

    #[test]
    fn env_overrides_fill_secrets() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "GROWATT_PASSWORD" => Some("s3cret".to_string()),
            "FACTURALO_API_KEY" => Some("key".to_string()),
            _ => None,
        });
        assert_eq!(config.growatt.password.as_deref(), Some("s3cret"));
        assert_eq!(config.facturalo.api_key.as_deref(), Some("key"));
        assert!(config.growatt.username.is_none());

        let written = serde_json::to_string(&config).unwrap();
        assert!(!written.contains("s3cret"));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = Config::default();
        config.growatt.batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "growatt.batch_size", .. })
        ));
    }
}
