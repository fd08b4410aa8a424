use std::path::Path;

use serde::Deserialize;

use crate::error::CoreError;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub model_adapter_url: String,
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    #[serde(default = "default_model_temperature")]
    pub model_temperature: f32,
    pub store_dsn: String,
    pub transport_api_token: String,
    #[serde(default = "default_transport_url")]
    pub transport_url: String,
    #[serde(default)]
    pub stt_url: Option<String>,
    #[serde(default)]
    pub analytics_url: Option<String>,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_result_set_ttl_s")]
    pub result_set_ttl_s: u64,
    #[serde(default = "default_result_set_capacity")]
    pub result_set_capacity: usize,
    #[serde(default = "default_notification_rate_per_s")]
    pub notification_rate_per_s: u32,
    #[serde(default = "default_dialog_state_timeout_s")]
    pub dialog_state_timeout_s: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default = "default_transport_timeout_ms")]
    pub transport_timeout_ms: u64,
    #[serde(default = "default_request_deadline_s")]
    pub request_deadline_s: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_model_timeout_ms() -> u64 {
    20_000
}
fn default_model_temperature() -> f32 {
    0.2
}
fn default_transport_url() -> String {
    "http://localhost:8081".to_string()
}
fn default_timezone() -> String {
    "Europe/Moscow".to_string()
}
fn default_result_set_ttl_s() -> u64 {
    3600
}
fn default_result_set_capacity() -> usize {
    64
}
fn default_notification_rate_per_s() -> u32 {
    30
}
fn default_dialog_state_timeout_s() -> u64 {
    1800
}
fn default_store_timeout_ms() -> u64 {
    5_000
}
fn default_transport_timeout_ms() -> u64 {
    10_000
}
fn default_request_deadline_s() -> u64 {
    30
}
fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: AppConfig = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("invalid config: {}", e)))?;

        // Secrets may be supplied via environment instead of the file.
        if let Ok(token) = std::env::var("STRIVE_TRANSPORT_TOKEN") {
            if !token.trim().is_empty() {
                config.transport_api_token = token;
            }
        }
        if let Ok(url) = std::env::var("STRIVE_MODEL_URL") {
            if !url.trim().is_empty() {
                config.model_adapter_url = url;
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.model_adapter_url.trim().is_empty() {
            return Err(CoreError::Config("model_adapter_url is empty".into()));
        }
        if self.store_dsn.trim().is_empty() {
            return Err(CoreError::Config("store_dsn is empty".into()));
        }
        if self.transport_api_token.trim().is_empty() {
            return Err(CoreError::Config("transport_api_token is empty".into()));
        }
        if self.default_timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(CoreError::Config(format!(
                "default_timezone '{}' is not a valid IANA zone",
                self.default_timezone
            )));
        }
        if self.result_set_capacity == 0 {
            return Err(CoreError::Config("result_set_capacity must be > 0".into()));
        }
        if self.notification_rate_per_s == 0 {
            return Err(CoreError::Config("notification_rate_per_s must be > 0".into()));
        }
        Ok(())
    }
}
