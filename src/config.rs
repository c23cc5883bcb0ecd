use crate::connector::{ChainEndpoint, ConnectorSettings};
use crate::delivery::DeliverySettings;
use crate::error::ConfigError;
use crate::relayer::RelaySettings;
use crate::retry::RetryConfig;
use crate::schema::EventSchema;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use toml::map::Map;
use url::Url;

pub const ENV_NODE_URL: &str = "SOURCE_CHAIN_WSS_URL";
pub const ENV_CONTRACT_ADDRESS: &str = "BRIDGE_CONTRACT_ADDRESS";
pub const ENV_RELAYER_URL: &str = "DESTINATION_RELAYER_API_URL";

/// One day.
const MAX_RETRY_DELAY_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelayerConfig {
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub relayer: RelayerApiSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub polling: PollingSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainSettings {
    #[serde(default)]
    pub node_url: String,
    #[serde(default)]
    pub contract_address: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_liveness_timeout")]
    pub liveness_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayerApiSettings {
    #[serde(default)]
    pub api_url: String,
    #[serde(default = "default_request_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_seconds: u64,
    pub max_delay_seconds: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingSettings {
    pub poll_interval_seconds: u64,
    pub reconnect_cooldown_seconds: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_liveness_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            node_url: String::new(),
            contract_address: String::new(),
            connect_timeout_seconds: default_connect_timeout(),
            liveness_timeout_seconds: default_liveness_timeout(),
        }
    }
}

impl Default for RelayerApiSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_seconds: 1,
            max_delay_seconds: 120,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            reconnect_cooldown_seconds: 30,
        }
    }
}

impl RelayerConfig {
    /// Loads a TOML file, layered over `common.toml` from the same directory.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let common_content = Self::load_common_config(path)?;

        let specific_content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;

        // Specific values override common ones
        let merged_content = Self::merge_configs(common_content, specific_content)?;

        let config = Self::from_toml_str(&merged_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from the process environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let config = Self::from_lookup(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.chain.node_url = lookup(ENV_NODE_URL).unwrap_or_default();
        config.chain.contract_address = lookup(ENV_CONTRACT_ADDRESS).unwrap_or_default();
        config.relayer.api_url = lookup(ENV_RELAYER_URL).unwrap_or_default();
        config
    }

    /// Parses TOML after `${VAR}` substitution. Does not validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let content = Self::substitute_env_vars(content.to_string());
        Ok(toml::from_str(&content)?)
    }

    fn load_common_config(path: &str) -> Result<String, ConfigError> {
        let common_path = Path::new(path)
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("common.toml");
        if common_path == Path::new(path) {
            return Ok(String::new());
        }
        // A missing common.toml is fine
        Ok(fs::read_to_string(common_path).unwrap_or_default())
    }

    fn merge_configs(common: String, specific: String) -> Result<String, ConfigError> {
        if common.is_empty() {
            return Ok(specific);
        }

        let common_toml: toml::Value = toml::from_str(&common)?;
        let specific_toml: toml::Value = toml::from_str(&specific)?;

        let merged = Self::merge_toml_values(common_toml, specific_toml);

        Ok(toml::to_string_pretty(&merged)?)
    }

    fn merge_toml_values(mut base: toml::Value, override_val: toml::Value) -> toml::Value {
        match (&mut base, override_val) {
            (toml::Value::Table(base_map), toml::Value::Table(override_map)) => {
                for (key, value) in override_map {
                    let merged = Self::merge_toml_values(
                        base_map
                            .get(&key)
                            .cloned()
                            .unwrap_or(toml::Value::Table(Map::new())),
                        value,
                    );
                    base_map.insert(key, merged);
                }
                base
            }
            (_, override_val) => override_val,
        }
    }

    fn substitute_env_vars(content: String) -> String {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("placeholder pattern is valid");
        re.replace_all(&content, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
    }

    /// Reports every missing mandatory value at once, then checks URL shapes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (ENV_NODE_URL, &self.chain.node_url),
            (ENV_CONTRACT_ADDRESS, &self.chain.contract_address),
            (ENV_RELAYER_URL, &self.relayer.api_url),
        ];
        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| is_unset(value))
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        check_url(ENV_NODE_URL, &self.chain.node_url, &["ws", "wss", "http", "https"])?;
        check_url(ENV_RELAYER_URL, &self.relayer.api_url, &["http", "https"])?;

        let at_least_one = [
            ("chain.connect_timeout_seconds", self.chain.connect_timeout_seconds),
            ("chain.liveness_timeout_seconds", self.chain.liveness_timeout_seconds),
            ("relayer.timeout_seconds", self.relayer.timeout_seconds),
            ("retry.max_attempts", u64::from(self.retry.max_attempts)),
            ("polling.poll_interval_seconds", self.polling.poll_interval_seconds),
            ("polling.reconnect_cooldown_seconds", self.polling.reconnect_cooldown_seconds),
        ];
        if let Some(&(key, _)) = at_least_one.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidValue {
                key,
                reason: "must be at least 1".to_string(),
            });
        }

        if !(self.retry.backoff_multiplier >= 1.0 && self.retry.backoff_multiplier.is_finite()) {
            return Err(ConfigError::InvalidValue {
                key: "retry.backoff_multiplier",
                reason: "must be a finite number of at least 1.0".to_string(),
            });
        }
        if self.retry.max_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(ConfigError::InvalidValue {
                key: "retry.max_delay_seconds",
                reason: format!("must not exceed {MAX_RETRY_DELAY_SECONDS}"),
            });
        }
        Ok(())
    }

    pub fn chain_endpoint(&self, schema: Arc<EventSchema>) -> ChainEndpoint {
        ChainEndpoint {
            node_url: self.chain.node_url.trim().to_string(),
            contract_address: self.chain.contract_address.trim().to_string(),
            schema,
        }
    }

    pub fn relayer_url(&self) -> Result<Url, ConfigError> {
        Url::parse(self.relayer.api_url.trim()).map_err(|e| ConfigError::InvalidUrl {
            key: ENV_RELAYER_URL,
            value: self.relayer.api_url.clone(),
            reason: e.to_string(),
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry.max_attempts,
            Duration::from_secs(self.retry.base_delay_seconds),
            Duration::from_secs(self.retry.max_delay_seconds),
            self.retry.backoff_multiplier,
        )
    }

    pub fn delivery_settings(&self) -> DeliverySettings {
        DeliverySettings {
            request_timeout: Duration::from_secs(self.relayer.timeout_seconds),
            retry: self.retry_config(),
        }
    }

    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            connect_timeout: Duration::from_secs(self.chain.connect_timeout_seconds),
            liveness_timeout: Duration::from_secs(self.chain.liveness_timeout_seconds),
        }
    }

    pub fn relay_settings(&self, dry_run: bool) -> RelaySettings {
        RelaySettings {
            poll_interval: Duration::from_secs(self.polling.poll_interval_seconds),
            reconnect_cooldown: Duration::from_secs(self.polling.reconnect_cooldown_seconds),
            dry_run,
        }
    }
}

/// Empty or still holding an unresolved `${VAR}` placeholder.
fn is_unset(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.contains("${")
}

fn check_url(key: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
        reason,
    };
    let url = Url::parse(value.trim()).map_err(|e| invalid(e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(format!(
            "scheme must be one of {}",
            schemes.join(", ")
        )));
    }
    Ok(())
}
