use crate::errors::{WalletError, WalletResult};
use crate::session::DEFAULT_SESSION_EXPIRY_SECONDS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
const KEY_AUTH_ENDPOINT: &str = "AUTH_ENDPOINT";
const KEY_API_BASE_URL: &str = "API_BASE_URL";
const KEY_ORGANIZATION_ID: &str = "ORGANIZATION_ID";
const KEY_RP_ID: &str = "RP_ID";
const KEY_SESSION_EXPIRY_SECONDS: &str = "SESSION_EXPIRY_SECONDS";
const KEY_EXPORT_SIGNER_PUBLIC_KEY: &str = "EXPORT_SIGNER_PUBLIC_KEY";

const ENV_ENVIRONMENT: &str = "WALLET_ENVIRONMENT";

const ENV_MAPPINGS: [(&str, &str); 7] = [
    ("WALLET_LOG_LEVEL", KEY_LOG_LEVEL),
    ("WALLET_AUTH_ENDPOINT", KEY_AUTH_ENDPOINT),
    ("WALLET_API_BASE_URL", KEY_API_BASE_URL),
    ("WALLET_ORGANIZATION_ID", KEY_ORGANIZATION_ID),
    ("WALLET_RP_ID", KEY_RP_ID),
    ("WALLET_SESSION_EXPIRY_SECONDS", KEY_SESSION_EXPIRY_SECONDS),
    ("WALLET_EXPORT_SIGNER_PUBLIC_KEY", KEY_EXPORT_SIGNER_PUBLIC_KEY),
];

/// Environment types for different security configurations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

/// Typed view of the settings a wallet context is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub environment: Environment,
    pub auth_endpoint: String,
    pub api_base_url: String,
    pub organization_id: Option<String>,
    pub rp_id: String,
    pub session_expiry_seconds: u64,
    /// Enclave key that signs wallet export bundles; export is disabled without it.
    pub export_signer_public_key: Option<String>,
    pub log_level: log::LevelFilter,
}

/// Security configuration manager
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl SecurityConfig {
    /// Create a new security configuration
    pub fn new(environment: Environment) -> Self {
        let mut config = SecurityConfig {
            environment,
            config_map: HashMap::new(),
        };

        config.load_defaults();
        config
    }

    /// Load configuration from the process environment
    pub fn from_env() -> WalletResult<Self> {
        let environment = std::env::var(ENV_ENVIRONMENT)
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);

        Self::from_vars(environment, std::env::vars())
    }

    /// Construct a configuration for `environment`, applying overrides from `vars`.
    pub fn from_vars<I, K, V>(environment: Environment, vars: I) -> WalletResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::new(environment);
        for (name, value) in vars {
            config.apply_env_var(name.as_ref(), value.into());
        }
        config.validate_required_configs()?;
        Ok(config)
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    /// Get a required configuration value
    pub fn get_required(&self, key: &str) -> WalletResult<&String> {
        self.config_map.get(key).ok_or_else(|| {
            WalletError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    /// Retrieve an unsigned 64-bit value with a default fallback.
    pub fn get_u64_with_default(&self, key: &str, default: u64) -> WalletResult<u64> {
        match self.config_map.get(key) {
            Some(value) => parse_u64_value(value, key),
            None => Ok(default),
        }
    }

    /// Set a configuration value (for testing purposes)
    pub fn set(&mut self, key: String, value: String) {
        self.config_map.insert(key, value);
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Validate that all required settings are present
    pub fn validate_required_configs(&self) -> WalletResult<()> {
        let mut required_keys = vec![KEY_LOG_LEVEL, KEY_AUTH_ENDPOINT, KEY_RP_ID];
        if self.is_production() {
            required_keys.push(KEY_API_BASE_URL);
            required_keys.push(KEY_ORGANIZATION_ID);
        }

        for key in required_keys {
            if !self.config_map.contains_key(key) {
                return Err(WalletError::ValidationError(format!(
                    "Required configuration key '{}' is missing for {} environment",
                    key,
                    self.environment.as_str()
                )));
            }
        }

        if self.is_production() {
            let endpoint = self.get_required(KEY_AUTH_ENDPOINT)?;
            if !endpoint.starts_with("https://") {
                return Err(WalletError::ValidationError(
                    "Authentication endpoint must use https in production".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn runtime_settings(&self) -> WalletResult<RuntimeSettings> {
        let log_level = self
            .get_required(KEY_LOG_LEVEL)?
            .parse::<log::LevelFilter>()
            .map_err(|_| WalletError::ValidationError("Invalid log level".to_string()))?;

        Ok(RuntimeSettings {
            environment: self.environment,
            auth_endpoint: self.get_required(KEY_AUTH_ENDPOINT)?.clone(),
            api_base_url: self.get_required(KEY_API_BASE_URL)?.clone(),
            organization_id: self.get(KEY_ORGANIZATION_ID).cloned(),
            rp_id: self.get_required(KEY_RP_ID)?.clone(),
            session_expiry_seconds: self
                .get_u64_with_default(KEY_SESSION_EXPIRY_SECONDS, DEFAULT_SESSION_EXPIRY_SECONDS)?,
            export_signer_public_key: self.get(KEY_EXPORT_SIGNER_PUBLIC_KEY).cloned(),
            log_level,
        })
    }

    fn load_defaults(&mut self) {
        let defaults: &[(&str, &str)] = match self.environment {
            Environment::Production => &[
                (KEY_LOG_LEVEL, "INFO"),
                (KEY_API_BASE_URL, "https://api.turnkey.com"),
                (KEY_RP_ID, "wallet.app"),
            ],
            Environment::Development => &[
                (KEY_LOG_LEVEL, "DEBUG"),
                (KEY_AUTH_ENDPOINT, "http://localhost:8081/turnkey"),
                (KEY_API_BASE_URL, "https://api.turnkey.com"),
                (KEY_RP_ID, "localhost"),
            ],
            Environment::Test => &[
                (KEY_LOG_LEVEL, "WARN"),
                (KEY_AUTH_ENDPOINT, "http://127.0.0.1:8081/turnkey"),
                (KEY_API_BASE_URL, "http://127.0.0.1:8082"),
                (KEY_RP_ID, "localhost"),
            ],
        };

        for (key, value) in defaults {
            self.config_map.insert(key.to_string(), value.to_string());
        }
        self.config_map.insert(
            KEY_SESSION_EXPIRY_SECONDS.to_string(),
            DEFAULT_SESSION_EXPIRY_SECONDS.to_string(),
        );
    }

    fn apply_env_var(&mut self, env_var: &str, value: String) {
        let Some((_, config_key)) = ENV_MAPPINGS.iter().find(|(name, _)| *name == env_var) else {
            return;
        };

        if value.trim().is_empty() {
            log::warn!("Environment variable {} is empty", env_var);
            return;
        }

        // No newlines or control characters
        if value.chars().any(|c| c.is_control()) {
            log::warn!(
                "Environment variable {} contains control characters, ignoring",
                env_var
            );
            return;
        }

        self.config_map.insert(config_key.to_string(), value);
        log::debug!(
            "Loaded configuration {} from environment variable {}",
            config_key,
            env_var
        );
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

fn parse_u64_value(value: &str, key: &str) -> WalletResult<u64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WalletError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    trimmed.parse::<u64>().map_err(|_| {
        WalletError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}
