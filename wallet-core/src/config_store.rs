use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::security::RuntimeSettings;
use crate::session::DEFAULT_SESSION_EXPIRY_SECONDS;
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

/// Where login requests go and which organization they act on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthConfig {
    pub auth_endpoint: String,
    pub api_base_url: String,
    pub organization_id: Option<String>,
    pub rp_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_signer_public_key: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_endpoint: "http://localhost:8081/turnkey".to_string(),
            api_base_url: "https://api.turnkey.com".to_string(),
            organization_id: None,
            rp_id: "localhost".to_string(),
            export_signer_public_key: None,
        }
    }
}

impl From<&RuntimeSettings> for AuthConfig {
    fn from(settings: &RuntimeSettings) -> Self {
        Self {
            auth_endpoint: settings.auth_endpoint.clone(),
            api_base_url: settings.api_base_url.clone(),
            organization_id: settings.organization_id.clone(),
            rp_id: settings.rp_id.clone(),
            export_signer_public_key: settings.export_signer_public_key.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    pub default_expiry_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_expiry_seconds: DEFAULT_SESSION_EXPIRY_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletConfig {
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl WalletConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            auth: AuthConfig::default(),
            session: SessionConfig::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    /// Defaults seeded from env-derived settings.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            auth: AuthConfig::from(settings),
            session: SessionConfig {
                default_expiry_seconds: settings.session_expiry_seconds,
            },
            ..Self::new(settings.environment.as_str())
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: WalletConfig,
    modified_at_unix: i64,
}

/// Handles persistence of wallet configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        self.load_or_else(|| WalletConfig::new(environment))
    }

    /// Load the stored config, writing `default` first when none exists yet.
    pub fn load_or_else<F>(&self, default: F) -> WalletResult<WalletConfig>
    where
        F: FnOnce() -> WalletConfig,
    {
        if !self.path.exists() {
            let config = default();
            self.save(&config)?;
            log::info!("Created wallet config at {}", self.path.display());
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        let checksum = checksum(&envelope.payload)?;
        if checksum != envelope.checksum {
            log::warn!("Config checksum mismatch at {}", self.path.display());
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config)?;
    hasher.update(&encoded);
    Ok(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_and_load_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);

        let mut config = WalletConfig::new("development");
        config.auth.auth_endpoint = "https://auth.example.com/rpc".into();
        config.session.default_expiry_seconds = 60;
        store.save(&config).unwrap();

        let loaded = store.load_or_default("development").unwrap();
        assert_eq!(loaded.auth.auth_endpoint, "https://auth.example.com/rpc");
        assert_eq!(loaded.session.default_expiry_seconds, 60);
    }

    #[test]
    fn missing_config_is_created_with_defaults() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("nested/wallet.config"));

        let config = store.load_or_default("test").unwrap();
        assert_eq!(config.session.default_expiry_seconds, 900);
        assert_eq!(config.environment, "test");
        assert!(store.path().exists());
    }

    #[test]
    fn update_persists_changes() {
        let temp = TempDir::new().unwrap();
        let store = ConfigStore::new(temp.path().join("wallet.config"));

        store
            .update("test", |config| {
                config.auth.organization_id = Some("org-1".into());
                Ok(())
            })
            .unwrap();

        let loaded = store.load_or_default("test").unwrap();
        assert_eq!(loaded.auth.organization_id.as_deref(), Some("org-1"));
    }

    #[test]
    fn edited_payload_fails_checksum() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);
        store.save(&WalletConfig::new("test")).unwrap();

        let edited = fs::read_to_string(&path)
            .unwrap()
            .replace("http://localhost:8081/turnkey", "http://attacker.example/turnkey");
        fs::write(&path, edited).unwrap();

        let err = store.load_or_default("test").unwrap_err();
        assert_eq!(
            err,
            WalletError::ValidationError("Config integrity verification failed".to_string())
        );
    }

    #[test]
    fn tampered_config_detected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("wallet.config");
        let store = ConfigStore::new(&path);
        store.save(&WalletConfig::new("test")).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        if let Some(byte) = bytes.iter_mut().find(|b| **b != 0) {
            *byte ^= 0xAA;
        }
        fs::write(&path, bytes).unwrap();

        let result = store.load_or_default("test");
        assert!(matches!(result, Err(WalletError::ValidationError(_))));
    }
}
