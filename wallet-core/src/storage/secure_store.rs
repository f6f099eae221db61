use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

const SLOT_EXTENSION: &str = "secure";
const MAX_SLOT_NAME_LEN: usize = 64;

/// Key/value store with at-rest protection supplied by the platform.
///
/// Implementations bridge to the OS keychain/keystore on devices; the file and
/// in-memory variants here cover desktop builds and tests.
#[async_trait]
pub trait SecureStorage: Send + Sync + fmt::Debug {
    async fn get_item(&self, key: &str) -> WalletResult<Option<Zeroizing<String>>>;

    async fn set_item(&self, key: &str, value: &str) -> WalletResult<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete_item(&self, key: &str) -> WalletResult<()>;
}

/// Process-local secure storage. Contents vanish with the process.
#[derive(Default)]
pub struct MemorySecureStorage {
    items: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl fmt::Debug for MemorySecureStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySecureStorage")
            .field("slots", &self.items.read().len())
            .finish()
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStorage {
    async fn get_item(&self, key: &str) -> WalletResult<Option<Zeroizing<String>>> {
        validate_slot_name(key)?;
        Ok(self.items.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> WalletResult<()> {
        validate_slot_name(key)?;
        self.items
            .write()
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    async fn delete_item(&self, key: &str) -> WalletResult<()> {
        validate_slot_name(key)?;
        self.items.write().remove(key);
        Ok(())
    }
}

/// One file per slot inside a private directory, written atomically.
#[derive(Debug, Clone)]
pub struct FileSecureStorage {
    dir: PathBuf,
}

impl FileSecureStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, key: &str) -> WalletResult<PathBuf> {
        validate_slot_name(key)?;
        Ok(self.dir.join(format!("{key}.{SLOT_EXTENSION}")))
    }
}

#[async_trait]
impl SecureStorage for FileSecureStorage {
    async fn get_item(&self, key: &str) -> WalletResult<Option<Zeroizing<String>>> {
        let path = self.slot_path(key)?;
        match fs::read(&path).await {
            Ok(bytes) => {
                let bytes = Zeroizing::new(bytes);
                let value = std::str::from_utf8(&bytes).map_err(|_| {
                    WalletError::StorageError(format!("Slot '{key}' is not valid UTF-8"))
                })?;
                Ok(Some(Zeroizing::new(value.to_string())))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> WalletResult<()> {
        let path = self.slot_path(key)?;
        fs::create_dir_all(&self.dir).await?;

        let tmp_path = path.with_extension("new");
        {
            let mut file = fs::File::create(&tmp_path).await?;
            restrict_permissions(&tmp_path).await?;
            file.write_all(value.as_bytes()).await?;
            file.sync_all().await?;
        }
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn delete_item(&self, key: &str) -> WalletResult<()> {
        let path = self.slot_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> WalletResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> WalletResult<()> {
    Ok(())
}

fn validate_slot_name(key: &str) -> WalletResult<()> {
    let valid = !key.is_empty()
        && key.len() <= MAX_SLOT_NAME_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !key.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(WalletError::ValidationError(format!(
            "Invalid secure storage key '{key}'"
        )))
    }
}
