use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{WalletError, WalletResult};

/// Manages filesystem paths used by the wallet backend.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    /// Root directory for wallet data.
    root_dir: PathBuf,
    /// Directory backing the file secure storage (embedded key and session slots).
    secure_dir: PathBuf,
    /// Path to persisted wallet configuration.
    config_file: PathBuf,
}

impl WalletPaths {
    pub const SECURE_DIRNAME: &'static str = "secure";
    pub const CONFIG_FILENAME: &'static str = "wallet.config";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            secure_dir: root_dir.join(Self::SECURE_DIRNAME),
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    ///
    /// The secure directory is restricted to the owner on Unix.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.secure_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.secure_dir, fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Directory holding one file per secure storage slot.
    pub fn secure_dir(&self) -> &Path {
        &self.secure_dir
    }

    /// Path to persisted wallet configuration file.
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Root directory for all wallet-managed data.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}
