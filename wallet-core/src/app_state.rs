use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::auth::{AuthenticationService, RpcAuthClient};
use crate::config_store::{ConfigStore, WalletConfig};
use crate::errors::WalletResult;
use crate::lifecycle::SessionController;
use crate::security::{RuntimeSettings, SecurityConfig};
use crate::session::{Clock, SessionStore, SystemClock};
use crate::storage::{EmbeddedKeyStore, FileSecureStorage, SecureStorage, WalletPaths};
use crate::validation::InputValidator;

/// Everything a wallet process needs, built once at startup.
#[derive(Debug)]
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: RwLock<WalletConfig>,
    sessions: Arc<SessionStore>,
    controller: SessionController,
}

impl WalletContext {
    /// Build a context from `WALLET_*` environment settings with the
    /// authentication backend named in the persisted config.
    pub fn initialize(root_dir: PathBuf) -> WalletResult<Self> {
        let settings = SecurityConfig::from_env()?.runtime_settings()?;
        Self::initialize_with(root_dir, &settings)
    }

    pub fn initialize_with(root_dir: PathBuf, settings: &RuntimeSettings) -> WalletResult<Self> {
        let paths = WalletPaths::new(&root_dir)?;
        let config_store = ConfigStore::from_paths(&paths);
        let config = config_store.load_or_else(|| WalletConfig::from_settings(settings))?;
        let auth = Arc::new(
            RpcAuthClient::new(config.auth.auth_endpoint.clone())?
                .with_api_base_url(config.auth.api_base_url.clone())?,
        );
        Self::build(paths, config_store, config, auth, Arc::new(SystemClock))
    }

    /// Build a context around a caller-supplied authentication service and clock.
    pub fn with_services(
        root_dir: PathBuf,
        settings: &RuntimeSettings,
        auth: Arc<dyn AuthenticationService>,
        clock: Arc<dyn Clock>,
    ) -> WalletResult<Self> {
        let paths = WalletPaths::new(&root_dir)?;
        let config_store = ConfigStore::from_paths(&paths);
        let config = config_store.load_or_else(|| WalletConfig::from_settings(settings))?;
        Self::build(paths, config_store, config, auth, clock)
    }

    fn build(
        paths: WalletPaths,
        config_store: ConfigStore,
        config: WalletConfig,
        auth: Arc<dyn AuthenticationService>,
        clock: Arc<dyn Clock>,
    ) -> WalletResult<Self> {
        paths.ensure_directories()?;

        let storage: Arc<dyn SecureStorage> = Arc::new(FileSecureStorage::new(paths.secure_dir()));
        let sessions = Arc::new(SessionStore::new(storage.clone(), clock));
        let mut controller = SessionController::new(
            EmbeddedKeyStore::new(storage),
            sessions.clone(),
            auth,
            InputValidator::new()?,
        )
        .with_default_expiry(config.session.default_expiry_seconds)?;
        if let Some(signer) = &config.auth.export_signer_public_key {
            controller = controller.with_export_signer(signer)?;
        }

        log::info!(
            "Wallet context initialized for {} environment at {}",
            config.environment,
            paths.root_dir().display()
        );

        Ok(Self {
            paths,
            config_store,
            config: RwLock::new(config),
            sessions,
            controller,
        })
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn config(&self) -> WalletConfig {
        self.config.read().clone()
    }

    pub fn environment(&self) -> String {
        self.config.read().environment.clone()
    }

    /// Persist a config change. Takes effect for controllers built afterwards.
    pub fn update_config<F>(&self, updater: F) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let environment = self.environment();
        let updated = self.config_store.update(environment, updater)?;
        *self.config.write() = updated.clone();
        Ok(updated)
    }
}

/// Shared wallet context handed to every caller.
#[derive(Debug, Clone)]
pub struct SharedWalletContext(pub Arc<WalletContext>);

impl SharedWalletContext {
    pub fn new(inner: WalletContext) -> Self {
        Self(Arc::new(inner))
    }
}

impl Deref for SharedWalletContext {
    type Target = WalletContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Environment;
    use tempfile::TempDir;

    fn settings() -> RuntimeSettings {
        SecurityConfig::new(Environment::Test)
            .runtime_settings()
            .unwrap()
    }

    #[test]
    fn initialize_creates_layout_and_config() {
        let temp = TempDir::new().unwrap();
        let context = WalletContext::initialize_with(temp.path().to_path_buf(), &settings()).unwrap();

        assert!(context.paths().secure_dir().is_dir());
        assert!(context.config_store().path().exists());
        assert_eq!(context.environment(), "test");
        assert_eq!(context.controller().default_expiry_seconds(), 900);
    }

    #[test]
    fn persisted_config_wins_over_settings() {
        let temp = TempDir::new().unwrap();
        {
            let context =
                WalletContext::initialize_with(temp.path().to_path_buf(), &settings()).unwrap();
            context
                .update_config(|config| {
                    config.session.default_expiry_seconds = 120;
                    Ok(())
                })
                .unwrap();
            assert_eq!(context.config().session.default_expiry_seconds, 120);
        }

        let context = WalletContext::initialize_with(temp.path().to_path_buf(), &settings()).unwrap();
        assert_eq!(context.controller().default_expiry_seconds(), 120);
    }

    #[tokio::test]
    async fn shared_context_starts_without_session() {
        let temp = TempDir::new().unwrap();
        let shared = SharedWalletContext::new(
            WalletContext::initialize_with(temp.path().to_path_buf(), &settings()).unwrap(),
        );

        let outcome = shared.controller().startup().await.unwrap();
        assert_eq!(outcome.route(), crate::lifecycle::Route::Unauthenticated);
        assert!(shared.sessions().current().is_none());
    }
}
