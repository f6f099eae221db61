//! Session lifecycle: embedded key creation, bundle-to-session conversion,
//! startup restoration, logout, and the login flows built on top of them.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use tokio::sync::watch;

use crate::auth::{
    AuthenticationService, LoginMethod, LoginProof, OtpChallenge, OtpChannel, WalletExportRequest,
};
use crate::bundle::{self, EncryptedCredentialBundle};
use crate::crypto::{self, EmbeddedKeyPair};
use crate::errors::{WalletError, WalletResult};
use crate::export::{self, ExportedWallet};
use crate::session::{Session, SessionStore, DEFAULT_SESSION_EXPIRY_SECONDS};
use crate::stamp::ApiKeyStamper;
use crate::storage::EmbeddedKeyStore;
use crate::validation::InputValidator;

/// Which side of the app the user belongs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Authenticated,
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    Active(Session),
    /// A session was persisted but had expired; it has been cleared.
    Expired,
    NoSession,
}

impl StartupOutcome {
    pub fn route(&self) -> Route {
        match self {
            StartupOutcome::Active(_) => Route::Authenticated,
            StartupOutcome::Expired | StartupOutcome::NoSession => Route::Unauthenticated,
        }
    }

    pub fn into_session(self) -> Option<Session> {
        match self {
            StartupOutcome::Active(session) => Some(session),
            _ => None,
        }
    }
}

/// Progress of the login flow currently on screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginState {
    pub loading: Option<LoginMethod>,
    pub error: Option<String>,
}

/// Embedded public key prepared ahead of an OAuth redirect, and the nonce
/// that binds the provider's ID token to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthChallenge {
    pub target_public_key: String,
    /// Hex SHA-256 of `target_public_key`.
    pub nonce: String,
}

#[derive(Debug)]
pub struct SessionController {
    keys: EmbeddedKeyStore,
    sessions: Arc<SessionStore>,
    auth: Arc<dyn AuthenticationService>,
    validator: InputValidator,
    default_expiry_seconds: u64,
    export_signer: Option<Vec<u8>>,
    login_state: RwLock<LoginState>,
}

impl SessionController {
    pub fn new(
        keys: EmbeddedKeyStore,
        sessions: Arc<SessionStore>,
        auth: Arc<dyn AuthenticationService>,
        validator: InputValidator,
    ) -> Self {
        Self {
            keys,
            sessions,
            auth,
            validator,
            default_expiry_seconds: DEFAULT_SESSION_EXPIRY_SECONDS,
            export_signer: None,
            login_state: RwLock::new(LoginState::default()),
        }
    }

    /// Override the lifetime used when callers do not ask for one.
    pub fn with_default_expiry(mut self, seconds: u64) -> WalletResult<Self> {
        self.validator.validate_expiry_seconds(seconds)?;
        self.default_expiry_seconds = seconds;
        Ok(self)
    }

    /// Enclave public key (hex SEC1) that wallet export bundles must be signed by.
    pub fn with_export_signer(mut self, public_key_hex: &str) -> WalletResult<Self> {
        self.validator.validate_public_key_hex(public_key_hex)?;
        self.export_signer = Some(crypto::decode_hex(public_key_hex)?);
        Ok(self)
    }

    pub fn default_expiry_seconds(&self) -> u64 {
        self.default_expiry_seconds
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Generate an embedded keypair, keep its private half, and return the
    /// uncompressed public key in hex for the authentication service.
    pub async fn create_embedded_key(&self) -> WalletResult<String> {
        let pair = EmbeddedKeyPair::generate()?;
        self.keys.save(&pair.private_key).await?;
        let public_key = pair.public_key_hex();
        log::info!("Embedded key created: {}", public_key);
        Ok(public_key)
    }

    /// Turn a credential bundle into the current session.
    ///
    /// Consumes the pending embedded key whether or not decryption succeeds.
    pub async fn create_session(
        &self,
        bundle: &EncryptedCredentialBundle,
        expiry_seconds: Option<u64>,
    ) -> WalletResult<Session> {
        let expiry_seconds = self.resolve_expiry(expiry_seconds)?;
        let embedded_key = self.keys.take_required().await?;
        if let Err(err) = self.validator.validate_bundle(bundle.as_str()) {
            log::debug!("Credential bundle rejected: {}", err);
            return Err(WalletError::AuthenticationFailed);
        }
        let signing_key = bundle::decrypt(bundle, &embedded_key)?;
        self.sessions.save(&signing_key, expiry_seconds).await
    }

    /// The current session if one is persisted and unexpired.
    pub async fn get_session(&self) -> WalletResult<Option<Session>> {
        Ok(self.startup().await?.into_session())
    }

    pub async fn clear_session(&self) -> WalletResult<()> {
        self.sessions.clear().await
    }

    pub async fn logout(&self) -> WalletResult<Route> {
        self.clear_session().await?;
        log::info!("Logged out");
        Ok(Route::Unauthenticated)
    }

    /// Restore the persisted session at launch.
    pub async fn startup(&self) -> WalletResult<StartupOutcome> {
        let session = match self.sessions.load().await? {
            Some(session) => session,
            None => {
                self.sessions.publish(None);
                return Ok(StartupOutcome::NoSession);
            }
        };

        if !self.sessions.is_valid(&session) {
            log::info!("Persisted session expired");
            self.sessions.clear().await?;
            return Ok(StartupOutcome::Expired);
        }

        self.sessions.publish(Some(session.clone()));
        Ok(StartupOutcome::Active(session))
    }

    /// The remote API rejected a session that looked valid locally.
    pub async fn handle_remote_auth_failure(&self) -> WalletResult<Route> {
        log::warn!("Remote service rejected the session; signing out");
        self.clear_session().await?;
        Ok(Route::Unauthenticated)
    }

    pub async fn init_otp(&self, channel: OtpChannel, contact: &str) -> WalletResult<OtpChallenge> {
        self.track(channel.login_method(), async {
            match channel {
                OtpChannel::Email => self.validator.validate_email(contact)?,
                OtpChannel::Sms => self.validator.validate_phone(contact)?,
            }
            self.auth.init_otp(channel, contact).await
        })
        .await
    }

    /// Create an embedded key, exchange `proof` for a bundle encrypted to it,
    /// and open the resulting session.
    pub async fn login(
        &self,
        proof: &LoginProof,
        expiry_seconds: Option<u64>,
    ) -> WalletResult<Session> {
        self.track(proof.method(), async {
            self.validate_proof(proof)?;
            let expiry = self.resolve_expiry(expiry_seconds)?;
            let public_key = self.create_embedded_key().await?;
            self.exchange(proof, &public_key, expiry).await
        })
        .await
    }

    /// First half of an OAuth login: the nonce goes to the identity provider.
    pub async fn prepare_oauth(&self) -> WalletResult<OAuthChallenge> {
        let target_public_key = self.create_embedded_key().await?;
        let nonce = hex::encode(Sha256::digest(target_public_key.as_bytes()));
        Ok(OAuthChallenge {
            target_public_key,
            nonce,
        })
    }

    /// Second half of an OAuth login, using the key from [`prepare_oauth`](Self::prepare_oauth).
    pub async fn complete_oauth(
        &self,
        provider_name: &str,
        oidc_token: SecretString,
        target_public_key: &str,
        expiry_seconds: Option<u64>,
    ) -> WalletResult<Session> {
        let proof = LoginProof::OAuth {
            provider_name: provider_name.to_string(),
            oidc_token,
        };
        self.track(LoginMethod::OAuth, async {
            self.validate_proof(&proof)?;
            let expiry = self.resolve_expiry(expiry_seconds)?;
            self.validator.validate_public_key_hex(target_public_key)?;
            let target_public_key = crypto::normalize_hex(target_public_key)?;
            self.exchange(&proof, &target_public_key, expiry).await
        })
        .await
    }

    /// Export a wallet's secret through a one-off embedded key held only in memory.
    pub async fn export_wallet(
        &self,
        organization_id: &str,
        wallet_id: &str,
    ) -> WalletResult<ExportedWallet> {
        let trusted_signer = self.export_signer.as_deref().ok_or_else(|| {
            WalletError::ValidationError("No trusted export signer configured".to_string())
        })?;
        self.validator
            .validate_identifier("Organization id", organization_id)?;
        self.validator.validate_identifier("Wallet id", wallet_id)?;

        let stamper = self.stamper().await?;
        let embedded = EmbeddedKeyPair::generate()?;
        let request = WalletExportRequest {
            organization_id: organization_id.to_string(),
            wallet_id: wallet_id.to_string(),
            target_public_key: embedded.public_key_hex(),
        };

        let export_bundle = self.auth.export_wallet(&request, &stamper).await?;
        let exported = export::decrypt_export_bundle(
            &export_bundle,
            &embedded.private_key,
            organization_id,
            trusted_signer,
        )?;
        log::info!("Wallet {} exported", wallet_id);
        Ok(exported)
    }

    pub fn login_state(&self) -> LoginState {
        self.login_state.read().clone()
    }

    pub fn clear_error(&self) {
        self.login_state.write().error = None;
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.sessions.subscribe()
    }

    /// Stamper for authenticated API requests, available while a session is active.
    pub async fn stamper(&self) -> WalletResult<ApiKeyStamper> {
        let session = self
            .sessions
            .active()
            .await?
            .ok_or(WalletError::SessionExpired)?;
        ApiKeyStamper::from_session(&session, self.sessions.now_ms())
    }

    fn resolve_expiry(&self, expiry_seconds: Option<u64>) -> WalletResult<u64> {
        let expiry = expiry_seconds.unwrap_or(self.default_expiry_seconds);
        self.validator.validate_expiry_seconds(expiry)?;
        Ok(expiry)
    }

    async fn exchange(
        &self,
        proof: &LoginProof,
        target_public_key: &str,
        expiry: u64,
    ) -> WalletResult<Session> {
        let response = match self.auth.login(proof, target_public_key, expiry).await {
            Ok(response) => response,
            Err(err) => {
                self.discard_embedded_key().await;
                return Err(err);
            }
        };

        if let Some(organization_id) = &response.organization_id {
            log::debug!("Credential bundle issued for organization {}", organization_id);
        }
        self.create_session(&response.credential_bundle, Some(expiry))
            .await
    }

    fn validate_proof(&self, proof: &LoginProof) -> WalletResult<()> {
        match proof {
            LoginProof::Otp {
                otp_id,
                organization_id,
                otp_code,
                ..
            } => {
                self.validator.validate_identifier("OTP id", otp_id)?;
                self.validator
                    .validate_identifier("Organization id", organization_id)?;
                self.validator.validate_otp_code(otp_code.expose_secret())
            }
            LoginProof::Passkey { assertion } => {
                self.validator.validate_identifier("Passkey assertion", assertion)
            }
            LoginProof::OAuth {
                provider_name,
                oidc_token,
            } => {
                self.validator
                    .validate_identifier("Provider name", provider_name)?;
                if oidc_token.expose_secret().trim().is_empty() {
                    return Err(WalletError::ValidationError(
                        "OIDC token cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Drop a pending embedded key after the service refused to issue a bundle.
    async fn discard_embedded_key(&self) {
        if let Err(err) = self.keys.take().await {
            log::warn!("Failed to discard embedded key: {}", err);
        }
    }

    async fn track<T, F>(&self, method: LoginMethod, operation: F) -> WalletResult<T>
    where
        F: Future<Output = WalletResult<T>>,
    {
        {
            let mut state = self.login_state.write();
            state.loading = Some(method);
            state.error = None;
        }

        let result = operation.await;

        let mut state = self.login_state.write();
        state.loading = None;
        if let Err(err) = &result {
            log::warn!("{:?} login step failed: {}", method, err);
            state.error = Some(err.user_message());
        }
        result
    }
}
