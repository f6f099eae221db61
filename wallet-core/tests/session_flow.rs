use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use embedded_wallet_lib::bundle;
use embedded_wallet_lib::{
    ApiKeyStamper, AuthenticationService, CredentialBundleResponse, EmbeddedKeyPair, Environment,
    LoginProof, ManualClock, OtpChallenge, OtpChannel, PrivateKey, Route, RuntimeSettings,
    SecurityConfig, StartupOutcome, WalletContext, WalletError, WalletExportRequest, WalletResult,
};
use secrecy::SecretString;
use tempfile::TempDir;

const T0: u64 = 1_700_000_000_000;

/// Stands in for the backend: seals a fixed signing key to whatever target key it is given.
#[derive(Debug)]
struct SimulatedBackend {
    signing_key: PrivateKey,
}

#[async_trait]
impl AuthenticationService for SimulatedBackend {
    async fn init_otp(&self, _channel: OtpChannel, _contact: &str) -> WalletResult<OtpChallenge> {
        Ok(OtpChallenge {
            otp_id: "otp-42".into(),
            organization_id: "org-7".into(),
        })
    }

    async fn login(
        &self,
        proof: &LoginProof,
        target_public_key: &str,
        _expiration_seconds: u64,
    ) -> WalletResult<CredentialBundleResponse> {
        if let LoginProof::Otp { otp_id, .. } = proof {
            if otp_id != "otp-42" {
                return Err(WalletError::AuthenticationFailed);
            }
        }
        let receiver = hex::decode(target_public_key)
            .map_err(|e| WalletError::InvalidResponse(e.to_string()))?;
        Ok(CredentialBundleResponse {
            credential_bundle: bundle::encrypt(self.signing_key.as_bytes(), &receiver)?,
            organization_id: Some("org-7".into()),
        })
    }

    async fn export_wallet(
        &self,
        _request: &WalletExportRequest,
        _stamper: &ApiKeyStamper,
    ) -> WalletResult<String> {
        Err(WalletError::NetworkError("export is not simulated".into()))
    }
}

fn settings() -> RuntimeSettings {
    SecurityConfig::new(Environment::Test)
        .runtime_settings()
        .unwrap()
}

fn context(
    root: &TempDir,
    backend: Arc<SimulatedBackend>,
    clock: Arc<ManualClock>,
) -> WalletContext {
    WalletContext::with_services(root.path().to_path_buf(), &settings(), backend, clock).unwrap()
}

fn backend() -> Arc<SimulatedBackend> {
    Arc::new(SimulatedBackend {
        signing_key: EmbeddedKeyPair::generate().unwrap().private_key,
    })
}

#[tokio::test]
async fn bundle_to_session_end_to_end() {
    let root = TempDir::new().unwrap();
    let backend = backend();
    let clock = Arc::new(ManualClock::new(T0));
    let wallet = context(&root, backend.clone(), clock.clone());
    let controller = wallet.controller();

    let target_public_key = controller.create_embedded_key().await.unwrap();
    let response = backend
        .login(
            &LoginProof::Passkey {
                assertion: "assertion".into(),
            },
            &target_public_key,
            900,
        )
        .await
        .unwrap();

    let session = controller
        .create_session(&response.credential_bundle, Some(900))
        .await
        .unwrap();
    assert_eq!(session.expiry, T0 + 900 * 1000);
    assert_eq!(session.signing_key().unwrap(), backend.signing_key);

    let loaded = wallet.sessions().load().await.unwrap().unwrap();
    assert_eq!(loaded, session);
    assert!(wallet.sessions().is_valid(&loaded));

    clock.advance(Duration::from_secs(900));
    assert!(!wallet.sessions().is_valid(&loaded));
    assert_eq!(controller.startup().await.unwrap(), StartupOutcome::Expired);
    assert!(controller.get_session().await.unwrap().is_none());
}

#[tokio::test]
async fn otp_login_survives_restart() {
    let root = TempDir::new().unwrap();
    let backend = backend();
    let clock = Arc::new(ManualClock::new(T0));

    let session = {
        let wallet = context(&root, backend.clone(), clock.clone());
        let controller = wallet.controller();
        let challenge = controller
            .init_otp(OtpChannel::Email, "user@example.com")
            .await
            .unwrap();

        controller
            .login(
                &LoginProof::Otp {
                    channel: OtpChannel::Email,
                    otp_id: challenge.otp_id,
                    organization_id: challenge.organization_id,
                    otp_code: SecretString::from("123456".to_string()),
                },
                None,
            )
            .await
            .unwrap()
    };

    let wallet = context(&root, backend, clock.clone());
    let mut updates = wallet.sessions().subscribe();
    let outcome = wallet.controller().startup().await.unwrap();
    assert_eq!(outcome.route(), Route::Authenticated);
    assert_eq!(outcome, StartupOutcome::Active(session.clone()));

    updates.changed().await.unwrap();
    assert_eq!(updates.borrow().as_ref(), Some(&session));

    let (header, value) = wallet
        .controller()
        .stamper()
        .await
        .unwrap()
        .stamp_header(br#"{"type":"ACTIVITY_TYPE_GET_WHOAMI"}"#)
        .unwrap();
    assert_eq!(header, "X-Stamp");
    assert!(!value.is_empty());

    assert_eq!(wallet.controller().logout().await.unwrap(), Route::Unauthenticated);
    assert!(updates.borrow_and_update().is_none());
    assert_eq!(
        wallet.controller().startup().await.unwrap(),
        StartupOutcome::NoSession
    );
}

#[tokio::test]
async fn rejected_otp_leaves_no_state_behind() {
    let root = TempDir::new().unwrap();
    let wallet = context(&root, backend(), Arc::new(ManualClock::new(T0)));
    let controller = wallet.controller();

    let err = controller
        .login(
            &LoginProof::Otp {
                channel: OtpChannel::Sms,
                otp_id: "stale-otp".into(),
                organization_id: "org-7".into(),
                otp_code: SecretString::from("654321".to_string()),
            },
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::AuthenticationFailed);

    let state = controller.login_state();
    assert!(state.loading.is_none());
    assert_eq!(state.error.as_deref(), Some("Authentication failed"));

    let leftovers: Vec<_> = std::fs::read_dir(wallet.paths().secure_dir())
        .unwrap()
        .collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn decrypt_without_embedded_key_is_distinct_error() {
    let root = TempDir::new().unwrap();
    let backend = backend();
    let wallet = context(&root, backend.clone(), Arc::new(ManualClock::new(T0)));

    let stray = EmbeddedKeyPair::generate().unwrap();
    let bundle = bundle::encrypt(backend.signing_key.as_bytes(), &stray.public_key).unwrap();

    let err = wallet
        .controller()
        .create_session(&bundle, None)
        .await
        .unwrap_err();
    assert_eq!(err, WalletError::MissingEmbeddedKey);
    assert_ne!(err.user_message(), WalletError::AuthenticationFailed.user_message());
}
