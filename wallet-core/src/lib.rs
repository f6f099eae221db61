// lib.rs - Core library structure for the embedded-key wallet session

pub mod app_state;
pub mod auth;
pub mod bundle;
pub mod config_store;
pub mod crypto;
pub mod errors;
pub mod export;
pub mod lifecycle;
pub mod security;
pub mod session;
pub mod stamp;
pub mod storage;
pub mod validation;

// Re-export common types
pub use app_state::{SharedWalletContext, WalletContext};
pub use auth::{
    AuthenticationService, CredentialBundleResponse, LoginMethod, LoginProof, OtpChallenge,
    OtpChannel, RpcAuthClient, WalletExportRequest,
};
pub use bundle::EncryptedCredentialBundle;
pub use config_store::{AuthConfig, ConfigStore, SessionConfig, WalletConfig};
pub use crypto::{EmbeddedKeyPair, PrivateKey};
pub use errors::{WalletError, WalletResult};
pub use export::ExportedWallet;
pub use lifecycle::{LoginState, OAuthChallenge, Route, SessionController, StartupOutcome};
pub use security::{Environment, RuntimeSettings, SecurityConfig};
pub use session::{
    Clock, ManualClock, Session, SessionStore, SystemClock, DEFAULT_SESSION_EXPIRY_SECONDS,
};
pub use stamp::{ApiKeyStamper, Stamp};
pub use storage::{
    EmbeddedKeyStore, FileSecureStorage, MemorySecureStorage, SecureStorage, WalletPaths,
};
pub use validation::InputValidator;
