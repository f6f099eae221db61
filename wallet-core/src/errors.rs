use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Key and credential errors
    KeyGeneration(String),
    MissingEmbeddedKey,
    AuthenticationFailed,
    InvalidKey(String),
    SessionExpired,

    // Network errors
    NetworkError(String),
    InvalidResponse(String),

    // Storage errors
    StorageError(String),
    FileNotFound(String),
    PermissionDenied(String),

    // Validation errors
    ValidationError(String),

    // Application errors
    NotInitialized,

    // Generic errors
    Unknown(String),
}

impl WalletError {
    /// Message suitable for showing to the user after a failed login or session operation.
    ///
    /// Authentication failures collapse to a single message regardless of cause.
    pub fn user_message(&self) -> String {
        match self {
            WalletError::KeyGeneration(_) => {
                "Something went wrong while preparing a secure login. Please try again."
                    .to_string()
            }
            WalletError::MissingEmbeddedKey => {
                "Login request expired on this device. Please start the login again.".to_string()
            }
            WalletError::AuthenticationFailed => "Authentication failed".to_string(),
            WalletError::SessionExpired => "Session expired".to_string(),
            WalletError::NetworkError(_) | WalletError::InvalidResponse(_) => {
                "Unable to reach the authentication service".to_string()
            }
            WalletError::ValidationError(msg) | WalletError::InvalidKey(msg) => msg.clone(),
            WalletError::StorageError(_)
            | WalletError::FileNotFound(_)
            | WalletError::PermissionDenied(_) => {
                "Secure storage is unavailable on this device".to_string()
            }
            WalletError::NotInitialized => "Wallet not initialized".to_string(),
            WalletError::Unknown(_) => "An unknown error occurred".to_string(),
        }
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::KeyGeneration(msg) => write!(f, "Key generation failed: {}", msg),
            WalletError::MissingEmbeddedKey => write!(f, "Embedded key not found"),
            WalletError::AuthenticationFailed => write!(f, "Authentication failed"),
            WalletError::InvalidKey(msg) => write!(f, "Invalid key: {}", msg),
            WalletError::SessionExpired => write!(f, "Session expired"),

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::FileNotFound(msg) => write!(f, "File not found: {}", msg),
            WalletError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            WalletError::NotInitialized => write!(f, "Wallet not initialized"),

            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => WalletError::FileNotFound(error.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                WalletError::PermissionDenied(error.to_string())
            }
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}
