use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, PrivateKey};
use crate::errors::{WalletError, WalletResult};
use crate::storage::SecureStorage;

/// Default lifetime of a session created from a credential bundle.
pub const DEFAULT_SESSION_EXPIRY_SECONDS: u64 = 15 * 60;

/// Secure storage slot holding the persisted session.
pub const SESSION_SLOT: &str = "session";

/// Source of wall-clock time in milliseconds since the Unix epoch.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now_ms.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Signing keypair recovered from a credential bundle, plus its absolute expiry.
///
/// Serialized as `{"publicKey", "privateKey", "expiry"}` with keys in
/// canonical hex and `expiry` in milliseconds since the Unix epoch.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Compressed SEC1 public key of the signing key.
    pub public_key: String,
    pub private_key: String,
    pub expiry: u64,
}

impl Session {
    pub fn from_signing_key(signing_key: &PrivateKey, expiry: u64) -> WalletResult<Self> {
        Ok(Self {
            public_key: hex::encode(signing_key.public_key(true)?),
            private_key: signing_key.to_hex().to_string(),
            expiry,
        })
    }

    pub fn signing_key(&self) -> WalletResult<PrivateKey> {
        PrivateKey::from_hex(&self.private_key)
    }

    pub fn is_valid_at(&self, now_ms: u64) -> bool {
        now_ms < self.expiry
    }

    /// Check that the key pair is well formed and self-consistent.
    fn verify(&self) -> WalletResult<()> {
        let signing_key = self.signing_key()?;
        let expected = hex::encode(signing_key.public_key(true)?);
        if crypto::normalize_hex(&self.public_key)? != expected {
            return Err(WalletError::InvalidKey(
                "Session public key does not match its private key".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Owns the persisted session and publishes the current one to subscribers.
#[derive(Debug)]
pub struct SessionStore {
    storage: Arc<dyn SecureStorage>,
    clock: Arc<dyn Clock>,
    current: watch::Sender<Option<Session>>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SecureStorage>, clock: Arc<dyn Clock>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            storage,
            clock,
            current,
        }
    }

    pub fn with_system_clock(storage: Arc<dyn SecureStorage>) -> Self {
        Self::new(storage, Arc::new(SystemClock))
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Persist a session for `signing_key` that expires `expiry_seconds` from now.
    ///
    /// Replaces any previous session and notifies subscribers.
    pub async fn save(&self, signing_key: &PrivateKey, expiry_seconds: u64) -> WalletResult<Session> {
        let expiry = expiry_seconds
            .checked_mul(1000)
            .and_then(|millis| self.clock.now_ms().checked_add(millis))
            .ok_or_else(|| {
                WalletError::ValidationError(format!(
                    "Session expiry of {expiry_seconds} seconds is out of range"
                ))
            })?;

        let session = Session::from_signing_key(signing_key, expiry)?;
        let serialized = zeroize::Zeroizing::new(serde_json::to_string(&session)?);
        self.storage.set_item(SESSION_SLOT, &serialized).await?;
        self.publish(Some(session.clone()));

        log::info!(
            "Session saved for key {} (expires in {}s)",
            session.public_key,
            expiry_seconds
        );
        Ok(session)
    }

    /// Read the persisted session without judging its expiry.
    ///
    /// Missing or unreadable data yields `None`; only storage backend failures
    /// are returned as errors.
    pub async fn load(&self) -> WalletResult<Option<Session>> {
        let raw = match self.storage.get_item(SESSION_SLOT).await? {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(err) => {
                log::warn!("Ignoring unreadable persisted session: {}", err);
                return Ok(None);
            }
        };

        if let Err(err) = session.verify() {
            log::warn!("Ignoring inconsistent persisted session: {}", err);
            return Ok(None);
        }

        Ok(Some(session))
    }

    pub fn is_valid(&self, session: &Session) -> bool {
        session.is_valid_at(self.clock.now_ms())
    }

    /// Delete the persisted session and notify subscribers. Idempotent.
    pub async fn clear(&self) -> WalletResult<()> {
        self.storage.delete_item(SESSION_SLOT).await?;
        if self.publish(None) {
            log::info!("Session cleared");
        }
        Ok(())
    }

    /// Last session published by this store, expired or not.
    pub fn current(&self) -> Option<Session> {
        self.current.borrow().clone()
    }

    /// The current session if it has not expired.
    ///
    /// An expired session is cleared on the way out.
    pub async fn active(&self) -> WalletResult<Option<Session>> {
        let current = self.current();
        match current {
            Some(session) if self.is_valid(&session) => Ok(Some(session)),
            Some(_) => {
                log::info!("Session expired");
                self.clear().await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.current.subscribe()
    }

    /// Make `session` the current one. Subscribers are only woken when it
    /// differs from what they last saw.
    pub(crate) fn publish(&self, session: Option<Session>) -> bool {
        self.current.send_if_modified(|current| {
            if *current == session {
                return false;
            }
            *current = session;
            true
        })
    }
}
