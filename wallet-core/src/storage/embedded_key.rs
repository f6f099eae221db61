use std::sync::Arc;

use tokio::sync::Mutex;

use super::SecureStorage;
use crate::crypto::PrivateKey;
use crate::errors::{WalletError, WalletResult};

/// Secure storage slot holding the pending embedded private key.
pub const EMBEDDED_KEY_SLOT: &str = "embedded-key";

/// Single-slot store for the embedded private key with read-once semantics.
///
/// `take` reads and deletes under one lock, so two callers can never both
/// observe the same key.
#[derive(Debug)]
pub struct EmbeddedKeyStore {
    storage: Arc<dyn SecureStorage>,
    slot: Mutex<()>,
}

impl EmbeddedKeyStore {
    pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
        Self {
            storage,
            slot: Mutex::new(()),
        }
    }

    /// Store `key`, replacing any key left behind by an earlier attempt.
    pub async fn save(&self, key: &PrivateKey) -> WalletResult<()> {
        let _guard = self.slot.lock().await;
        let encoded = key.to_hex();
        self.storage.set_item(EMBEDDED_KEY_SLOT, &encoded).await?;
        log::debug!("Embedded key stored");
        Ok(())
    }

    /// Remove and return the stored key.
    ///
    /// The slot is emptied even when the stored value turns out to be unusable.
    pub async fn take(&self) -> WalletResult<Option<PrivateKey>> {
        let _guard = self.slot.lock().await;
        let stored = match self.storage.get_item(EMBEDDED_KEY_SLOT).await? {
            Some(value) => value,
            None => return Ok(None),
        };
        self.storage.delete_item(EMBEDDED_KEY_SLOT).await?;
        log::debug!("Embedded key consumed");

        PrivateKey::from_hex(&stored)
            .map(Some)
            .map_err(|_| WalletError::InvalidKey("Stored embedded key is corrupt".to_string()))
    }

    /// Like [`take`](Self::take), but a missing key is an error.
    pub async fn take_required(&self) -> WalletResult<PrivateKey> {
        self.take().await?.ok_or(WalletError::MissingEmbeddedKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EmbeddedKeyPair;
    use crate::storage::MemorySecureStorage;

    fn store() -> (Arc<MemorySecureStorage>, EmbeddedKeyStore) {
        let storage = Arc::new(MemorySecureStorage::new());
        let store = EmbeddedKeyStore::new(storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn take_returns_saved_key_once() {
        let (_, store) = store();
        let key = EmbeddedKeyPair::generate().unwrap().private_key;

        store.save(&key).await.unwrap();
        assert_eq!(store.take().await.unwrap(), Some(key));
        assert_eq!(store.take().await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_save_wins() {
        let (_, store) = store();
        let first = EmbeddedKeyPair::generate().unwrap().private_key;
        let second = EmbeddedKeyPair::generate().unwrap().private_key;

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();
        assert_eq!(store.take().await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn take_required_reports_missing_key() {
        let (_, store) = store();
        assert_eq!(
            store.take_required().await.unwrap_err(),
            WalletError::MissingEmbeddedKey
        );
    }

    #[tokio::test]
    async fn corrupt_slot_is_cleared() {
        let (storage, store) = store();
        storage
            .set_item(EMBEDDED_KEY_SLOT, "not-a-key")
            .await
            .unwrap();

        assert!(matches!(store.take().await, Err(WalletError::InvalidKey(_))));
        assert!(storage.is_empty());
        assert_eq!(store.take().await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_takes_observe_key_once() {
        let (_, store) = store();
        let store = Arc::new(store);
        store
            .save(&EmbeddedKeyPair::generate().unwrap().private_key)
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.take().await.unwrap() })
            })
            .collect();

        let mut observed = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                observed += 1;
            }
        }
        assert_eq!(observed, 1);
    }
}
