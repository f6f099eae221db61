//! P-256 key material for embedded keys and session signing keys.
//!
//! Keys cross every API boundary as lower-case hex without a `0x` prefix.
//! Hex input is accepted with or without the prefix and in either case.

use crate::errors::{WalletError, WalletResult};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const PRIVATE_KEY_LEN: usize = 32;
pub const COMPRESSED_PUBLIC_KEY_LEN: usize = 33;
pub const UNCOMPRESSED_PUBLIC_KEY_LEN: usize = 65;

const MAX_KEYGEN_ATTEMPTS: usize = 4;

/// A P-256 private scalar, zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey([u8; PRIVATE_KEY_LEN]);

impl PrivateKey {
    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(WalletError::InvalidKey(format!(
                "Private key must be {} bytes, got {}",
                PRIVATE_KEY_LEN,
                bytes.len()
            )));
        }

        // Rejects zero and values outside the curve order.
        SecretKey::from_slice(bytes)
            .map_err(|_| WalletError::InvalidKey("Private key is not a valid P-256 scalar".into()))?;

        let mut raw = [0u8; PRIVATE_KEY_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }

    pub fn from_hex(input: &str) -> WalletResult<Self> {
        let bytes = Zeroizing::new(decode_hex(input)?);
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.0
    }

    pub(crate) fn secret_key(&self) -> WalletResult<SecretKey> {
        SecretKey::from_slice(&self.0)
            .map_err(|_| WalletError::InvalidKey("Private key is not a valid P-256 scalar".into()))
    }

    /// SEC1-encoded public key for this scalar.
    pub fn public_key(&self, compressed: bool) -> WalletResult<Vec<u8>> {
        let secret = self.secret_key()?;
        Ok(secret
            .public_key()
            .to_encoded_point(compressed)
            .as_bytes()
            .to_vec())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// Ephemeral keypair generated for a single login attempt.
#[derive(Debug, Clone)]
pub struct EmbeddedKeyPair {
    /// Uncompressed SEC1 public key (65 bytes, `04 || x || y`).
    pub public_key: Vec<u8>,
    pub private_key: PrivateKey,
}

impl EmbeddedKeyPair {
    pub fn generate() -> WalletResult<Self> {
        let private_key = random_private_key()?;
        let public_key = private_key.public_key(false)?;
        debug_assert_eq!(public_key.len(), UNCOMPRESSED_PUBLIC_KEY_LEN);
        Ok(Self {
            public_key,
            private_key,
        })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }
}

/// Generate a fresh embedded keypair from the OS random source.
pub fn generate() -> WalletResult<EmbeddedKeyPair> {
    EmbeddedKeyPair::generate()
}

/// Derive the SEC1 public key for a raw 32-byte private key.
pub fn public_key_from_private(private_key: &[u8], compressed: bool) -> WalletResult<Vec<u8>> {
    PrivateKey::from_bytes(private_key)?.public_key(compressed)
}

/// Re-encode a compressed or uncompressed SEC1 public key in uncompressed form.
pub fn uncompress_public_key(public_key: &[u8]) -> WalletResult<Vec<u8>> {
    let point = PublicKey::from_sec1_bytes(public_key)
        .map_err(|_| WalletError::InvalidKey("Public key is not a valid P-256 point".into()))?;
    Ok(point.to_encoded_point(false).as_bytes().to_vec())
}

/// Decode hex with an optional `0x` prefix.
pub fn decode_hex(input: &str) -> WalletResult<Vec<u8>> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    hex::decode(stripped).map_err(|e| WalletError::InvalidKey(format!("Invalid hex: {e}")))
}

/// Canonical form of a hex key: lower-case, no `0x` prefix.
pub fn normalize_hex(input: &str) -> WalletResult<String> {
    Ok(hex::encode(decode_hex(input)?))
}

fn random_private_key() -> WalletResult<PrivateKey> {
    let mut rng = OsRng;
    let mut candidate = Zeroizing::new([0u8; PRIVATE_KEY_LEN]);

    for _ in 0..MAX_KEYGEN_ATTEMPTS {
        rng.try_fill_bytes(&mut candidate[..])
            .map_err(|e| WalletError::KeyGeneration(format!("Entropy source failure: {e}")))?;

        if let Ok(key) = PrivateKey::from_bytes(&candidate[..]) {
            return Ok(key);
        }
    }

    Err(WalletError::KeyGeneration(
        "Random source did not yield a valid P-256 scalar".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_public_key_matches_private_key() {
        let pair = generate().unwrap();
        assert_eq!(pair.public_key.len(), UNCOMPRESSED_PUBLIC_KEY_LEN);
        assert_eq!(pair.public_key[0], 0x04);

        let derived = public_key_from_private(pair.private_key.as_bytes(), false).unwrap();
        assert_eq!(derived, pair.public_key);
    }

    #[test]
    fn consecutive_keys_differ() {
        let first = generate().unwrap();
        let second = generate().unwrap();
        assert_ne!(first.private_key, second.private_key);
        assert_ne!(first.public_key, second.public_key);
    }

    #[test]
    fn compressed_and_uncompressed_forms_agree() {
        let pair = generate().unwrap();
        let compressed = pair.private_key.public_key(true).unwrap();
        assert_eq!(compressed.len(), COMPRESSED_PUBLIC_KEY_LEN);
        assert_eq!(uncompress_public_key(&compressed).unwrap(), pair.public_key);
    }

    #[test]
    fn hex_prefix_and_case_are_normalized() {
        let pair = generate().unwrap();
        let canonical = pair.private_key.to_hex();
        let prefixed = format!("0x{}", canonical.to_uppercase());

        assert_eq!(normalize_hex(&prefixed).unwrap(), *canonical);
        assert_eq!(PrivateKey::from_hex(&prefixed).unwrap(), pair.private_key);
    }

    #[test]
    fn invalid_scalars_are_rejected() {
        assert!(matches!(
            PrivateKey::from_bytes(&[0u8; 32]),
            Err(WalletError::InvalidKey(_))
        ));
        assert!(matches!(
            PrivateKey::from_bytes(&[0xFF; 32]),
            Err(WalletError::InvalidKey(_))
        ));
        assert!(matches!(
            PrivateKey::from_bytes(&[1u8; 31]),
            Err(WalletError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let pair = generate().unwrap();
        let rendered = format!("{:?}", pair);
        assert!(!rendered.contains(pair.private_key.to_hex().as_str()));
        assert!(rendered.contains("REDACTED"));
    }
}
