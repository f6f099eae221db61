//! Credential bundle encryption to an embedded key.
//!
//! A bundle is the Base58Check encoding of
//! `compressed encapsulated key (33 bytes) || AES-256-GCM ciphertext`, produced by
//! HPKE base mode with DHKEM(P-256, HKDF-SHA256), HKDF-SHA256 and AES-256-GCM
//! and an empty `info`. The additional authenticated data binds both parties:
//! `uncompressed enc || uncompressed receiver public key`.
//!
//! Every decryption failure is reported as [`WalletError::AuthenticationFailed`].

use hkdf::Hkdf;
use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::PublicKey;
use rand::rngs::OsRng;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{PrivateKey, COMPRESSED_PUBLIC_KEY_LEN, PRIVATE_KEY_LEN};
use crate::errors::{WalletError, WalletResult};

const HPKE_VERSION_LABEL: &[u8] = b"HPKE-v1";
const KEM_ID: u16 = 0x0010;
const KDF_ID: u16 = 0x0001;
const AEAD_ID: u16 = 0x0002;
const MODE_BASE: u8 = 0x00;

const SHARED_SECRET_LEN: usize = 32;
const AEAD_KEY_LEN: usize = 32;
const AEAD_NONCE_LEN: usize = 12;

/// An encrypted credential bundle as issued by the authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedCredentialBundle(String);

impl EncryptedCredentialBundle {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EncryptedCredentialBundle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for EncryptedCredentialBundle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Recover the signing private key sealed inside `bundle`.
pub fn decrypt(
    bundle: &EncryptedCredentialBundle,
    embedded_private_key: &PrivateKey,
) -> WalletResult<PrivateKey> {
    let plaintext = open(bundle, embedded_private_key).map_err(|reason| {
        log::debug!("Credential bundle rejected: {}", reason);
        WalletError::AuthenticationFailed
    })?;

    if plaintext.len() != PRIVATE_KEY_LEN {
        log::debug!(
            "Credential bundle rejected: plaintext is {} bytes",
            plaintext.len()
        );
        return Err(WalletError::AuthenticationFailed);
    }

    PrivateKey::from_bytes(&plaintext).map_err(|_| WalletError::AuthenticationFailed)
}

/// Seal `plaintext` to `receiver_public_key` (compressed or uncompressed SEC1).
///
/// This is the sending half of the scheme, used to stand in for the
/// authentication service.
pub fn encrypt(
    plaintext: &[u8],
    receiver_public_key: &[u8],
) -> WalletResult<EncryptedCredentialBundle> {
    let (enc_compressed, ciphertext) = seal(plaintext, receiver_public_key)?;
    let mut payload = Vec::with_capacity(COMPRESSED_PUBLIC_KEY_LEN + ciphertext.len());
    payload.extend_from_slice(&enc_compressed);
    payload.extend_from_slice(&ciphertext);

    Ok(EncryptedCredentialBundle(
        bs58::encode(payload).with_check().into_string(),
    ))
}

/// HPKE-seal `plaintext` to `receiver_public_key`, returning the compressed
/// encapsulated key and the ciphertext.
pub(crate) fn seal(
    plaintext: &[u8],
    receiver_public_key: &[u8],
) -> WalletResult<(Vec<u8>, Vec<u8>)> {
    let receiver = PublicKey::from_sec1_bytes(receiver_public_key)
        .map_err(|_| WalletError::InvalidKey("Receiver key is not a valid P-256 point".into()))?;
    let receiver_uncompressed = receiver.to_encoded_point(false);

    let ephemeral = EphemeralSecret::random(&mut OsRng);
    let enc_point = ephemeral.public_key().to_encoded_point(false);
    let shared = ephemeral.diffie_hellman(&receiver);

    let context = HpkeContext::derive(
        &shared.raw_secret_bytes()[..],
        enc_point.as_bytes(),
        receiver_uncompressed.as_bytes(),
    )
    .map_err(|reason| WalletError::Unknown(format!("HPKE setup failed: {reason}")))?;

    let aad = [enc_point.as_bytes(), receiver_uncompressed.as_bytes()].concat();
    let mut in_out = plaintext.to_vec();
    context
        .aead_key()
        .map_err(|reason| WalletError::Unknown(reason.to_string()))?
        .seal_in_place_append_tag(context.nonce(), Aad::from(&aad[..]), &mut in_out)
        .map_err(|_| WalletError::Unknown("Encryption failure".to_string()))?;

    let enc_compressed = ephemeral.public_key().to_encoded_point(true);
    Ok((enc_compressed.as_bytes().to_vec(), in_out))
}

fn open(
    bundle: &EncryptedCredentialBundle,
    embedded_private_key: &PrivateKey,
) -> Result<Zeroizing<Vec<u8>>, &'static str> {
    let bytes = bs58::decode(bundle.as_str().trim())
        .with_check(None)
        .into_vec()
        .map_err(|_| "invalid base58check encoding")?;

    if bytes.len() <= COMPRESSED_PUBLIC_KEY_LEN {
        return Err("bundle too short");
    }
    let (enc_compressed, ciphertext) = bytes.split_at(COMPRESSED_PUBLIC_KEY_LEN);
    open_sealed(enc_compressed, ciphertext, embedded_private_key)
}

/// HPKE-open `ciphertext` addressed to `receiver`. `enc` may be compressed or
/// uncompressed SEC1.
pub(crate) fn open_sealed(
    enc: &[u8],
    ciphertext: &[u8],
    receiver: &PrivateKey,
) -> Result<Zeroizing<Vec<u8>>, &'static str> {
    let enc = PublicKey::from_sec1_bytes(enc).map_err(|_| "invalid encapsulated key")?;
    let enc_point = enc.to_encoded_point(false);

    let secret = receiver.secret_key().map_err(|_| "invalid embedded key")?;
    let receiver_point = secret.public_key().to_encoded_point(false);

    let shared = diffie_hellman(secret.to_nonzero_scalar(), enc.as_affine());
    let context = HpkeContext::derive(
        &shared.raw_secret_bytes()[..],
        enc_point.as_bytes(),
        receiver_point.as_bytes(),
    )?;

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err("ciphertext shorter than authentication tag");
    }

    let aad = [enc_point.as_bytes(), receiver_point.as_bytes()].concat();
    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = context
        .aead_key()?
        .open_in_place(context.nonce(), Aad::from(&aad[..]), &mut in_out)
        .map_err(|_| "aead open failed")?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

/// Key and nonce for the first (and only) message of an HPKE base-mode context.
struct HpkeContext {
    key: Zeroizing<[u8; AEAD_KEY_LEN]>,
    nonce: [u8; AEAD_NONCE_LEN],
}

impl HpkeContext {
    fn derive(dh: &[u8], enc: &[u8], receiver: &[u8]) -> Result<Self, &'static str> {
        let shared_secret = extract_and_expand(dh, enc, receiver)?;

        let suite = hpke_suite_id();
        let (psk_id_hash, _) = labeled_extract(&suite, &[], b"psk_id_hash", &[]);
        let (info_hash, _) = labeled_extract(&suite, &[], b"info_hash", &[]);
        let mut schedule_context = Vec::with_capacity(1 + 2 * SHARED_SECRET_LEN);
        schedule_context.push(MODE_BASE);
        schedule_context.extend_from_slice(&psk_id_hash);
        schedule_context.extend_from_slice(&info_hash);

        let (_, secret) = labeled_extract(&suite, &shared_secret[..], b"secret", &[]);

        let mut key = Zeroizing::new([0u8; AEAD_KEY_LEN]);
        labeled_expand(&secret, &suite, b"key", &schedule_context, &mut key[..])?;
        let mut nonce = [0u8; AEAD_NONCE_LEN];
        labeled_expand(&secret, &suite, b"base_nonce", &schedule_context, &mut nonce)?;

        Ok(Self { key, nonce })
    }

    fn aead_key(&self) -> Result<LessSafeKey, &'static str> {
        let unbound =
            UnboundKey::new(&aead::AES_256_GCM, &self.key[..]).map_err(|_| "invalid aead key")?;
        Ok(LessSafeKey::new(unbound))
    }

    fn nonce(&self) -> Nonce {
        Nonce::assume_unique_for_key(self.nonce)
    }
}

/// DHKEM `ExtractAndExpand` producing the KEM shared secret.
fn extract_and_expand(
    dh: &[u8],
    enc: &[u8],
    receiver: &[u8],
) -> Result<Zeroizing<[u8; SHARED_SECRET_LEN]>, &'static str> {
    let suite = kem_suite_id();
    let (_, eae_prk) = labeled_extract(&suite, &[], b"eae_prk", dh);

    let kem_context = [enc, receiver].concat();
    let mut shared_secret = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    labeled_expand(
        &eae_prk,
        &suite,
        b"shared_secret",
        &kem_context,
        &mut shared_secret[..],
    )?;
    Ok(shared_secret)
}

fn labeled_extract(
    suite_id: &[u8],
    salt: &[u8],
    label: &[u8],
    ikm: &[u8],
) -> (Zeroizing<Vec<u8>>, Hkdf<Sha256>) {
    let labeled_ikm = Zeroizing::new([HPKE_VERSION_LABEL, suite_id, label, ikm].concat());
    let (prk, hkdf) = Hkdf::<Sha256>::extract(Some(salt), &labeled_ikm);
    (Zeroizing::new(prk.to_vec()), hkdf)
}

fn labeled_expand(
    prk: &Hkdf<Sha256>,
    suite_id: &[u8],
    label: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), &'static str> {
    let length = u16::try_from(out.len()).map_err(|_| "expand length overflow")?;
    let labeled_info = [
        &length.to_be_bytes()[..],
        HPKE_VERSION_LABEL,
        suite_id,
        label,
        info,
    ]
    .concat();
    prk.expand(&labeled_info, out)
        .map_err(|_| "hkdf expand failed")
}

fn kem_suite_id() -> Vec<u8> {
    [&b"KEM"[..], &KEM_ID.to_be_bytes()[..]].concat()
}

fn hpke_suite_id() -> Vec<u8> {
    [
        &b"HPKE"[..],
        &KEM_ID.to_be_bytes()[..],
        &KDF_ID.to_be_bytes()[..],
        &AEAD_ID.to_be_bytes()[..],
    ]
    .concat()
}
