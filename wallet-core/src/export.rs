//! Wallet export bundles.
//!
//! An export response is a JSON envelope signed by the wallet enclave:
//! `{version, data, dataSignature, enclaveQuorumPublic}`. `data` is the hex of
//! a JSON document `{organizationId, encappedPublic, ciphertext}` whose
//! ciphertext is sealed to a one-off embedded key with the same HPKE suite as
//! credential bundles.

use std::fmt;

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::PublicKey;
use serde::Deserialize;
use zeroize::Zeroizing;

use crate::bundle;
use crate::crypto::{self, PrivateKey};
use crate::errors::{WalletError, WalletResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportEnvelope {
    data: String,
    data_signature: String,
    enclave_quorum_public: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignedExportData {
    organization_id: String,
    encapped_public: String,
    ciphertext: String,
}

/// Decrypted wallet export, normally a BIP-39 mnemonic.
pub struct ExportedWallet(Zeroizing<Vec<u8>>);

impl ExportedWallet {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn mnemonic(&self) -> WalletResult<Zeroizing<String>> {
        let text = std::str::from_utf8(&self.0).map_err(|_| {
            WalletError::InvalidResponse("Exported wallet is not a mnemonic".to_string())
        })?;
        Ok(Zeroizing::new(text.to_string()))
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.0[..]))
    }
}

impl fmt::Debug for ExportedWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExportedWallet").field(&"[REDACTED]").finish()
    }
}

/// Verify and open an export bundle addressed to `embedded_private_key`.
///
/// The envelope must be signed by `trusted_signer` (SEC1 public key) and
/// issued for `organization_id`.
pub fn decrypt_export_bundle(
    export_bundle: &str,
    embedded_private_key: &PrivateKey,
    organization_id: &str,
    trusted_signer: &[u8],
) -> WalletResult<ExportedWallet> {
    let envelope: ExportEnvelope = serde_json::from_str(export_bundle)
        .map_err(|e| WalletError::InvalidResponse(format!("Malformed export bundle: {e}")))?;

    let trusted = PublicKey::from_sec1_bytes(trusted_signer)
        .map_err(|_| WalletError::InvalidKey("Export signer is not a P-256 key".to_string()))?;
    let claimed = decode_field("enclaveQuorumPublic", &envelope.enclave_quorum_public)?;
    if PublicKey::from_sec1_bytes(&claimed).ok().as_ref() != Some(&trusted) {
        log::warn!("Export bundle signed by an untrusted enclave key");
        return Err(WalletError::AuthenticationFailed);
    }

    let data = decode_field("data", &envelope.data)?;
    let signature = crypto::decode_hex(&envelope.data_signature)
        .ok()
        .and_then(|der| Signature::from_der(&der).ok())
        .ok_or(WalletError::AuthenticationFailed)?;
    VerifyingKey::from(&trusted)
        .verify(&data, &signature)
        .map_err(|_| {
            log::warn!("Export bundle signature does not verify");
            WalletError::AuthenticationFailed
        })?;

    let signed: SignedExportData = serde_json::from_slice(&data)
        .map_err(|e| WalletError::InvalidResponse(format!("Malformed export data: {e}")))?;
    if signed.organization_id != organization_id {
        return Err(WalletError::InvalidResponse(
            "Export bundle was issued for another organization".to_string(),
        ));
    }

    let enc = decode_field("encappedPublic", &signed.encapped_public)?;
    let ciphertext = decode_field("ciphertext", &signed.ciphertext)?;
    let plaintext =
        bundle::open_sealed(&enc, &ciphertext, embedded_private_key).map_err(|reason| {
            log::debug!("Export bundle rejected: {}", reason);
            WalletError::AuthenticationFailed
        })?;

    Ok(ExportedWallet(plaintext))
}

fn decode_field(name: &str, value: &str) -> WalletResult<Vec<u8>> {
    crypto::decode_hex(value)
        .map_err(|_| WalletError::InvalidResponse(format!("Export bundle field {name} is not hex")))
}

/// Build a signed export bundle the way the enclave does.
#[cfg(test)]
pub(crate) fn seal_export_bundle(
    plaintext: &[u8],
    receiver_public_key: &[u8],
    organization_id: &str,
    signer: &p256::ecdsa::SigningKey,
) -> String {
    use p256::ecdsa::signature::Signer;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    let (enc, ciphertext) = bundle::seal(plaintext, receiver_public_key).unwrap();
    let data = serde_json::to_vec(&serde_json::json!({
        "organizationId": organization_id,
        "encappedPublic": hex::encode(crypto::uncompress_public_key(&enc).unwrap()),
        "ciphertext": hex::encode(ciphertext),
    }))
    .unwrap();
    let signature: Signature = signer.sign(&data);

    serde_json::json!({
        "version": "v1.0.0",
        "data": hex::encode(&data),
        "dataSignature": hex::encode(signature.to_der().as_bytes()),
        "enclaveQuorumPublic": hex::encode(
            PublicKey::from(signer.verifying_key()).to_encoded_point(false).as_bytes()
        ),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EmbeddedKeyPair;
    use p256::elliptic_curve::sec1::ToEncodedPoint;

    const RECEIVER: &str = "b76f6127b32aa23ea7e0967dd0b3c51b6ec47eb1fa3436759ae7f1ad288517a1";
    const SIGNER: &str = "042284c6779fdefa5a9e9ff7d539479bca5d110bfa75e836b227f998b2f781c06c\
                          60fb2cc3b8c694643a377185628e2a7922c92dbd186f0a22e12a3ffca682fc87";
    const MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon \
                            abandon abandon abandon about";

    // Signed and sealed outside this crate.
    const EXPORT_BUNDLE: &str = r#"{"version":"v1.0.0","data":"7b226f7267616e697a6174696f6e4964223a226f72672d37222c22656e6361707065645075626c6963223a2230343737643666323535346163393865316462393635356131303766326464396536363539313164653863383837376133326561613834623137326132346631363139373836373134306235656666646163366437656165363233616461353062623938313333633936323164623132616530633462343632353235313731393638222c2263697068657274657874223a226339633234313434613133633138636236623635666361303566336261313763653732653234313365306238376361303063363162396330343663336161333365383561613239613964313236313437366163396130383331653530653038393062316537663039303336633466636238663161306665353362666533383833343263323861323430336431316336366334613530376238346135366537613233326262323463393732323432613237636231323538616463666233363131323739306338623465616537376132653436613132366633666336227d","dataSignature":"304402203bf58f13ba67147ab29d336dd1cd8d82427404d6883dd523812771aaf145888d022008fbe36e4e30d5a920f8180784a97ac1144c9edacb8e85dea452ee610343a909","enclaveQuorumPublic":"042284c6779fdefa5a9e9ff7d539479bca5d110bfa75e836b227f998b2f781c06c60fb2cc3b8c694643a377185628e2a7922c92dbd186f0a22e12a3ffca682fc87"}"#;

    fn receiver() -> PrivateKey {
        PrivateKey::from_hex(RECEIVER).unwrap()
    }

    fn signer() -> Vec<u8> {
        hex::decode(SIGNER).unwrap()
    }

    #[test]
    fn opens_enclave_signed_export() {
        let exported =
            decrypt_export_bundle(EXPORT_BUNDLE, &receiver(), "org-7", &signer()).unwrap();
        assert_eq!(exported.mnemonic().unwrap().as_str(), MNEMONIC);
        assert_eq!(format!("{exported:?}"), "ExportedWallet(\"[REDACTED]\")");
    }

    #[test]
    fn untrusted_signer_is_rejected() {
        let other = EmbeddedKeyPair::generate().unwrap();
        let err =
            decrypt_export_bundle(EXPORT_BUNDLE, &receiver(), "org-7", &other.public_key)
                .unwrap_err();
        assert_eq!(err, WalletError::AuthenticationFailed);
    }

    #[test]
    fn altered_data_fails_signature_check() {
        let tampered = EXPORT_BUNDLE.replacen("\"data\":\"7b22", "\"data\":\"7b20", 1);
        let err = decrypt_export_bundle(&tampered, &receiver(), "org-7", &signer()).unwrap_err();
        assert_eq!(err, WalletError::AuthenticationFailed);
    }

    #[test]
    fn other_organization_is_rejected() {
        let err =
            decrypt_export_bundle(EXPORT_BUNDLE, &receiver(), "org-8", &signer()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidResponse(_)));
    }

    #[test]
    fn wrong_embedded_key_cannot_open() {
        let other = EmbeddedKeyPair::generate().unwrap();
        let err = decrypt_export_bundle(EXPORT_BUNDLE, &other.private_key, "org-7", &signer())
            .unwrap_err();
        assert_eq!(err, WalletError::AuthenticationFailed);
    }

    #[test]
    fn locally_sealed_export_round_trips() {
        let embedded = EmbeddedKeyPair::generate().unwrap();
        let enclave = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let enclave_public = PublicKey::from(enclave.verifying_key()).to_encoded_point(false);

        let bundle =
            seal_export_bundle(MNEMONIC.as_bytes(), &embedded.public_key, "org-1", &enclave);
        let exported = decrypt_export_bundle(
            &bundle,
            &embedded.private_key,
            "org-1",
            enclave_public.as_bytes(),
        )
        .unwrap();
        assert_eq!(exported.to_hex().as_str(), hex::encode(MNEMONIC));
    }

    #[test]
    fn garbage_is_invalid_response() {
        let err = decrypt_export_bundle("not json", &receiver(), "org-7", &signer()).unwrap_err();
        assert!(matches!(err, WalletError::InvalidResponse(_)));
    }
}
