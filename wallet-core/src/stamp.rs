use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::session::Session;

pub const STAMP_HEADER_NAME: &str = "X-Stamp";
pub const SIGNATURE_SCHEME: &str = "SIGNATURE_SCHEME_TK_API_P256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stamp {
    pub public_key: String,
    /// DER-encoded ECDSA signature over SHA-256 of the body, hex encoded.
    pub signature: String,
    pub scheme: String,
}

impl Stamp {
    /// Header value: base64url (unpadded) of the JSON stamp.
    pub fn header_value(&self) -> WalletResult<String> {
        Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
    }
}

/// Signs API request bodies with a session's signing key.
pub struct ApiKeyStamper {
    signing_key: SigningKey,
    public_key: String,
}

impl ApiKeyStamper {
    /// Build a stamper from `session`, refusing sessions that expired before `now_ms`.
    pub fn from_session(session: &Session, now_ms: u64) -> WalletResult<Self> {
        if !session.is_valid_at(now_ms) {
            return Err(WalletError::SessionExpired);
        }

        let private_key = session.signing_key()?;
        let signing_key = SigningKey::from_slice(private_key.as_bytes())
            .map_err(|_| WalletError::InvalidKey("Session key cannot sign".to_string()))?;

        Ok(Self {
            signing_key,
            public_key: session.public_key.clone(),
        })
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn stamp(&self, body: &[u8]) -> Stamp {
        let signature: Signature = self.signing_key.sign(body);
        Stamp {
            public_key: self.public_key.clone(),
            signature: hex::encode(signature.to_der().as_bytes()),
            scheme: SIGNATURE_SCHEME.to_string(),
        }
    }

    /// Returns `(header name, header value)` for `body`.
    pub fn stamp_header(&self, body: &[u8]) -> WalletResult<(&'static str, String)> {
        Ok((STAMP_HEADER_NAME, self.stamp(body).header_value()?))
    }
}

impl std::fmt::Debug for ApiKeyStamper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyStamper")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::EmbeddedKeyPair;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    fn session(expiry: u64) -> Session {
        let key = EmbeddedKeyPair::generate().unwrap().private_key;
        Session::from_signing_key(&key, expiry).unwrap()
    }

    #[test]
    fn stamp_verifies_against_session_public_key() {
        let session = session(2_000);
        let stamper = ApiKeyStamper::from_session(&session, 1_000).unwrap();
        let body = br#"{"organizationId":"org"}"#;

        let stamp = stamper.stamp(body);
        assert_eq!(stamp.scheme, SIGNATURE_SCHEME);
        assert_eq!(stamp.public_key, session.public_key);

        let verifying_key =
            VerifyingKey::from_sec1_bytes(&hex::decode(&session.public_key).unwrap()).unwrap();
        let signature = Signature::from_der(&hex::decode(&stamp.signature).unwrap()).unwrap();
        assert!(verifying_key.verify(body, &signature).is_ok());
        assert!(verifying_key.verify(b"other body", &signature).is_err());
    }

    #[test]
    fn header_value_is_unpadded_base64url_json() {
        let stamper = ApiKeyStamper::from_session(&session(2_000), 0).unwrap();
        let (name, value) = stamper.stamp_header(b"{}").unwrap();

        assert_eq!(name, "X-Stamp");
        assert!(!value.contains('='));
        let decoded: Stamp =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(value).unwrap()).unwrap();
        assert_eq!(decoded.public_key, stamper.public_key());
    }

    #[test]
    fn expired_session_cannot_stamp() {
        let result = ApiKeyStamper::from_session(&session(1_000), 1_000);
        assert!(matches!(result, Err(WalletError::SessionExpired)));
    }
}
