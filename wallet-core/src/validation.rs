use crate::crypto::{COMPRESSED_PUBLIC_KEY_LEN, UNCOMPRESSED_PUBLIC_KEY_LEN};
use crate::errors::{WalletError, WalletResult};
use regex::Regex;

/// Shortest and longest session lifetime a caller may request.
pub const MIN_SESSION_EXPIRY_SECONDS: u64 = 1;
pub const MAX_SESSION_EXPIRY_SECONDS: u64 = 30 * 24 * 60 * 60;

const MAX_BUNDLE_LEN: usize = 1024;
const MAX_CONTACT_LEN: usize = 254;

/// Input validation for login flows, run before anything reaches the network.
#[derive(Debug, Clone)]
pub struct InputValidator {
    otp_code_pattern: Regex,
    email_pattern: Regex,
    phone_pattern: Regex,
    hex_pattern: Regex,
    base58_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let otp_code_pattern = compile(r"^\d{6}$", "OTP code")?;
        let email_pattern = compile(
            r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$",
            "email",
        )?;
        let phone_pattern = compile(r"^\+[1-9]\d{6,14}$", "phone")?;
        let hex_pattern = compile(r"^(0[xX])?([0-9a-fA-F]{2})+$", "hex")?;
        let base58_pattern = compile(
            r"^[123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz]+$",
            "base58",
        )?;

        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .iter()
        .map(|pattern| compile(pattern, "malicious pattern"))
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            otp_code_pattern,
            email_pattern,
            phone_pattern,
            hex_pattern,
            base58_pattern,
            malicious_patterns,
        })
    }

    pub fn validate_otp_code(&self, code: &str) -> WalletResult<()> {
        if !self.otp_code_pattern.is_match(code) {
            return Err(WalletError::ValidationError(
                "OTP code must be 6 digits".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_email(&self, email: &str) -> WalletResult<()> {
        self.check_basic_security(email)?;

        if email.is_empty() {
            return Err(WalletError::ValidationError(
                "Email cannot be empty".to_string(),
            ));
        }

        if email.len() > MAX_CONTACT_LEN || !self.email_pattern.is_match(email) {
            return Err(WalletError::ValidationError(
                "Email address is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Phone numbers must be in E.164 form, e.g. `+15555550100`.
    pub fn validate_phone(&self, phone: &str) -> WalletResult<()> {
        if !self.phone_pattern.is_match(phone) {
            return Err(WalletError::ValidationError(
                "Phone number must be in international format".to_string(),
            ));
        }
        Ok(())
    }

    /// Accepts compressed or uncompressed SEC1 public keys, with or without `0x`.
    pub fn validate_public_key_hex(&self, key: &str) -> WalletResult<()> {
        if !self.hex_pattern.is_match(key) {
            return Err(WalletError::InvalidKey("Public key is not hex".to_string()));
        }

        let digits = key.len() - if key.starts_with("0x") || key.starts_with("0X") { 2 } else { 0 };
        match digits / 2 {
            COMPRESSED_PUBLIC_KEY_LEN | UNCOMPRESSED_PUBLIC_KEY_LEN => Ok(()),
            other => Err(WalletError::InvalidKey(format!(
                "Public key has unexpected length {other}"
            ))),
        }
    }

    pub fn validate_expiry_seconds(&self, seconds: u64) -> WalletResult<()> {
        if !(MIN_SESSION_EXPIRY_SECONDS..=MAX_SESSION_EXPIRY_SECONDS).contains(&seconds) {
            return Err(WalletError::ValidationError(format!(
                "Session expiry must be between {} and {} seconds",
                MIN_SESSION_EXPIRY_SECONDS, MAX_SESSION_EXPIRY_SECONDS
            )));
        }
        Ok(())
    }

    /// Shape check only; authenticity is established by decryption.
    pub fn validate_bundle(&self, bundle: &str) -> WalletResult<()> {
        if bundle.is_empty() || bundle.len() > MAX_BUNDLE_LEN {
            return Err(WalletError::ValidationError(
                "Credential bundle has invalid length".to_string(),
            ));
        }

        if !self.base58_pattern.is_match(bundle) {
            return Err(WalletError::ValidationError(
                "Credential bundle is not base58".to_string(),
            ));
        }

        Ok(())
    }

    /// Free-form identifiers from the remote service (OTP ids, organization ids, provider names).
    pub fn validate_identifier(&self, field: &str, value: &str) -> WalletResult<()> {
        self.check_basic_security(value)?;

        if value.trim().is_empty() {
            return Err(WalletError::ValidationError(format!(
                "{field} cannot be empty"
            )));
        }

        if value.chars().any(|c| c.is_control()) {
            return Err(WalletError::ValidationError(format!(
                "{field} contains control characters"
            )));
        }

        Ok(())
    }

    /// Check for basic security issues in any input
    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        if self
            .malicious_patterns
            .iter()
            .any(|pattern| pattern.is_match(&lowered))
        {
            return Err(WalletError::ValidationError(
                "Input contains potentially malicious content".to_string(),
            ));
        }

        Ok(())
    }
}

fn compile(pattern: &str, name: &str) -> WalletResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| WalletError::ValidationError(format!("Invalid {} regex: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> InputValidator {
        InputValidator::new().unwrap()
    }

    #[test]
    fn otp_codes() {
        let v = validator();
        assert!(v.validate_otp_code("012345").is_ok());
        for bad in ["12345", "1234567", "12a456", ""] {
            assert!(v.validate_otp_code(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn emails() {
        let v = validator();
        assert!(v.validate_email("user.name+tag@example.co.uk").is_ok());
        assert!(v.validate_email("user@localhost").is_err());
        assert!(v.validate_email("<script>@example.com").is_err());
        assert!(v.validate_email("").is_err());
    }

    #[test]
    fn phones() {
        let v = validator();
        assert!(v.validate_phone("+15555550100").is_ok());
        assert!(v.validate_phone("5555550100").is_err());
        assert!(v.validate_phone("+0123456789").is_err());
    }

    #[test]
    fn public_keys() {
        let v = validator();
        let compressed = format!("02{}", "ab".repeat(32));
        let uncompressed = format!("0x04{}", "CD".repeat(64));
        assert!(v.validate_public_key_hex(&compressed).is_ok());
        assert!(v.validate_public_key_hex(&uncompressed).is_ok());
        assert!(matches!(
            v.validate_public_key_hex("04abcd"),
            Err(WalletError::InvalidKey(_))
        ));
        assert!(v.validate_public_key_hex("zz").is_err());
    }

    #[test]
    fn expiry_bounds() {
        let v = validator();
        assert!(v.validate_expiry_seconds(900).is_ok());
        assert!(v.validate_expiry_seconds(MAX_SESSION_EXPIRY_SECONDS).is_ok());
        assert!(v.validate_expiry_seconds(0).is_err());
        assert!(v.validate_expiry_seconds(MAX_SESSION_EXPIRY_SECONDS + 1).is_err());
    }

    #[test]
    fn bundles() {
        let v = validator();
        assert!(v.validate_bundle("3xyzABC").is_ok());
        assert!(v.validate_bundle("").is_err());
        assert!(v.validate_bundle("0OIl").is_err());
        assert!(v.validate_bundle(&"a".repeat(MAX_BUNDLE_LEN + 1)).is_err());
    }

    #[test]
    fn identifiers() {
        let v = validator();
        assert!(v.validate_identifier("otp id", "otp-123").is_ok());
        assert!(v.validate_identifier("otp id", "  ").is_err());
        assert!(v.validate_identifier("otp id", "a\nb").is_err());
    }
}
