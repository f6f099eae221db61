//! Remote authentication service: OTP initiation and credential bundle issuance.
//!
//! The service receives the embedded public key as `targetPublicKey` and answers
//! with a credential bundle encrypted to it. `RpcAuthClient` talks to the
//! application backend, which forwards to the wallet infrastructure API.
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bundle::EncryptedCredentialBundle;
use crate::errors::{WalletError, WalletResult};
use crate::stamp::ApiKeyStamper;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EXPORT_WALLET_PATH: &str = "/public/v1/submit/export_wallet";
const EXPORT_WALLET_ACTIVITY: &str = "ACTIVITY_TYPE_EXPORT_WALLET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoginMethod {
    Email,
    Phone,
    Passkey,
    OAuth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtpChannel {
    #[serde(rename = "OTP_TYPE_EMAIL")]
    Email,
    #[serde(rename = "OTP_TYPE_SMS")]
    Sms,
}

impl OtpChannel {
    pub fn login_method(self) -> LoginMethod {
        match self {
            OtpChannel::Email => LoginMethod::Email,
            OtpChannel::Sms => LoginMethod::Phone,
        }
    }
}

/// Pending OTP verification returned by `init_otp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpChallenge {
    pub otp_id: String,
    pub organization_id: String,
}

/// Evidence the user presents to obtain a credential bundle.
#[derive(Debug)]
pub enum LoginProof {
    Otp {
        channel: OtpChannel,
        otp_id: String,
        organization_id: String,
        otp_code: SecretString,
    },
    /// Platform passkey assertion, already encoded by the authenticator bridge.
    Passkey { assertion: String },
    OAuth {
        provider_name: String,
        oidc_token: SecretString,
    },
}

impl LoginProof {
    pub fn method(&self) -> LoginMethod {
        match self {
            LoginProof::Otp { channel, .. } => channel.login_method(),
            LoginProof::Passkey { .. } => LoginMethod::Passkey,
            LoginProof::OAuth { .. } => LoginMethod::OAuth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundleResponse {
    pub credential_bundle: EncryptedCredentialBundle,
    #[serde(default)]
    pub organization_id: Option<String>,
}

/// Which wallet to export, and the one-off key the export is sealed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletExportRequest {
    pub organization_id: String,
    pub wallet_id: String,
    /// Uncompressed embedded public key in hex.
    pub target_public_key: String,
}

#[async_trait]
pub trait AuthenticationService: Send + Sync + fmt::Debug {
    async fn init_otp(&self, channel: OtpChannel, contact: &str) -> WalletResult<OtpChallenge>;

    /// Exchange `proof` for a credential bundle encrypted to `target_public_key`.
    async fn login(
        &self,
        proof: &LoginProof,
        target_public_key: &str,
        expiration_seconds: u64,
    ) -> WalletResult<CredentialBundleResponse>;

    /// Submit a stamped export activity and return the raw export bundle.
    async fn export_wallet(
        &self,
        request: &WalletExportRequest,
        stamper: &ApiKeyStamper,
    ) -> WalletResult<String>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    error: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitOtpParams<'a> {
    otp_type: OtpChannel,
    contact: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OtpAuthParams<'a> {
    otp_id: &'a str,
    otp_code: &'a str,
    organization_id: &'a str,
    target_public_key: &'a str,
    expiration_seconds: String,
    invalidate_existing: bool,
}

/// Backend RPC for passkey logins. Not one of the stock backend routes: the
/// backend must verify the assertion and issue a read-write session bundle
/// for `targetPublicKey`.
pub const PASSKEY_LOGIN_RPC: &str = "passkeyLogin";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasskeyLoginParams<'a> {
    assertion: &'a str,
    target_public_key: &'a str,
    expiration_seconds: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OAuthLoginParams<'a> {
    oidc_token: &'a str,
    provider_name: &'a str,
    target_public_key: &'a str,
    expiration_seconds: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActivityRequest<'a, P: Serialize> {
    #[serde(rename = "type")]
    activity_type: &'a str,
    timestamp_ms: String,
    organization_id: &'a str,
    parameters: P,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportWalletParams<'a> {
    wallet_id: &'a str,
    target_public_key: &'a str,
}

#[derive(Deserialize)]
struct ActivityResponse {
    activity: Activity,
}

#[derive(Deserialize)]
struct Activity {
    #[serde(default)]
    result: Option<ActivityResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityResult {
    #[serde(default)]
    export_wallet_result: Option<ExportWalletResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportWalletResult {
    export_bundle: String,
}

/// JSON-RPC client for the application's authentication endpoint.
///
/// Stamped activities such as wallet export go straight to the wallet API at
/// `api_base_url`.
#[derive(Debug, Clone)]
pub struct RpcAuthClient {
    client: Client,
    endpoint: String,
    api_base_url: Option<String>,
}

impl RpcAuthClient {
    pub fn new(endpoint: impl Into<String>) -> WalletResult<Self> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(WalletError::ValidationError(format!(
                "Authentication endpoint must be an http(s) URL: {endpoint}"
            )));
        }

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_base_url: None,
        })
    }

    pub fn with_api_base_url(mut self, api_base_url: impl Into<String>) -> WalletResult<Self> {
        let api_base_url = api_base_url.into();
        if !(api_base_url.starts_with("https://") || api_base_url.starts_with("http://")) {
            return Err(WalletError::ValidationError(format!(
                "API base URL must be an http(s) URL: {api_base_url}"
            )));
        }
        self.api_base_url = Some(api_base_url.trim_end_matches('/').to_string());
        Ok(self)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn rpc_call<P, T>(&self, method: &str, params: P) -> WalletResult<T>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let request_id = Uuid::new_v4();
        log::debug!("auth rpc {} ({})", method, request_id);

        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Request-Id", request_id.to_string())
            .json(&RpcRequest { method, params })
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;

        read_response(method, response).await
    }

    /// POST a stamped activity to the wallet API.
    async fn submit_activity<P, T>(
        &self,
        path: &str,
        activity: &ActivityRequest<'_, P>,
        stamper: &ApiKeyStamper,
    ) -> WalletResult<T>
    where
        P: Serialize + Sync,
        T: DeserializeOwned,
    {
        let base = self.api_base_url.as_deref().ok_or_else(|| {
            WalletError::ValidationError("API base URL is not configured".to_string())
        })?;
        let body = serde_json::to_vec(activity)?;
        let (stamp_header, stamp) = stamper.stamp_header(&body)?;
        log::debug!("wallet api {} ({})", activity.activity_type, path);

        let response = self
            .client
            .post(format!("{base}{path}"))
            .header("Content-Type", "application/json")
            .header("X-Request-Id", Uuid::new_v4().to_string())
            .header(stamp_header, stamp)
            .body(body)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;

        read_response(activity.activity_type, response).await
    }
}

async fn read_response<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> WalletResult<T> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| WalletError::NetworkError(format!("Failed to read response: {}", e)))?;

    if !status.is_success() {
        return Err(status_error(method, status, &body));
    }

    serde_json::from_slice(&body).map_err(|e| {
        WalletError::InvalidResponse(format!("Unexpected {} response: {}", method, e))
    })
}

fn export_bundle_from(response: ActivityResponse) -> WalletResult<String> {
    response
        .activity
        .result
        .and_then(|result| result.export_wallet_result)
        .map(|result| result.export_bundle)
        .ok_or_else(|| {
            WalletError::InvalidResponse("Export activity returned no bundle".to_string())
        })
}

fn status_error(method: &str, status: StatusCode, body: &[u8]) -> WalletError {
    let detail = serde_json::from_slice::<RpcErrorBody>(body)
        .map(|b| match b.error {
            serde_json::Value::String(message) => message,
            other => other.to_string(),
        })
        .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());

    log::warn!("auth rpc {} failed with {}: {}", method, status, detail);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WalletError::AuthenticationFailed,
        _ => WalletError::NetworkError(format!("HTTP error {}: {}", status.as_u16(), detail)),
    }
}

#[async_trait]
impl AuthenticationService for RpcAuthClient {
    async fn init_otp(&self, channel: OtpChannel, contact: &str) -> WalletResult<OtpChallenge> {
        self.rpc_call(
            "initOTPAuth",
            InitOtpParams {
                otp_type: channel,
                contact,
            },
        )
        .await
    }

    async fn login(
        &self,
        proof: &LoginProof,
        target_public_key: &str,
        expiration_seconds: u64,
    ) -> WalletResult<CredentialBundleResponse> {
        let expiration_seconds = expiration_seconds.to_string();
        match proof {
            LoginProof::Otp {
                otp_id,
                organization_id,
                otp_code,
                ..
            } => {
                self.rpc_call(
                    "otpAuth",
                    OtpAuthParams {
                        otp_id,
                        otp_code: otp_code.expose_secret(),
                        organization_id,
                        target_public_key,
                        expiration_seconds,
                        invalidate_existing: false,
                    },
                )
                .await
            }
            LoginProof::Passkey { assertion } => {
                self.rpc_call(
                    PASSKEY_LOGIN_RPC,
                    PasskeyLoginParams {
                        assertion,
                        target_public_key,
                        expiration_seconds,
                    },
                )
                .await
            }
            LoginProof::OAuth {
                provider_name,
                oidc_token,
            } => {
                self.rpc_call(
                    "oAuthLogin",
                    OAuthLoginParams {
                        oidc_token: oidc_token.expose_secret(),
                        provider_name,
                        target_public_key,
                        expiration_seconds,
                    },
                )
                .await
            }
        }
    }

    async fn export_wallet(
        &self,
        request: &WalletExportRequest,
        stamper: &ApiKeyStamper,
    ) -> WalletResult<String> {
        let activity = ActivityRequest {
            activity_type: EXPORT_WALLET_ACTIVITY,
            timestamp_ms: Utc::now().timestamp_millis().to_string(),
            organization_id: &request.organization_id,
            parameters: ExportWalletParams {
                wallet_id: &request.wallet_id,
                target_public_key: &request.target_public_key,
            },
        };
        let response = self
            .submit_activity(EXPORT_WALLET_PATH, &activity, stamper)
            .await?;
        export_bundle_from(response)
    }
}
