//! OAuth 2.0 access tokens obtained with a signed JWT assertion.
//!
//! NetSuite's machine-to-machine flow and Google's service-account flow both
//! exchange a short-lived signed JWT for a bearer token. The provider keeps the
//! token until shortly before it expires and refreshes it on demand; concurrent
//! callers wait on a single refresh.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    config::{NetSuiteAccountConfig, SheetsConfig},
    http::{ensure_success, IntegrationError},
};

pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const GOOGLE_SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
const DEFAULT_EXPIRES_IN: i64 = 3600;
const EXPIRY_MARGIN_SECONDS: i64 = 60;

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, IntegrationError>;

    /// Forget any cached token so the next call fetches a new one.
    fn invalidate(&self) {}
}

/// A token issued elsewhere.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, IntegrationError> {
        Ok(self.0.clone())
    }
}

/// How the signed assertion is presented to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionGrant {
    /// `client_credentials` with a `client_assertion` (NetSuite).
    ClientCredentials,
    /// RFC 7523 `jwt-bearer` grant with an `assertion` (Google).
    JwtBearer,
}

#[derive(Debug, Serialize, Deserialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: i64,
    exp: i64,
}

pub struct AssertionSigner {
    issuer: String,
    scope: String,
    audience: String,
    key_id: Option<String>,
    algorithm: Algorithm,
    key: EncodingKey,
}

impl AssertionSigner {
    pub fn from_pem(
        issuer: impl Into<String>,
        scope: impl Into<String>,
        audience: impl Into<String>,
        key_id: Option<String>,
        algorithm: &str,
        pem: &[u8],
    ) -> Result<Self, IntegrationError> {
        let algorithm = Algorithm::from_str(algorithm.trim())
            .map_err(|_| IntegrationError::Config(format!("unsupported algorithm {algorithm}")))?;
        let key = match algorithm {
            Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem)?,
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem)?,
            other => {
                return Err(IntegrationError::Config(format!(
                    "{other:?} cannot sign an assertion with a private key"
                )))
            }
        };
        Ok(Self {
            issuer: issuer.into(),
            scope: scope.into(),
            audience: audience.into(),
            key_id,
            algorithm,
            key,
        })
    }

    pub fn sign(&self, now: DateTime<Utc>) -> Result<String, IntegrationError> {
        let mut header = Header::new(self.algorithm);
        header.kid = self.key_id.clone();
        let claims = AssertionClaims {
            iss: self.issuer.clone(),
            scope: self.scope.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECONDS,
        };
        Ok(encode(&header, &claims, &self.key)?)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct OAuthTokenProvider {
    service: &'static str,
    http: Client,
    token_url: String,
    grant: AssertionGrant,
    signer: AssertionSigner,
    cache: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl OAuthTokenProvider {
    pub fn new(
        service: &'static str,
        http: Client,
        token_url: impl Into<String>,
        grant: AssertionGrant,
        signer: AssertionSigner,
    ) -> Self {
        Self {
            service,
            http,
            token_url: token_url.into(),
            grant,
            signer,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    pub fn for_netsuite(
        http: Client,
        account: &NetSuiteAccountConfig,
    ) -> Result<Self, IntegrationError> {
        let pem = account
            .key_source()
            .read()
            .map_err(|err| IntegrationError::Config(format!("netsuite private key: {err}")))?;
        let token_url = account.token_url();
        let signer = AssertionSigner::from_pem(
            &account.client_id,
            &account.scope,
            &token_url,
            Some(account.certificate_id.clone()),
            &account.algorithm,
            &pem,
        )?;
        Ok(Self::new(
            "netsuite",
            http,
            token_url,
            AssertionGrant::ClientCredentials,
            signer,
        ))
    }

    pub fn for_google(http: Client, sheets: &SheetsConfig) -> Result<Self, IntegrationError> {
        let pem = sheets
            .key_source()
            .read()
            .map_err(|err| IntegrationError::Config(format!("google private key: {err}")))?;
        let signer = AssertionSigner::from_pem(
            &sheets.service_account_email,
            GOOGLE_SHEETS_SCOPE,
            &sheets.token_url,
            None,
            "RS256",
            &pem,
        )?;
        Ok(Self::new(
            "google",
            http,
            sheets.token_url.clone(),
            AssertionGrant::JwtBearer,
            signer,
        ))
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<String> {
        self.cache
            .read()
            .as_ref()
            .filter(|token| token.expires_at > now)
            .map(|token| token.value.clone())
    }

    async fn request_token(&self) -> Result<CachedToken, IntegrationError> {
        let now = Utc::now();
        let assertion = self.signer.sign(now)?;
        let form: Vec<(&str, &str)> = match self.grant {
            AssertionGrant::ClientCredentials => vec![
                ("grant_type", "client_credentials"),
                ("client_assertion_type", CLIENT_ASSERTION_TYPE),
                ("client_assertion", assertion.as_str()),
            ],
            AssertionGrant::JwtBearer => vec![
                ("grant_type", JWT_BEARER_GRANT),
                ("assertion", assertion.as_str()),
            ],
        };

        let response = self.http.post(&self.token_url).form(&form).send().await?;
        let response = ensure_success(self.service, response).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|err| IntegrationError::Decode(err.to_string()))?;

        let Some(value) = body.access_token.filter(|token| !token.is_empty()) else {
            let reason = body
                .error_description
                .or(body.error)
                .unwrap_or_else(|| "no access_token in response".to_string());
            return Err(IntegrationError::Token(reason));
        };
        let expires_in = body
            .expires_in
            .as_ref()
            .and_then(|value| match value {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .unwrap_or(DEFAULT_EXPIRES_IN);

        Ok(CachedToken {
            value,
            expires_at: now + Duration::seconds(expires_in - EXPIRY_MARGIN_SECONDS),
        })
    }
}

#[async_trait]
impl AccessTokenSource for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String, IntegrationError> {
        if let Some(token) = self.cached(Utc::now()) {
            return Ok(token);
        }

        let _guard = self.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached(Utc::now()) {
            return Ok(token);
        }

        debug!(service = self.service, "requesting access token");
        let token = self.request_token().await?;
        info!(
            service = self.service,
            expires_at = %token.expires_at,
            "access token refreshed"
        );
        let value = token.value.clone();
        *self.cache.write() = Some(token);
        Ok(value)
    }

    fn invalidate(&self) {
        self.cache.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};

    const EC_KEY: &str = include_str!("../../tests/fixtures/netsuite_test_key.pem");
    const EC_PUB: &str = include_str!("../../tests/fixtures/netsuite_test_key.pub.pem");
    const RSA_KEY: &str = include_str!("../../tests/fixtures/google_test_key.pem");
    const RSA_PUB: &str = include_str!("../../tests/fixtures/google_test_key.pub.pem");

    #[test]
    fn signs_netsuite_assertion_with_kid() {
        let signer = AssertionSigner::from_pem(
            "client-123",
            "rest_webservices",
            "https://example/token",
            Some("cert-9".into()),
            "ES256",
            EC_KEY.as_bytes(),
        )
        .unwrap();
        let now = Utc::now();

        let token = signer.sign(now).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some("cert-9"));
        assert_eq!(header.alg, Algorithm::ES256);
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&["https://example/token"]);
        let data = decode::<AssertionClaims>(
            &token,
            &DecodingKey::from_ec_pem(EC_PUB.as_bytes()).unwrap(),
            &validation,
        )
        .unwrap();
        assert_eq!(data.claims.iss, "client-123");
        assert_eq!(data.claims.scope, "rest_webservices");
        assert_eq!(data.claims.exp - data.claims.iat, ASSERTION_LIFETIME_SECONDS);
    }

    #[test]
    fn signs_rsa_assertion_without_kid() {
        let signer = AssertionSigner::from_pem(
            "svc@project.iam.gserviceaccount.com",
            GOOGLE_SHEETS_SCOPE,
            "https://oauth2.example/token",
            None,
            "RS256",
            RSA_KEY.as_bytes(),
        )
        .unwrap();

        let token = signer.sign(Utc::now()).unwrap();

        assert!(decode_header(&token).unwrap().kid.is_none());
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&["https://oauth2.example/token"]);
        assert!(decode::<AssertionClaims>(
            &token,
            &DecodingKey::from_rsa_pem(RSA_PUB.as_bytes()).unwrap(),
            &validation,
        )
        .is_ok());
    }

    #[test]
    fn rejects_symmetric_algorithms() {
        let result = AssertionSigner::from_pem("a", "b", "c", None, "HS256", b"secret");
        assert!(matches!(result, Err(IntegrationError::Config(_))));
    }
}
