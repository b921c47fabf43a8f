//! Google Sheets mirror.
//!
//! Authenticates as a service account: an RS256-signed assertion is exchanged
//! for a short-lived access token at the credential's `token_uri`, and the
//! token is used for a single `values:append` call. Nothing is cached between
//! records.
//!
//! See: https://developers.google.com/identity/protocols/oauth2/service-account

use super::{Mirror, MirrorError};
use crate::models::feedback::FeedbackRecord;
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
pub const DEFAULT_SHEET_RANGE: &str = "Sheet1!A:G";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;

#[derive(Clone)]
pub struct SheetsConfig {
    /// Raw service-account JSON.
    pub service_account: Option<SecretString>,
    pub sheet_id: Option<String>,
    pub range: String,
    /// Used when the credential carries no `token_uri`.
    pub token_uri: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            service_account: None,
            sheet_id: None,
            range: DEFAULT_SHEET_RANGE.to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
            api_base: DEFAULT_SHEETS_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Serialize)]
struct AppendRequest {
    values: Vec<Vec<String>>,
}

pub struct GoogleSheetsMirror {
    config: SheetsConfig,
    api_base: reqwest::Url,
    http_client: reqwest::Client,
}

impl GoogleSheetsMirror {
    /// # Errors
    ///
    /// Returns an error if `api_base` is not a usable base URL or the HTTP
    /// client cannot be initialized.
    pub fn new(config: SheetsConfig) -> Result<Self, MirrorError> {
        let api_base = reqwest::Url::parse(&config.api_base)
            .map_err(|e| MirrorError::Config(format!("invalid sheets api base {:?}: {e}", config.api_base)))?;
        if api_base.cannot_be_a_base() {
            return Err(MirrorError::Config(format!(
                "sheets api base {:?} cannot carry a path",
                config.api_base
            )));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            config,
            api_base,
            http_client,
        })
    }

    /// True when both the credential and the sheet id are present.
    pub fn is_configured(&self) -> bool {
        self.config.service_account.is_some() && self.config.sheet_id.is_some()
    }

    fn parse_key(&self, raw: &SecretString) -> Result<ServiceAccountKey, MirrorError> {
        let key: ServiceAccountKey = serde_json::from_str(raw.expose_secret())
            .map_err(|e| MirrorError::Credential(e.to_string()))?;

        if key.client_email.trim().is_empty() {
            return Err(MirrorError::Credential("client_email must not be empty".to_string()));
        }
        if key.private_key.trim().is_empty() {
            return Err(MirrorError::Credential("private_key must not be empty".to_string()));
        }

        Ok(key)
    }

    fn sign_assertion(&self, key: &ServiceAccountKey, token_uri: &str) -> Result<String, MirrorError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();

        let claims = Claims {
            iss: &key.client_email,
            scope: SHEETS_SCOPE,
            aud: token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;

        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::RS256),
            &claims,
            &encoding_key,
        )?)
    }

    async fn fetch_access_token(&self, key: &ServiceAccountKey) -> Result<SecretString, MirrorError> {
        let token_uri = key.token_uri.as_deref().unwrap_or(&self.config.token_uri);
        let assertion = self.sign_assertion(key, token_uri)?;

        let response = self
            .http_client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read token response body".to_string());
            return Err(MirrorError::Status {
                endpoint: "token",
                status: status.as_u16(),
                message,
            });
        }

        let payload: AccessTokenResponse = response.json().await?;
        Ok(SecretString::from(payload.access_token))
    }

    fn append_url(&self, sheet_id: &str) -> Result<reqwest::Url, MirrorError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| MirrorError::Config("sheets api base cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", sheet_id, "values"])
            .push(&format!("{}:append", self.config.range));
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        Ok(url)
    }
}

#[async_trait]
impl Mirror for GoogleSheetsMirror {
    async fn try_mirror(&self, record: &FeedbackRecord) -> Result<(), MirrorError> {
        let raw_key = self
            .config
            .service_account
            .as_ref()
            .ok_or(MirrorError::MissingConfig("GOOGLE_SERVICE_ACCOUNT"))?;
        let sheet_id = self
            .config
            .sheet_id
            .as_deref()
            .ok_or(MirrorError::MissingConfig("GOOGLE_SHEET_ID"))?;

        let key = self.parse_key(raw_key)?;
        log::debug!("Mirroring feedback {} as {}", record.id, key.client_email);

        let token = self.fetch_access_token(&key).await?;
        let url = self.append_url(sheet_id)?;

        let response = self
            .http_client
            .post(url)
            .bearer_auth(token.expose_secret())
            .json(&AppendRequest {
                values: vec![record.sheet_row()],
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read append response body".to_string());
            return Err(MirrorError::Status {
                endpoint: "values.append",
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "google-sheets"
    }
}
