//! Google Sheets values API with service-account authentication.
//!
//! A signed RS256 assertion is exchanged at the account's `token_uri` for a
//! one-hour bearer token. Tokens are never cached: each sync operation asks
//! for a fresh one.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::supabase::friendly_error;

/// Sheet and columns read and written by sync.
pub const SHEET_RANGE: &str = "Form Responses 1!A:H";

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SheetsError {
    #[error("Invalid service account credentials: {0}")]
    Credentials(String),
    #[error("Failed to sign token request: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
    #[error("Failed to get access token: {0}")]
    Token(String),
    #[error("Failed to read from Google Sheets: {0}")]
    Read(String),
    #[error("Failed to write to Google Sheets: {0}")]
    Write(String),
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RawServiceAccount {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

/// The subset of a service-account key file needed to mint tokens.
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key_id: Option<String>,
    pub token_uri: String,
    private_key: Zeroizing<String>,
}

impl ServiceAccount {
    /// Parse the JSON key file content. Escaped `\n` sequences in the key
    /// (common when the JSON is stored in an env var) are unescaped.
    pub fn from_json(json: &str) -> Result<Self, SheetsError> {
        let raw: RawServiceAccount =
            serde_json::from_str(json).map_err(|e| SheetsError::Credentials(e.to_string()))?;
        if raw.client_email.trim().is_empty() {
            return Err(SheetsError::Credentials("client_email is empty".into()));
        }

        let private_key = Zeroizing::new(raw.private_key.replace("\\n", "\n"));
        drop(Zeroizing::new(raw.private_key));

        Ok(Self {
            client_email: raw.client_email,
            private_key_id: raw.private_key_id,
            token_uri: raw
                .token_uri
                .filter(|uri| !uri.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            private_key,
        })
    }

    /// Signed assertion for the token endpoint, valid for one hour from `now`.
    pub fn assertion(&self, now: i64) -> Result<String, SheetsError> {
        let claims = Claims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())?;
        Ok(encode(&header, &claims, &key)?)
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Short-lived bearer token.
pub struct AccessToken(Zeroizing<String>);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

// ---------------------------------------------------------------------------
// API seam
// ---------------------------------------------------------------------------

/// Spreadsheet operations used by sync.
#[async_trait]
pub trait SheetsApi: Send + Sync {
    async fn access_token(&self) -> Result<AccessToken, SheetsError>;

    /// All rows in `range` as text. A sheet with no values yields no rows.
    async fn read_range(
        &self,
        token: &AccessToken,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SheetsError>;

    /// Overwrite `range` starting at its first cell with `rows`.
    async fn write_range(
        &self,
        token: &AccessToken,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError>;
}

pub struct SheetsClient {
    client: Client,
    account: ServiceAccount,
    spreadsheet_id: String,
    base_url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google error bodies look like `{"error": {"message": ...}}`; the token
/// endpoint uses `{"error": "...", "error_description": "..."}`.
fn google_error(status: reqwest::StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let detail = parsed.as_ref().and_then(|json| {
        json.pointer("/error/message")
            .or_else(|| json.get("error_description"))
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
            .map(String::from)
    });
    match detail {
        Some(msg) => format!("{msg} (HTTP {})", status.as_u16()),
        None => format!("HTTP {}", status.as_u16()),
    }
}

impl SheetsClient {
    pub fn new(account: ServiceAccount, spreadsheet_id: &str) -> Result<Self, SheetsError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| SheetsError::Credentials(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            account,
            spreadsheet_id: spreadsheet_id.trim().to_string(),
            base_url: DEFAULT_SHEETS_BASE.to_string(),
        })
    }

    /// Point the values API at another host.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn values_url(&self, range: &str) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| format!("Invalid URL: {e}"))?;
        url.path_segments_mut()
            .map_err(|_| format!("Invalid URL: {}", self.base_url))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }
}

#[async_trait]
impl SheetsApi for SheetsClient {
    async fn access_token(&self) -> Result<AccessToken, SheetsError> {
        let assertion = Zeroizing::new(self.account.assertion(chrono::Utc::now().timestamp())?);
        let token_uri = &self.account.token_uri;

        let resp = self
            .client
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| SheetsError::Token(friendly_error(token_uri, &e)))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SheetsError::Token(google_error(status, &body)));
        }

        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SheetsError::Token(format!("Invalid token response: {e}")))?;
        debug!(account = %self.account.client_email, "obtained Sheets access token");
        Ok(AccessToken::new(parsed.access_token))
    }

    async fn read_range(
        &self,
        token: &AccessToken,
        range: &str,
    ) -> Result<Vec<Vec<String>>, SheetsError> {
        let url = self.values_url(range).map_err(SheetsError::Read)?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|e| SheetsError::Read(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SheetsError::Read(google_error(status, &body)));
        }

        let range: ValueRange = serde_json::from_str(&body)
            .map_err(|e| SheetsError::Read(format!("Invalid response: {e}")))?;
        let rows: Vec<Vec<String>> = range
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        debug!(rows = rows.len(), "read sheet range");
        Ok(rows)
    }

    async fn write_range(
        &self,
        token: &AccessToken,
        range: &str,
        rows: &[Vec<String>],
    ) -> Result<(), SheetsError> {
        let mut url = self.values_url(range).map_err(SheetsError::Write)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let resp = self
            .client
            .put(url)
            .bearer_auth(token.secret())
            .json(&serde_json::json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            }))
            .send()
            .await
            .map_err(|e| SheetsError::Write(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SheetsError::Write(google_error(status, &body)));
        }

        info!(rows = rows.len(), range, "wrote sheet range");
        Ok(())
    }
}
