use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::info;

use crate::config::{ServiceAccount, SheetsSettings};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const BODY_PREVIEW_LIMIT: usize = 500;

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

#[derive(Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Client for the Google Sheets v4 values API, authenticated as a service
/// account through the OAuth JWT bearer grant.
#[derive(Clone)]
pub struct GoogleSheetsClient {
    http: Client,
    spreadsheet_id: String,
    account: ServiceAccount,
    encoding_key: EncodingKey,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl GoogleSheetsClient {
    pub fn new(settings: &SheetsSettings, account: ServiceAccount) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;

        Ok(Self {
            http: Client::new(),
            spreadsheet_id: settings.spreadsheet_id.clone(),
            account,
            encoding_key,
            token: Arc::new(Mutex::new(None)),
        })
    }

    pub async fn read_rows(&self, worksheet: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(&quote_worksheet(worksheet))?;
        let token = self.access_token().await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("failed to reach Sheets API reading `{worksheet}`"))?;
        let body: ValueRangeResponse = parse_success(response)
            .await
            .with_context(|| format!("failed to read worksheet `{worksheet}`"))?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_to_string).collect())
            .collect())
    }

    pub async fn append_row(&self, worksheet: &str, row: Vec<String>) -> Result<()> {
        let range = format!("{}!A1", quote_worksheet(worksheet));
        let mut url = self.values_url(&format!("{range}:append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let token = self.access_token().await?;

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "majorDimension": "ROWS", "values": [row] }))
            .send()
            .await
            .with_context(|| format!("failed to reach Sheets API appending to `{worksheet}`"))?;
        parse_success::<Value>(response)
            .await
            .with_context(|| format!("failed to append to worksheet `{worksheet}`"))?;

        Ok(())
    }

    pub async fn update_row(&self, worksheet: &str, row_number: usize, row: Vec<String>) -> Result<()> {
        if row_number == 0 {
            bail!("sheet rows are numbered from 1");
        }
        let range = format!("{}!A{row_number}", quote_worksheet(worksheet));
        let mut url = self.values_url(&range)?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let token = self.access_token().await?;

        let response = self
            .http
            .put(url)
            .bearer_auth(token)
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": [row] }))
            .send()
            .await
            .with_context(|| format!("failed to reach Sheets API updating `{worksheet}`"))?;
        parse_success::<Value>(response)
            .await
            .with_context(|| format!("failed to update row {row_number} of `{worksheet}`"))?;

        Ok(())
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        let mut url = Url::parse(SHEETS_API_BASE).context("invalid Sheets API base URL")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Sheets API base URL cannot carry a path"))?
            .push(&self.spreadsheet_id)
            .push("values")
            .push(range);
        Ok(url)
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        let now = Utc::now();

        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) {
                return Ok(cached.value.clone());
            }
        }

        let claims = AssertionClaims {
            iss: &self.account.client_email,
            scope: SPREADSHEETS_SCOPE,
            aud: &self.account.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
                .context("failed to sign service account assertion")?;

        let response = self
            .http
            .post(&self.account.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("failed to reach OAuth token endpoint")?;
        let token: TokenResponse = parse_success(response)
            .await
            .context("OAuth token exchange failed")?;

        info!(
            account = %self.account.client_email,
            expires_in = token.expires_in,
            "obtained Sheets API access token"
        );

        let value = token.access_token.clone();
        *guard = Some(CachedToken {
            value: token.access_token,
            expires_at: now + ChronoDuration::seconds(token.expires_in),
        });

        Ok(value)
    }
}

async fn parse_success<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response
        .text()
        .await
        .context("failed to read response body")?;

    if !status.is_success() {
        bail!("remote returned {status}: {}", preview(&text));
    }

    serde_json::from_str(&text)
        .with_context(|| format!("unexpected response body: {}", preview(&text)))
}

fn preview(text: &str) -> String {
    if text.len() > BODY_PREVIEW_LIMIT {
        let mut end = BODY_PREVIEW_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}

/// Worksheet titles are always quoted so names with spaces resolve in A1 notation.
fn quote_worksheet(worksheet: &str) -> String {
    format!("'{}'", worksheet.replace('\'', "''"))
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}
