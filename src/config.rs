use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

const DEFAULT_SECRETS_PATH: &str = "secrets.toml";
const DEFAULT_FUEL_WORKSHEET: &str = "Fuel";
const DEFAULT_REFRIGERANT_WORKSHEET: &str = "Refrigerant";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Upper bound on `cookie.expiry_days`, ten years.
pub const MAX_COOKIE_EXPIRY_DAYS: f64 = 3650.0;

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("failed to read secrets file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("secrets file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("secrets are missing the `{0}` section")]
    MissingKey(&'static str),

    #[error("credentials are malformed: {0}")]
    MalformedCredentials(String),

    #[error("cookie settings are invalid: {0}")]
    InvalidCookie(String),

    #[error("`{section}` section is invalid: {reason}")]
    InvalidSection {
        section: &'static str,
        reason: String,
    },
}

/// A single provisioned account, keyed by username in [`Credentials`].
#[derive(Clone, Debug, Deserialize)]
pub struct CredentialRecord {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Argon2 PHC string.
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl CredentialRecord {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|role| role.eq_ignore_ascii_case("admin"))
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Credentials {
    pub usernames: BTreeMap<String, CredentialRecord>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CookieSettings {
    pub name: String,
    pub key: String,
    pub expiry_days: f64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SheetsSettings {
    pub spreadsheet_id: String,
    #[serde(default = "default_fuel_worksheet")]
    pub fuel_worksheet: String,
    #[serde(default = "default_refrigerant_worksheet")]
    pub refrigerant_worksheet: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// Everything the portal reads from the secret store.
#[derive(Clone, Debug)]
pub struct Secrets {
    pub credentials: Credentials,
    pub cookie: CookieSettings,
    pub sheets: Option<SheetsSettings>,
    pub service_account: Option<ServiceAccount>,
}

impl Secrets {
    pub fn from_toml_str(raw: &str) -> Result<Self, SecretsError> {
        let parsed: toml::Table = toml::from_str(raw)?;
        Self::from_normalized(normalize(toml::Value::Table(parsed)))
    }

    fn from_normalized(mut root: Value) -> Result<Self, SecretsError> {
        let credentials_value = take_section(&mut root, "credentials")
            .ok_or(SecretsError::MissingKey("credentials"))?;
        let credentials: Credentials = serde_json::from_value(credentials_value)
            .map_err(|err| SecretsError::MalformedCredentials(err.to_string()))?;
        if credentials.usernames.is_empty() {
            return Err(SecretsError::MalformedCredentials(
                "no usernames are provisioned".to_string(),
            ));
        }
        let mut seen: BTreeMap<String, &str> = BTreeMap::new();
        for (username, record) in &credentials.usernames {
            if username.trim().is_empty() || record.password.trim().is_empty() {
                return Err(SecretsError::MalformedCredentials(format!(
                    "account `{username}` needs a username and a password hash"
                )));
            }
            // Logins match usernames trimmed and case-insensitively.
            if let Some(existing) = seen.insert(username.trim().to_lowercase(), username) {
                return Err(SecretsError::MalformedCredentials(format!(
                    "accounts `{existing}` and `{username}` differ only by case or whitespace"
                )));
            }
        }

        let cookie_value =
            take_section(&mut root, "cookie").ok_or(SecretsError::MissingKey("cookie"))?;
        let cookie: CookieSettings = serde_json::from_value(cookie_value)
            .map_err(|err| SecretsError::InvalidCookie(err.to_string()))?;
        if cookie.name.trim().is_empty() {
            return Err(SecretsError::InvalidCookie("name is empty".to_string()));
        }
        if cookie.key.is_empty() {
            return Err(SecretsError::InvalidCookie("key is empty".to_string()));
        }
        if !cookie.expiry_days.is_finite() || cookie.expiry_days <= 0.0 {
            return Err(SecretsError::InvalidCookie(
                "expiry_days must be a positive number".to_string(),
            ));
        }
        if cookie.expiry_days > MAX_COOKIE_EXPIRY_DAYS {
            return Err(SecretsError::InvalidCookie(format!(
                "expiry_days must be at most {MAX_COOKIE_EXPIRY_DAYS}"
            )));
        }

        let sheets = optional_section::<SheetsSettings>(&mut root, "sheets")?;
        let service_account = optional_section::<ServiceAccount>(&mut root, "gcp_service_account")?;

        Ok(Self {
            credentials,
            cookie,
            sheets,
            service_account,
        })
    }
}

/// Resolve the secrets path from `SECRETS_PATH`, falling back to `secrets.toml`.
pub fn secrets_path_from_env() -> PathBuf {
    env::var("SECRETS_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SECRETS_PATH))
}

pub fn load_secrets(path: &Path) -> Result<Secrets, SecretsError> {
    let raw = fs::read_to_string(path).map_err(|source| SecretsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let secrets = Secrets::from_toml_str(&raw)?;
    info!(
        path = %path.display(),
        accounts = secrets.credentials.usernames.len(),
        "loaded secrets"
    );
    Ok(secrets)
}

/// Recursively converts a TOML tree into plain JSON mappings.
pub fn normalize(value: toml::Value) -> Value {
    match value {
        toml::Value::String(text) => Value::String(text),
        toml::Value::Integer(number) => Value::from(number),
        toml::Value::Float(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(flag) => Value::Bool(flag),
        toml::Value::Datetime(datetime) => Value::String(datetime.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(key, value)| (key, normalize(value)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

fn take_section(root: &mut Value, key: &str) -> Option<Value> {
    root.as_object_mut()?.remove(key)
}

fn optional_section<T: DeserializeOwned>(
    root: &mut Value,
    section: &'static str,
) -> Result<Option<T>, SecretsError> {
    take_section(root, section)
        .map(|value| {
            serde_json::from_value(value).map_err(|err| SecretsError::InvalidSection {
                section,
                reason: err.to_string(),
            })
        })
        .transpose()
}

fn default_fuel_worksheet() -> String {
    DEFAULT_FUEL_WORKSHEET.to_string()
}

fn default_refrigerant_worksheet() -> String {
    DEFAULT_REFRIGERANT_WORKSHEET.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[credentials.usernames.jdoe]
name = "Jane Doe"
email = "jdoe@example.edu"
password = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA"
roles = ["admin"]

[credentials.usernames.rsmith]
name = "Robin Smith"
password = "$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaA"

[cookie]
name = "ghg_portal_auth"
key = "a-signing-key"
expiry_days = 30

[sheets]
spreadsheet_id = "sheet-123"
"#;

    #[test]
    fn normalize_flattens_nested_tables_into_plain_maps() {
        let parsed: toml::Table = toml::from_str(
            r#"
[outer.inner]
count = 3
ratio = 0.5
tags = ["a", "b"]
when = 2024-01-02
"#,
        )
        .unwrap();

        let normalized = normalize(toml::Value::Table(parsed));
        assert_eq!(
            normalized,
            json!({
                "outer": {
                    "inner": {
                        "count": 3,
                        "ratio": 0.5,
                        "tags": ["a", "b"],
                        "when": "2024-01-02"
                    }
                }
            })
        );
    }

    #[test]
    fn parses_sample_secrets_with_defaults() {
        let secrets = Secrets::from_toml_str(SAMPLE).unwrap();

        assert_eq!(secrets.credentials.usernames.len(), 2);
        let jdoe = &secrets.credentials.usernames["jdoe"];
        assert_eq!(jdoe.name, "Jane Doe");
        assert!(jdoe.is_admin());
        assert!(!secrets.credentials.usernames["rsmith"].is_admin());

        assert_eq!(secrets.cookie.name, "ghg_portal_auth");
        assert_eq!(secrets.cookie.expiry_days, 30.0);

        let sheets = secrets.sheets.unwrap();
        assert_eq!(sheets.spreadsheet_id, "sheet-123");
        assert_eq!(sheets.fuel_worksheet, "Fuel");
        assert_eq!(sheets.refrigerant_worksheet, "Refrigerant");
        assert!(secrets.service_account.is_none());
    }

    #[test]
    fn missing_password_is_malformed_credentials() {
        let raw = r#"
[credentials.usernames.jdoe]
name = "Jane Doe"

[cookie]
name = "c"
key = "k"
expiry_days = 1
"#;
        let err = Secrets::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, SecretsError::MalformedCredentials(_)));
    }

    #[test]
    fn rejects_non_positive_expiry() {
        let raw = SAMPLE.replace("expiry_days = 30", "expiry_days = 0");
        let err = Secrets::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, SecretsError::InvalidCookie(_)));
    }

    #[test]
    fn rejects_expiry_beyond_ten_years() {
        for value in ["3651", "1e20"] {
            let raw = SAMPLE.replace("expiry_days = 30", &format!("expiry_days = {value}"));
            let err = Secrets::from_toml_str(&raw).unwrap_err();
            assert!(matches!(err, SecretsError::InvalidCookie(_)), "{value}");
        }

        let raw = SAMPLE.replace("expiry_days = 30", "expiry_days = 3650");
        assert_eq!(Secrets::from_toml_str(&raw).unwrap().cookie.expiry_days, 3650.0);
    }

    #[test]
    fn usernames_differing_only_by_case_are_malformed() {
        let raw = SAMPLE.replace("[credentials.usernames.rsmith]", "[credentials.usernames.JDoe]");
        let err = Secrets::from_toml_str(&raw).unwrap_err();
        match err {
            SecretsError::MalformedCredentials(message) => {
                assert!(message.contains("JDoe"));
                assert!(message.contains("jdoe"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let raw = SAMPLE.replace("[credentials.usernames.rsmith]", "[credentials.usernames.\" jdoe \"]");
        assert!(matches!(
            Secrets::from_toml_str(&raw).unwrap_err(),
            SecretsError::MalformedCredentials(_)
        ));
    }

    #[test]
    fn missing_cookie_section_is_reported() {
        let raw = SAMPLE.split("[cookie]").next().unwrap();
        let err = Secrets::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, SecretsError::MissingKey("cookie")));
    }

    #[test]
    fn load_secrets_reads_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let secrets = load_secrets(&path).unwrap();
        assert!(secrets.credentials.usernames.contains_key("rsmith"));

        let missing = load_secrets(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, SecretsError::Read { .. }));
    }
}
