//! Runtime configuration from environment variables.
//!
//! Secrets (`SUPABASE_SERVICE_ROLE_KEY`, `GOOGLE_SERVICE_ACCOUNT_CREDENTIALS`)
//! fall back to the OS credential store when the variable is unset.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::diagnostics;
use crate::item::KeyMatching;
use crate::storage;

pub const ENV_SUPABASE_URL: &str = "SUPABASE_URL";
pub const ENV_SUPABASE_KEY: &str = "SUPABASE_SERVICE_ROLE_KEY";
pub const ENV_GOOGLE_CREDENTIALS: &str = "GOOGLE_SERVICE_ACCOUNT_CREDENTIALS";
pub const ENV_SPREADSHEET_ID: &str = "GOOGLE_SPREADSHEET_ID";
pub const ENV_CSV_URL: &str = "ITEMS_CSV_URL";
pub const ENV_DATA_DIR: &str = "POS_SYNC_DATA_DIR";
pub const ENV_BIND: &str = "POS_SYNC_BIND";
pub const ENV_KEY_MATCHING: &str = "POS_SYNC_KEY_MATCHING";

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("Invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("Google Service Account credentials not found")]
    SheetsNotConfigured,
}

pub struct SupabaseConfig {
    pub url: String,
    pub service_key: Zeroizing<String>,
}

pub struct GoogleConfig {
    pub credentials_json: Zeroizing<String>,
    pub spreadsheet_id: String,
}

pub struct AppConfig {
    /// `None` selects the local SQLite store.
    pub supabase: Option<SupabaseConfig>,
    pub google: Option<GoogleConfig>,
    pub csv_url: Option<String>,
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    pub key_matching: KeyMatching,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("supabase_url", &self.supabase.as_ref().map(|s| &s.url))
            .field(
                "spreadsheet_id",
                &self.google.as_ref().map(|g| &g.spreadsheet_id),
            )
            .field("csv_url", &self.csv_url)
            .field("data_dir", &self.data_dir)
            .field("bind", &self.bind)
            .field("key_matching", &self.key_matching)
            .finish_non_exhaustive()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Read the process environment, using the keyring for missing secrets.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(|name| std::env::var(name).ok(), storage::get_credential)
    }

    /// Build from arbitrary lookups. `var` resolves environment names,
    /// `secret` resolves keyring keys.
    pub fn from_sources(
        var: impl Fn(&str) -> Option<String>,
        secret: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let supabase = match non_blank(var(ENV_SUPABASE_URL)) {
            Some(url) => {
                let key = non_blank(var(ENV_SUPABASE_KEY))
                    .or_else(|| non_blank(secret(storage::KEY_SUPABASE_SERVICE_ROLE_KEY)))
                    .ok_or(ConfigError::Missing(ENV_SUPABASE_KEY))?;
                Some(SupabaseConfig {
                    url,
                    service_key: Zeroizing::new(key),
                })
            }
            None => None,
        };

        let google = match non_blank(var(ENV_GOOGLE_CREDENTIALS))
            .or_else(|| non_blank(secret(storage::KEY_GOOGLE_SERVICE_ACCOUNT)))
        {
            Some(json) => Some(GoogleConfig {
                credentials_json: Zeroizing::new(json),
                spreadsheet_id: non_blank(var(ENV_SPREADSHEET_ID))
                    .ok_or(ConfigError::Missing(ENV_SPREADSHEET_ID))?,
            }),
            None => None,
        };

        let data_dir = non_blank(var(ENV_DATA_DIR))
            .map(PathBuf::from)
            .unwrap_or_else(diagnostics::default_data_dir);

        let bind_raw = non_blank(var(ENV_BIND)).unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            var: ENV_BIND,
            reason: format!("{bind_raw}: {e}"),
        })?;

        let key_matching = match non_blank(var(ENV_KEY_MATCHING)) {
            Some(raw) => raw.parse::<KeyMatching>().map_err(|reason| ConfigError::Invalid {
                var: ENV_KEY_MATCHING,
                reason,
            })?,
            None => KeyMatching::default(),
        };

        Ok(Self {
            supabase,
            google,
            csv_url: non_blank(var(ENV_CSV_URL)),
            data_dir,
            bind,
            key_matching,
        })
    }

    pub fn require_google(&self) -> Result<&GoogleConfig, ConfigError> {
        self.google.as_ref().ok_or(ConfigError::SheetsNotConfigured)
    }
}
