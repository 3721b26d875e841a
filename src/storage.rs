//! Secret storage in the OS credential store.
//!
//! Windows Credential Manager, macOS Keychain or the Linux Secret Service,
//! via the `keyring` crate. Environment variables take precedence; see
//! [`crate::config`].

use keyring::Entry;
use tracing::{info, warn};

const SERVICE_NAME: &str = "pos-inventory-sync";

// Credential keys
pub const KEY_SUPABASE_SERVICE_ROLE_KEY: &str = "supabase_service_role_key";
pub const KEY_GOOGLE_SERVICE_ACCOUNT: &str = "google_service_account_credentials";

/// All credential keys managed by this module.
pub const ALL_KEYS: &[&str] = &[KEY_SUPABASE_SERVICE_ROLE_KEY, KEY_GOOGLE_SERVICE_ACCOUNT];

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    info!(key, "keyring: credential stored");
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

/// Map a user-facing secret name (`supabase-key`, `google-credentials`) to
/// its keyring key.
pub fn key_for_name(name: &str) -> Option<&'static str> {
    match name {
        "supabase-key" | KEY_SUPABASE_SERVICE_ROLE_KEY => Some(KEY_SUPABASE_SERVICE_ROLE_KEY),
        "google-credentials" | KEY_GOOGLE_SERVICE_ACCOUNT => Some(KEY_GOOGLE_SERVICE_ACCOUNT),
        _ => None,
    }
}

/// Remove every stored secret.
pub fn clear_all() -> Result<(), String> {
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    info!("keyring: all credentials cleared");
    Ok(())
}
