//! Credential storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the kernel keyutils store. Sign-in itself belongs to the
//! app's auth flow; this module only reads back what it stored (the bearer
//! token and the API base URL) and lets the app clear it on sign-out.

use keyring::Entry;
use tracing::{info, warn};
use zeroize::Zeroizing;

const SERVICE_NAME: &str = "the-small-delivery";

// Credential keys
pub const KEY_API_URL: &str = "api_base_url";
pub const KEY_ACCESS_TOKEN: &str = "access_token";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_API_URL, KEY_ACCESS_TOKEN];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

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

/// Delete every stored credential (sign-out).
pub fn clear_credentials() -> Result<(), String> {
    info!("clearing stored delivery credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Bearer token sources
// ---------------------------------------------------------------------------

/// Where the backend client gets its bearer token from. Read on every
/// request so a token refreshed by the auth flow is picked up immediately.
pub trait TokenSource: Send + Sync {
    fn bearer_token(&self) -> Option<Zeroizing<String>>;
}

/// Token held in memory, e.g. handed over by the embedding app.
pub struct StaticToken(Zeroizing<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }
}

impl TokenSource for StaticToken {
    fn bearer_token(&self) -> Option<Zeroizing<String>> {
        let token = self.0.trim();
        if token.is_empty() {
            None
        } else {
            Some(Zeroizing::new(token.to_string()))
        }
    }
}

/// Token read from the OS credential store.
pub struct KeyringToken;

impl TokenSource for KeyringToken {
    fn bearer_token(&self) -> Option<Zeroizing<String>> {
        get_credential(KEY_ACCESS_TOKEN)
            .map(Zeroizing::new)
            .filter(|t| !t.trim().is_empty())
    }
}
