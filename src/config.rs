//! Client configuration.
//!
//! Read from the process environment. The API URL falls back to the value the
//! sign-in flow stored in the OS keyring; without an explicit token the
//! backend client reads the keyring token on every request.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::api::{normalize_api_url, DEFAULT_TIMEOUT};
use crate::error::{DeliveryError, DeliveryResult};
use crate::logging::default_data_dir;
use crate::poller::DEFAULT_POLL_INTERVAL;
use crate::status::Role;
use crate::storage::{self, KeyringToken, StaticToken, TokenSource};

pub const ENV_API_URL: &str = "DELIVERY_API_URL";
pub const ENV_ACCESS_TOKEN: &str = "DELIVERY_ACCESS_TOKEN";
pub const ENV_ROLE: &str = "DELIVERY_ROLE";
pub const ENV_POLL_SECS: &str = "DELIVERY_POLL_SECS";
pub const ENV_TIMEOUT_SECS: &str = "DELIVERY_TIMEOUT_SECS";
pub const ENV_DATA_DIR: &str = "DELIVERY_DATA_DIR";

const MIN_POLL_SECS: u64 = 2;

#[derive(Clone)]
pub struct ClientConfig {
    pub api_url: String,
    pub role: Role,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
    access_token: Option<Zeroizing<String>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("role", &self.role)
            .field("poll_interval", &self.poll_interval)
            .field("request_timeout", &self.request_timeout)
            .field("data_dir", &self.data_dir)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> DeliveryResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), storage::get_credential)
    }

    /// Build from arbitrary lookups: `env` for settings, `keyring` for the
    /// stored API URL.
    pub fn from_lookup(
        env: impl Fn(&str) -> Option<String>,
        keyring: impl Fn(&str) -> Option<String>,
    ) -> DeliveryResult<Self> {
        let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

        let api_url = non_blank(env(ENV_API_URL))
            .or_else(|| non_blank(keyring(storage::KEY_API_URL)))
            .ok_or_else(|| {
                DeliveryError::Validation(format!(
                    "No API URL configured; set {ENV_API_URL} or sign in first"
                ))
            })?;
        if api_url.contains("://")
            && !api_url.starts_with("http://")
            && !api_url.starts_with("https://")
        {
            return Err(DeliveryError::Validation(format!(
                "API URL must use http or https, got '{api_url}'"
            )));
        }

        let role = match non_blank(env(ENV_ROLE)) {
            Some(raw) => Role::parse(&raw).ok_or_else(|| {
                DeliveryError::Validation(format!(
                    "Unknown role '{raw}'; expected customer, courier or restaurant"
                ))
            })?,
            None => Role::Customer,
        };

        let poll_interval = match non_blank(env(ENV_POLL_SECS)) {
            Some(raw) => Duration::from_secs(parse_secs(ENV_POLL_SECS, &raw)?.max(MIN_POLL_SECS)),
            None => DEFAULT_POLL_INTERVAL,
        };
        let request_timeout = match non_blank(env(ENV_TIMEOUT_SECS)) {
            Some(raw) => Duration::from_secs(parse_secs(ENV_TIMEOUT_SECS, &raw)?.max(1)),
            None => DEFAULT_TIMEOUT,
        };

        let data_dir = non_blank(env(ENV_DATA_DIR))
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            api_url: normalize_api_url(&api_url),
            role,
            poll_interval,
            request_timeout,
            data_dir,
            access_token: non_blank(env(ENV_ACCESS_TOKEN)).map(Zeroizing::new),
        })
    }

    /// Token source for the backend client: the explicit token if one was
    /// configured, else the keyring.
    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        match &self.access_token {
            Some(token) => Arc::new(StaticToken::new(token.as_str())),
            None => Arc::new(KeyringToken),
        }
    }

    pub fn has_explicit_token(&self) -> bool {
        self.access_token.is_some()
    }
}

fn parse_secs(key: &str, raw: &str) -> DeliveryResult<u64> {
    raw.parse::<u64>()
        .map_err(|_| DeliveryError::Validation(format!("{key} must be a whole number of seconds, got '{raw}'")))
}
