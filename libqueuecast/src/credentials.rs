//! Platform credentials
//!
//! Secrets are read once from a [`CredentialSource`] and held as
//! [`SecretString`] so they never show up in `Debug` output or logs.
//!
//! The Graph page token is the only credential that changes at runtime: it is
//! stored in a [`SharedToken`], a mutex-guarded cell with a generation
//! counter. Adapters take a [`TokenSnapshot`] before each call; the
//! auth-retry refresh swaps the value only if the generation still matches
//! what the failing call used, so concurrent refreshes collapse into one.

use std::collections::HashMap;
use std::future::Future;

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use crate::error::{PlatformError, Result};

/// Environment variable names for every secret Queuecast reads
pub mod env {
    pub const FB_APP_SECRET: &str = "FB_APP_SECRET";
    pub const FB_LONG_LIVED_USER_TOKEN: &str = "FB_LONG_LIVED_USER_TOKEN";
    pub const FB_PAGE_TOKEN: &str = "FB_PAGE_TOKEN";
    pub const IG_PAGE_TOKEN: &str = "IG_PAGE_TOKEN";
    pub const X_API_KEY: &str = "X_API_KEY";
    pub const X_API_SECRET: &str = "X_API_SECRET";
    pub const X_ACCESS_TOKEN: &str = "X_ACCESS_TOKEN";
    pub const X_ACCESS_TOKEN_SECRET: &str = "X_ACCESS_TOKEN_SECRET";
}

/// Where secret values come from
pub trait CredentialSource: Send + Sync {
    /// Look up a secret by name; empty values count as absent
    fn get(&self, name: &str) -> Option<SecretString>;
}

/// Reads secrets from process environment variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn get(&self, name: &str) -> Option<SecretString> {
        std::env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
    }
}

/// In-memory source, mostly for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct MapCredentialSource {
    values: HashMap<String, String>,
}

impl MapCredentialSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.values.insert(name.to_string(), value.to_string());
        self
    }
}

impl CredentialSource for MapCredentialSource {
    fn get(&self, name: &str) -> Option<SecretString> {
        self.values
            .get(name)
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.clone()))
    }
}

/// All secrets Queuecast may need; which ones are required depends on the
/// enabled platforms
#[derive(Debug, Default)]
pub struct Credentials {
    pub fb_app_secret: Option<SecretString>,
    pub fb_user_token: Option<SecretString>,
    pub fb_page_token: Option<SecretString>,
    pub ig_page_token: Option<SecretString>,
    pub x_api_key: Option<SecretString>,
    pub x_api_secret: Option<SecretString>,
    pub x_access_token: Option<SecretString>,
    pub x_access_token_secret: Option<SecretString>,
}

impl Credentials {
    pub fn load(source: &dyn CredentialSource) -> Self {
        Self {
            fb_app_secret: source.get(env::FB_APP_SECRET),
            fb_user_token: source.get(env::FB_LONG_LIVED_USER_TOKEN),
            fb_page_token: source.get(env::FB_PAGE_TOKEN),
            ig_page_token: source.get(env::IG_PAGE_TOKEN),
            x_api_key: source.get(env::X_API_KEY),
            x_api_secret: source.get(env::X_API_SECRET),
            x_access_token: source.get(env::X_ACCESS_TOKEN),
            x_access_token_secret: source.get(env::X_ACCESS_TOKEN_SECRET),
        }
    }

    /// OAuth 1.0a user-context credentials for X
    pub fn x(&self) -> Result<XCredentials> {
        Ok(XCredentials {
            consumer_key: require(&self.x_api_key, env::X_API_KEY)?,
            consumer_secret: require(&self.x_api_secret, env::X_API_SECRET)?,
            access_token: require(&self.x_access_token, env::X_ACCESS_TOKEN)?,
            access_token_secret: require(&self.x_access_token_secret, env::X_ACCESS_TOKEN_SECRET)?,
        })
    }
}

fn require(value: &Option<SecretString>, name: &str) -> Result<SecretString> {
    value
        .as_ref()
        .map(copy_secret)
        .ok_or_else(|| PlatformError::Configuration(format!("{} is not set", name)).into())
}

/// Duplicate a secret without exposing it anywhere but the new box
pub fn copy_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_string())
}

#[derive(Debug)]
pub struct XCredentials {
    pub consumer_key: SecretString,
    pub consumer_secret: SecretString,
    pub access_token: SecretString,
    pub access_token_secret: SecretString,
}

/// Token value as seen by one call, plus the generation it was read at
#[derive(Debug)]
pub struct TokenSnapshot {
    token: SecretString,
    pub generation: u64,
}

impl TokenSnapshot {
    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

#[derive(Debug)]
struct TokenCell {
    value: SecretString,
    generation: u64,
}

/// Mutable access token shared by every adapter that uses it
#[derive(Debug)]
pub struct SharedToken {
    cell: Mutex<TokenCell>,
}

impl SharedToken {
    pub fn new(value: SecretString) -> Self {
        Self {
            cell: Mutex::new(TokenCell {
                value,
                generation: 0,
            }),
        }
    }

    pub async fn snapshot(&self) -> TokenSnapshot {
        let cell = self.cell.lock().await;
        TokenSnapshot {
            token: copy_secret(&cell.value),
            generation: cell.generation,
        }
    }

    /// Replace the token using `refresh`, unless it already changed since
    /// generation `observed`; in that case return the current value without
    /// calling `refresh`.
    ///
    /// The lock is held across `refresh`, so concurrent callers that observed
    /// the same stale generation wait and then reuse the first result.
    pub async fn refresh_from<F, Fut>(&self, observed: u64, refresh: F) -> Result<TokenSnapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SecretString>>,
    {
        let mut cell = self.cell.lock().await;
        if cell.generation == observed {
            cell.value = refresh().await?;
            cell.generation += 1;
        } else {
            tracing::debug!(
                "Token already refreshed (generation {} -> {}), reusing",
                observed,
                cell.generation
            );
        }
        Ok(TokenSnapshot {
            token: copy_secret(&cell.value),
            generation: cell.generation,
        })
    }
}
