//! Refresh-once-and-retry handling for expired access tokens
//!
//! A call wrapped by [`AuthRetryPolicy::run`] gets one second chance: when
//! its error carries the platform's "token expired" code, the shared token is
//! refreshed and the identical call is issued again with the new value. The
//! retry's outcome is final.

use std::future::Future;

use async_trait::async_trait;
use secrecy::SecretString;
use tracing::{info, warn};

use crate::credentials::{SharedToken, TokenSnapshot};
use crate::error::{QueuecastError, Result};
use crate::platforms::graph::TOKEN_EXPIRED_CODE;

/// Obtains a fresh access token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<SecretString>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRetryPolicy {
    pub expiry_code: i64,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self {
            expiry_code: TOKEN_EXPIRED_CODE,
        }
    }
}

impl AuthRetryPolicy {
    pub fn new(expiry_code: i64) -> Self {
        Self { expiry_code }
    }

    /// Whether `error` is the auth-expiry failure this policy recovers from
    pub fn is_expired(&self, error: &QueuecastError) -> bool {
        match error {
            QueuecastError::Platform(e) => e.graph_code() == Some(self.expiry_code),
            _ => false,
        }
    }

    /// Run `call` with the current token; on auth expiry refresh once and
    /// call again.
    ///
    /// Without a refresher, or when the refresh itself fails, the original
    /// auth-expiry error is returned.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        token: &SharedToken,
        refresher: Option<&dyn TokenRefresher>,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut(TokenSnapshot) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let snapshot = token.snapshot().await;
        let observed = snapshot.generation;

        let error = match call(snapshot).await {
            Ok(value) => return Ok(value),
            Err(e) if self.is_expired(&e) => e,
            Err(e) => return Err(e),
        };

        let Some(refresher) = refresher else {
            warn!("{}: access token expired and no refresher is configured", what);
            return Err(error);
        };

        warn!("{}: access token expired, refreshing and retrying once", what);
        let fresh = match token.refresh_from(observed, || refresher.refresh()).await {
            Ok(fresh) => fresh,
            Err(refresh_error) => {
                warn!("{}: token refresh failed: {}", what, refresh_error);
                return Err(error);
            }
        };

        info!("{}: retrying with refreshed token", what);
        call(fresh).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct CountingRefresher {
        calls: AtomicU32,
        result: std::result::Result<&'static str, &'static str>,
    }

    impl CountingRefresher {
        fn ok(token: &'static str) -> Self {
            Self {
                calls: AtomicU32::new(0),
                result: Ok(token),
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicU32::new(0),
                result: Err("no such page"),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self) -> Result<SecretString> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(token) => Ok(SecretString::from(token.to_string())),
                Err(msg) => Err(PlatformError::Authentication(msg.to_string()).into()),
            }
        }
    }

    fn expired() -> QueuecastError {
        PlatformError::Api {
            status: 400,
            code: Some(190),
            message: "Error validating access token".to_string(),
        }
        .into()
    }

    fn other_api_error() -> QueuecastError {
        PlatformError::Api {
            status: 400,
            code: Some(100),
            message: "Invalid parameter".to_string(),
        }
        .into()
    }

    fn token(value: &str) -> SharedToken {
        SharedToken::new(SecretString::from(value.to_string()))
    }

    #[tokio::test]
    async fn test_success_needs_no_refresh() {
        let shared = token("good");
        let refresher = CountingRefresher::ok("fresh");
        let result = AuthRetryPolicy::default()
            .run("test", &shared, Some(&refresher), |snap| async move {
                Ok::<_, QueuecastError>(snap.expose().to_string())
            })
            .await
            .unwrap();
        assert_eq!(result, "good");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_once_and_retries_with_new_value() {
        let shared = token("stale");
        let refresher = CountingRefresher::ok("fresh");
        let seen = Mutex::new(Vec::new());

        let result = AuthRetryPolicy::default()
            .run("test", &shared, Some(&refresher), |snap| {
                let value = snap.expose().to_string();
                seen.lock().unwrap().push(value.clone());
                async move {
                    if value == "stale" {
                        Err(expired())
                    } else {
                        Ok(format!("posted with {}", value))
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "posted with fresh");
        assert_eq!(refresher.calls(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["stale", "fresh"]);
        assert_eq!(shared.snapshot().await.expose(), "fresh");
    }

    #[tokio::test]
    async fn test_second_expiry_is_not_retried_again() {
        let shared = token("stale");
        let refresher = CountingRefresher::ok("also-stale");
        let calls = AtomicU32::new(0);

        let err = AuthRetryPolicy::default()
            .run("test", &shared, Some(&refresher), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(expired()) }
            })
            .await
            .unwrap_err();

        assert!(AuthRetryPolicy::default().is_expired(&err));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn test_other_error_codes_propagate_without_refresh() {
        let shared = token("good");
        let refresher = CountingRefresher::ok("fresh");
        let calls = AtomicU32::new(0);

        let err = AuthRetryPolicy::default()
            .run("test", &shared, Some(&refresher), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(other_api_error()) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), other_api_error().to_string());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_returns_original_error() {
        let shared = token("stale");
        let refresher = CountingRefresher::failing();
        let calls = AtomicU32::new(0);

        let err = AuthRetryPolicy::default()
            .run("test", &shared, Some(&refresher), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<String, _>(expired()) }
            })
            .await
            .unwrap_err();

        assert!(err.to_string().contains("code 190"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(refresher.calls(), 1);
        assert_eq!(shared.snapshot().await.expose(), "stale");
    }

    #[tokio::test]
    async fn test_no_refresher_returns_expiry_error() {
        let shared = token("stale");
        let err = AuthRetryPolicy::default()
            .run("test", &shared, None, |_| async {
                Err::<String, _>(expired())
            })
            .await
            .unwrap_err();
        assert!(AuthRetryPolicy::default().is_expired(&err));
    }

    #[tokio::test]
    async fn test_custom_expiry_code() {
        let shared = token("stale");
        let refresher = CountingRefresher::ok("fresh");
        let policy = AuthRetryPolicy::new(100);

        let result = policy
            .run("test", &shared, Some(&refresher), |snap| async move {
                if snap.expose() == "stale" {
                    Err(other_api_error())
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(refresher.calls(), 1);
        assert_eq!(shared.snapshot().await.expose(), "fresh");
    }

    #[test]
    fn test_is_expired_ignores_non_platform_errors() {
        let policy = AuthRetryPolicy::default();
        assert!(policy.is_expired(&expired()));
        assert!(!policy.is_expired(&QueuecastError::InvalidInput("x".to_string())));
        assert!(!policy.is_expired(&PlatformError::Network("reset".to_string()).into()));
    }
}
