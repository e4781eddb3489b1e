//! Bearer credential cache for the AppScan API.
//!
//! The cache owns one shared [`Credential`]. Callers always go through
//! [`CredentialCache::get_valid_credential`]:
//! - a usable cached credential is returned after a short read lock;
//! - otherwise the caller takes the refresh lock, re-checks the cache and,
//!   only if it is still stale, exchanges the API key pair for a new token.
//!
//! Concurrent callers that find the credential stale queue on the refresh
//! lock and pick up the credential fetched by whichever of them got there
//! first, so a burst of stale reads costs exactly one login call.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{AppScanError, AppScanResult};
use crate::models::{Credential, LoginResponse};

/// Lead time before expiry at which a credential is refreshed.
pub const CREDENTIAL_SKEW_SECS: i64 = 60;

/// Login path under the versioned API root.
const LOGIN_PATH: &str = "/Account/ApiKeyLogin";

/// Self-refreshing holder of the AppScan bearer credential.
pub struct CredentialCache {
    /// HTTP client used for the login call.
    http: reqwest::Client,
    /// Full login endpoint URL.
    login_url: String,
    /// API key id.
    key_id: String,
    /// API key secret.
    key_secret: SecretString,
    /// Current credential, swapped wholesale on refresh.
    current: RwLock<Option<Arc<Credential>>>,
    /// Serializes the check-and-refresh sequence.
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("login_url", &self.login_url)
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .field("current", &*self.current.read())
            .finish()
    }
}

impl CredentialCache {
    /// Create an empty cache. No network call happens until first use.
    pub fn new(
        http: reqwest::Client,
        api_url: &str,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            login_url: format!("{}{}", api_url.trim_end_matches('/'), LOGIN_PATH),
            key_id: key_id.into(),
            key_secret: SecretString::new(key_secret.into().into()),
            current: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return a credential that stays valid for at least the skew window.
    ///
    /// Refresh failures are returned as-is; retrying is up to the caller.
    pub async fn get_valid_credential(&self) -> AppScanResult<Arc<Credential>> {
        if let Some(credential) = self.cached() {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        if let Some(credential) = self.cached() {
            debug!("Using credential refreshed by a concurrent caller");
            return Ok(credential);
        }

        info!("Auth token is missing or expiring soon, refreshing");
        let fresh = Arc::new(self.login().await?);
        *self.current.write() = Some(Arc::clone(&fresh));
        info!(expires_at = %fresh.expires_at(), "Refreshed AppScan auth token");

        Ok(fresh)
    }

    /// Drop the cached credential so the next call logs in again.
    pub fn invalidate(&self) {
        *self.current.write() = None;
    }

    /// Drop `rejected` if it is still the cached credential.
    ///
    /// A credential another caller already refreshed is kept. Returns
    /// whether the cache was cleared.
    pub fn invalidate_if_current(&self, rejected: &Arc<Credential>) -> bool {
        let mut current = self.current.write();
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, rejected)) {
            *current = None;
            true
        } else {
            false
        }
    }

    /// Cached credential if it is still usable.
    fn cached(&self) -> Option<Arc<Credential>> {
        let skew = chrono::Duration::seconds(CREDENTIAL_SKEW_SECS);
        self.current
            .read()
            .as_ref()
            .filter(|c| c.is_usable_at(Utc::now(), skew))
            .cloned()
    }

    /// Exchange the key pair for a new credential.
    async fn login(&self) -> AppScanResult<Credential> {
        let payload = serde_json::json!({
            "KeyId": self.key_id,
            "KeySecret": self.key_secret.expose_secret(),
        });

        let response = self
            .http
            .post(&self.login_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppScanError::Auth(format!("Login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "AppScan rejected API key login");
            return Err(AppScanError::Auth(format!(
                "Login failed with status {}: {}",
                status, body
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| AppScanError::Auth(format!("Malformed login response: {}", e)))?;

        let token = login
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppScanError::Auth("Login response missing Token".to_string()))?;
        let expires_at = login
            .expire
            .ok_or_else(|| AppScanError::Auth("Login response missing Expire".to_string()))?;

        Ok(Credential::new(token, expires_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn login_body(token: &str, expires_in_secs: i64) -> serde_json::Value {
        let expire = Utc::now() + chrono::Duration::seconds(expires_in_secs);
        serde_json::json!({"Token": token, "Expire": expire.to_rfc3339()})
    }

    fn cache_for(server: &MockServer) -> CredentialCache {
        CredentialCache::new(
            reqwest::Client::new(),
            &format!("{}/api/v4", server.uri()),
            "key-id",
            "key-secret",
        )
    }

    #[tokio::test]
    async fn test_first_call_logs_in_then_reuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .and(body_json(
                serde_json::json!({"KeyId": "key-id", "KeySecret": "key-secret"}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body("tok-1", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let first = cache.get_valid_credential().await.unwrap();
        let second = cache.get_valid_credential().await.unwrap();

        assert_eq!(first.value(), "tok-1");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_refreshes_inside_skew_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body("short-lived", 30)))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        cache.get_valid_credential().await.unwrap();
        // Expires within 60s of now, so the next call must log in again.
        cache.get_valid_credential().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_stale_callers_share_one_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(login_body("shared", 3600))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(cache_for(&server));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get_valid_credential().await
            }));
        }

        for handle in handles {
            let credential = handle.await.unwrap().unwrap();
            assert_eq!(credential.value(), "shared");
        }
    }

    #[tokio::test]
    async fn test_rejected_login_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let err = cache.get_valid_credential().await.unwrap_err();
        assert!(matches!(err, AppScanError::Auth(msg) if msg.contains("401")));
    }

    #[tokio::test]
    async fn test_missing_expiry_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"Token": "abc"})),
            )
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let err = cache.get_valid_credential().await.unwrap_err();
        assert!(matches!(err, AppScanError::Auth(msg) if msg.contains("Expire")));
    }

    #[tokio::test]
    async fn test_malformed_body_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        assert!(matches!(
            cache.get_valid_credential().await,
            Err(AppScanError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_forces_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body("tok", 3600)))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        cache.get_valid_credential().await.unwrap();
        cache.invalidate();
        cache.get_valid_credential().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_rejection_keeps_refreshed_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v4/Account/ApiKeyLogin"))
            .respond_with(ResponseTemplate::new(200).set_body_json(login_body("tok", 3600)))
            .expect(2)
            .mount(&server)
            .await;

        let cache = cache_for(&server);
        let rejected = cache.get_valid_credential().await.unwrap();
        cache.invalidate();
        let refreshed = cache.get_valid_credential().await.unwrap();

        // A late 401 for the old credential must not discard the new one.
        assert!(!cache.invalidate_if_current(&rejected));
        let reused = cache.get_valid_credential().await.unwrap();
        assert!(Arc::ptr_eq(&refreshed, &reused));

        assert!(cache.invalidate_if_current(&refreshed));
    }
}
