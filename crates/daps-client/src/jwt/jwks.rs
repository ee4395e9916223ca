//! DAPS key set fetching and caching
//!
//! The key set is kept until it is older than its max-age (24 hours by
//! default) and is then refetched on the next request. The cache lock is
//! held across the fetch, so concurrent callers on a cold or stale cache
//! share one request.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::DEFAULT_JWKS_MAX_AGE_SECS;
use crate::error::{DapsError, Result};

/// Key set cache entry
#[derive(Debug, Clone)]
struct CachedJwks {
    jwks: Arc<JwkSet>,
    fetched_at: u64,
}

impl CachedJwks {
    fn is_fresh(&self, now: u64, max_age: Duration) -> bool {
        now.saturating_sub(self.fetched_at) <= max_age.as_secs()
    }
}

/// Fetches and caches the DAPS public key set
///
/// # Example
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use daps_client::{SystemClock, jwt::JwksCache};
/// # tokio_test::block_on(async {
/// let cache = JwksCache::new(
///     reqwest::Client::new(),
///     "http://localhost:4567/.well-known/jwks.json",
///     Arc::new(SystemClock),
/// );
///
/// let jwks = cache.get_keys().await?;
/// if let Some(key) = jwks.find("default") {
///     // verify with key
/// }
/// # Ok::<(), daps_client::DapsError>(())
/// # });
/// ```
#[derive(Debug)]
pub struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    max_age: Duration,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedJwks>>,
}

impl JwksCache {
    /// Create a cache with the default max-age of 24 hours
    pub fn new(http: reqwest::Client, jwks_uri: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            http,
            max_age: Duration::from_secs(DEFAULT_JWKS_MAX_AGE_SECS),
            clock,
            cache: Mutex::new(None),
        }
    }

    /// Set the default max-age
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Key set endpoint URL
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Default max-age
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Key set, fetched if missing or older than the default max-age
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::JwksFetch`] if a needed fetch fails.
    pub async fn get_keys(&self) -> Result<Arc<JwkSet>> {
        self.get_keys_with_max_age(None).await
    }

    /// Key set, fetched if missing or older than `max_age`
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::JwksFetch`] if a needed fetch fails.
    pub async fn get_keys_with_max_age(&self, max_age: Option<Duration>) -> Result<Arc<JwkSet>> {
        let max_age = max_age.unwrap_or(self.max_age);
        let mut cache = self.cache.lock().await;

        if let Some(cached) = cache.as_ref()
            && cached.is_fresh(self.clock.now(), max_age)
        {
            debug!(jwks_uri = %self.jwks_uri, fetched_at = cached.fetched_at, "Using cached JWKS");
            return Ok(Arc::clone(&cached.jwks));
        }

        let jwks = Arc::new(self.fetch().await?);
        *cache = Some(CachedJwks {
            jwks: Arc::clone(&jwks),
            fetched_at: self.clock.now(),
        });
        Ok(jwks)
    }

    /// Refetch the key set regardless of its age
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::JwksFetch`] if the fetch fails; the previous
    /// key set is kept in that case.
    pub async fn refresh(&self) -> Result<Arc<JwkSet>> {
        let mut cache = self.cache.lock().await;
        let jwks = Arc::new(self.fetch().await?);
        *cache = Some(CachedJwks {
            jwks: Arc::clone(&jwks),
            fetched_at: self.clock.now(),
        });
        Ok(jwks)
    }

    /// Drop the cached key set
    pub async fn clear(&self) {
        *self.cache.lock().await = None;
        debug!(jwks_uri = %self.jwks_uri, "JWKS cache cleared");
    }

    async fn fetch(&self) -> Result<JwkSet> {
        info!(jwks_uri = %self.jwks_uri, "Fetching JWKS from endpoint");

        let response = self.http.get(&self.jwks_uri).send().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to fetch JWKS");
            DapsError::JwksFetch(format!("request failed: {e}"))
        })?;

        if !response.status().is_success() {
            error!(
                jwks_uri = %self.jwks_uri,
                status = %response.status(),
                "JWKS endpoint returned error status"
            );
            return Err(DapsError::JwksFetch(format!(
                "endpoint returned status {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(|e| {
            error!(jwks_uri = %self.jwks_uri, error = %e, "Failed to parse JWKS JSON");
            DapsError::JwksFetch(format!("invalid JSON: {e}"))
        })?;

        let jwks = parse_key_set(body)?;
        info!(
            jwks_uri = %self.jwks_uri,
            key_count = jwks.keys.len(),
            "Successfully fetched JWKS"
        );
        Ok(jwks)
    }
}

fn parse_key_set(body: serde_json::Value) -> Result<JwkSet> {
    if !body.get("keys").is_some_and(serde_json::Value::is_array) {
        return Err(DapsError::JwksFetch(
            "response has no 'keys' array".to_string(),
        ));
    }
    serde_json::from_value(body).map_err(|e| DapsError::JwksFetch(format!("invalid JWK entry: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_freshness_boundary() {
        let cached = CachedJwks {
            jwks: Arc::new(JwkSet { keys: Vec::new() }),
            fetched_at: 1000,
        };
        let max_age = Duration::from_secs(100);
        assert!(cached.is_fresh(1000, max_age));
        assert!(cached.is_fresh(1100, max_age));
        assert!(!cached.is_fresh(1101, max_age));
    }

    #[test]
    fn test_parse_key_set_requires_keys() {
        assert!(matches!(
            parse_key_set(json!({"kid": "a"})),
            Err(DapsError::JwksFetch(_))
        ));
        assert!(matches!(
            parse_key_set(json!({"keys": "nope"})),
            Err(DapsError::JwksFetch(_))
        ));
        assert_eq!(parse_key_set(json!({"keys": []})).unwrap().keys.len(), 0);
    }

    #[test]
    fn test_parse_key_set_with_ec_key() {
        let jwks = parse_key_set(json!({
            "keys": [{
                "kty": "EC",
                "crv": "P-256",
                "kid": "daps-1",
                "use": "sig",
                "alg": "ES256",
                "x": "Zogqygmf9vSWx1WX2y6upOYmuXcDpjk8l1HkmHt8WS0",
                "y": "0F-EhIBPpJ-oAZoodKxoz5mCS_c1A7uz-_pWrnpBWWc"
            }]
        }))
        .unwrap();
        assert!(jwks.find("daps-1").is_some());
    }
}
