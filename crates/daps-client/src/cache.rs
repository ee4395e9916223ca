//! Cached, validated DAT
//!
//! A DAT is fetched, verified and stored on first use. It is served from
//! the cache while at least the minimum lifespan remains before `exp`, and
//! is refetched synchronously by the first caller that finds it stale.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::assertion::AssertionOptions;
use crate::clock::Clock;
use crate::config::DEFAULT_DAT_MIN_LIFESPAN_SECS;
use crate::error::{DapsError, Result};
use crate::exchange::TokenExchangeClient;
use crate::jwt::{DatClaims, DatValidator};

/// Source of DATs for outgoing requests
#[async_trait]
pub trait DatProvider: Send + Sync {
    /// A DAT suitable for a request sent now
    async fn get_dat(&self) -> Result<String>;
}

/// A validated DAT
#[derive(Debug, Clone, PartialEq)]
pub struct Dat {
    /// Compact token
    pub token: String,
    /// Verified claims
    pub claims: DatClaims,
    /// `iat` claim, or the fetch time if the DAPS omitted it
    pub issued_at: u64,
}

impl Dat {
    /// Seconds left before expiry at `now`
    pub fn remaining_lifetime(&self, now: u64) -> u64 {
        self.claims.remaining_lifetime(now)
    }

    /// Whether the DAT is unexpired and at least `min_lifespan` remains at `now`
    pub fn is_fresh(&self, now: u64, min_lifespan: Duration) -> bool {
        self.claims.exp > now && self.remaining_lifetime(now) >= min_lifespan.as_secs()
    }
}

/// Caches the client's own DAT
///
/// The cache lock is held across fetch and validation, so concurrent
/// callers on a cold or stale cache share one token request.
#[derive(Debug)]
pub struct DatCache {
    exchange: Arc<TokenExchangeClient>,
    validator: Arc<DatValidator>,
    subject: String,
    min_lifespan: Duration,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Dat>>,
}

impl DatCache {
    /// Create a cache for DATs about `subject`
    pub fn new(
        exchange: Arc<TokenExchangeClient>,
        validator: Arc<DatValidator>,
        subject: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            exchange,
            validator,
            subject: subject.into(),
            min_lifespan: Duration::from_secs(DEFAULT_DAT_MIN_LIFESPAN_SECS),
            clock,
            current: Mutex::new(None),
        }
    }

    /// Set the default minimum remaining lifespan
    #[must_use]
    pub fn with_min_lifespan(mut self, min_lifespan: Duration) -> Self {
        self.min_lifespan = min_lifespan;
        self
    }

    /// Default minimum remaining lifespan
    pub fn min_lifespan(&self) -> Duration {
        self.min_lifespan
    }

    /// Cached DAT, refreshed if missing or stale
    ///
    /// # Errors
    ///
    /// Propagates exchange and validation failures and returns
    /// [`DapsError::DatIntegrity`] if the DAT names another issuer or subject.
    pub async fn get_dat(&self) -> Result<Dat> {
        self.get_dat_with_min_lifespan(None).await
    }

    /// Cached DAT, refreshed if less than `min_lifespan` remains
    ///
    /// # Errors
    ///
    /// Same as [`DatCache::get_dat`].
    pub async fn get_dat_with_min_lifespan(&self, min_lifespan: Option<Duration>) -> Result<Dat> {
        let min_lifespan = min_lifespan.unwrap_or(self.min_lifespan);
        let mut current = self.current.lock().await;

        if let Some(dat) = current.as_ref() {
            let now = self.clock.now();
            if dat.is_fresh(now, min_lifespan) {
                debug!(
                    subject = %self.subject,
                    remaining = dat.remaining_lifetime(now),
                    "Using cached DAT"
                );
                return Ok(dat.clone());
            }
            info!(
                subject = %self.subject,
                remaining = dat.remaining_lifetime(now),
                min_lifespan = min_lifespan.as_secs(),
                "Cached DAT is stale, refreshing"
            );
        }

        let dat = self.fetch().await?;
        *current = Some(dat.clone());
        Ok(dat)
    }

    /// Cached DAT without freshness check or fetch
    pub async fn current(&self) -> Option<Dat> {
        self.current.lock().await.clone()
    }

    /// Drop the cached DAT
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
        debug!(subject = %self.subject, "DAT cache invalidated");
    }

    async fn fetch(&self) -> Result<Dat> {
        let token = self.exchange.fetch_dat(&AssertionOptions::default()).await?;
        let claims = self.validator.validate(&token).await?;
        self.check_integrity(&claims)?;

        let issued_at = claims.iat.unwrap_or_else(|| self.clock.now());
        info!(
            subject = %self.subject,
            exp = claims.exp,
            issued_at,
            "Stored new DAT"
        );
        Ok(Dat {
            token,
            claims,
            issued_at,
        })
    }

    /// The validator already rejects a foreign issuer; only the subject is left to check
    fn check_integrity(&self, claims: &DatClaims) -> Result<()> {
        if claims.sub != self.subject {
            warn!(expected = %self.subject, actual = %claims.sub, "DAT subject mismatch");
            return Err(DapsError::DatIntegrity(format!(
                "subject '{}' does not match '{}'",
                claims.sub, self.subject
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DatProvider for DatCache {
    async fn get_dat(&self) -> Result<String> {
        DatCache::get_dat(self).await.map(|dat| dat.token)
    }
}
