//! DAPS client facade
//!
//! [`DapsClient`] wires the assertion builder, token exchange, key set
//! cache, validator and DAT cache for one connector identity and one DAPS.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use tracing::{info, warn};

use crate::agent::{BearerAgent, Connector};
use crate::assertion::{AssertionBuilder, AssertionOptions, AssertionPayload};
use crate::cache::{Dat, DatCache, DatProvider};
use crate::clock::{Clock, SystemClock};
use crate::config::{DapsConfig, DapsEndpoint};
use crate::discovery::{AuthorizationServerMetadata, fetch_metadata};
use crate::error::{DapsError, Result};
use crate::exchange::{TokenExchangeClient, default_http_client};
use crate::identity::{ClientIdentity, parse_algorithm};
use crate::jwt::{DatClaims, DatValidator, JwksCache};

/// Builder for [`DapsClient`]
#[derive(Debug)]
pub struct DapsClientBuilder {
    config: DapsConfig,
    identity: ClientIdentity,
    http_client: Option<reqwest::Client>,
    clock: Option<Arc<dyn Clock>>,
    endpoint: Option<DapsEndpoint>,
}

impl DapsClientBuilder {
    /// Use a custom HTTP client for the token, key set and metadata requests
    ///
    /// The configured request timeout is not applied to a custom client.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Use a custom time source
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use explicit DAPS addresses instead of those derived from the configuration
    #[must_use]
    pub fn endpoint(mut self, endpoint: DapsEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Adopt the token and key set endpoints from the DAPS metadata document
    ///
    /// The document is fetched from the configured DAPS URL and must name
    /// the configured issuer.
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] for an invalid configuration,
    /// and the errors of [`fetch_metadata`] and [`DapsEndpoint::with_metadata`].
    pub async fn discover(mut self) -> Result<Self> {
        self.config.validate()?;
        let endpoint = match self.endpoint.take() {
            Some(endpoint) => endpoint,
            None => self.config.endpoint()?,
        };
        let http = match &self.http_client {
            Some(client) => client.clone(),
            None => default_http_client(self.config.request_timeout())?,
        };
        self.http_client = Some(http.clone());

        let metadata = fetch_metadata(&http, &endpoint.metadata_url()).await?;
        if !metadata.accepts_assertion_algorithm(&self.config.assertion_algorithm) {
            warn!(
                algorithm = %self.config.assertion_algorithm,
                "DAPS does not advertise the configured assertion algorithm"
            );
        }
        let endpoint = endpoint.with_metadata(&metadata)?;
        info!(
            token_url = %endpoint.token_url(),
            jwks_uri = %endpoint.jwks_url(),
            "Adopted endpoints from DAPS metadata"
        );
        self.endpoint = Some(endpoint);
        Ok(self)
    }

    /// Validate the configuration and build the client
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] for an invalid configuration
    /// or an identity whose algorithm differs from `assertion_algorithm`.
    pub fn build(self) -> Result<DapsClient> {
        let config = self.config;
        config.validate()?;

        let algorithm = parse_algorithm(&config.assertion_algorithm)?;
        if self.identity.algorithm() != algorithm {
            return Err(DapsError::invalid_parameter(
                "assertion_algorithm",
                format!(
                    "identity signs with {:?}, configuration requests {algorithm:?}",
                    self.identity.algorithm()
                ),
            ));
        }

        let endpoint = match self.endpoint {
            Some(endpoint) => endpoint,
            None => config.endpoint()?,
        };
        let http = match self.http_client {
            Some(client) => client,
            None => default_http_client(config.request_timeout())?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let identity = Arc::new(self.identity);

        let builder = AssertionBuilder::new(
            Arc::clone(&identity),
            config.audience(),
            config.assertion_expiration_secs,
            Arc::clone(&clock),
        )?;
        let exchange = Arc::new(TokenExchangeClient::new(
            http.clone(),
            endpoint.token_url(),
            config.scope.clone(),
            builder,
            Arc::clone(&clock),
        ));
        let jwks = Arc::new(
            JwksCache::new(http.clone(), endpoint.jwks_url(), Arc::clone(&clock))
                .with_max_age(config.jwks_max_age()),
        );
        let validator = Arc::new(
            DatValidator::new(Arc::clone(&jwks), endpoint.issuer())
                .with_clock_skew(config.clock_skew()),
        );
        let dat_cache = Arc::new(
            DatCache::new(
                Arc::clone(&exchange),
                Arc::clone(&validator),
                identity.subject(),
                clock,
            )
            .with_min_lifespan(config.dat_min_lifespan()),
        );

        info!(
            subject = %identity.subject(),
            token_url = %endpoint.token_url(),
            jwks_uri = %endpoint.jwks_url(),
            issuer = %endpoint.issuer(),
            "DAPS client configured"
        );

        Ok(DapsClient {
            config,
            endpoint,
            identity,
            http,
            exchange,
            jwks,
            validator,
            dat_cache,
        })
    }
}

/// Client for a DAPS token service
///
/// # Example
///
/// ```rust,no_run
/// use daps_client::{DapsClient, DapsConfig, KeyFingerprint};
/// use secrecy::SecretString;
///
/// # async fn run(pem: SecretString) -> daps_client::Result<()> {
/// let config = DapsConfig::new("http://localhost:4567");
/// let fingerprint: KeyFingerprint =
///     "DD:CB:FD:0B:93:84:33:01:11:EB:5D:94:94:88:BE:78:7D:57:FC:4A:keyid:CB:8C:C7:B6:85:79:A8:23:A6:CB:15:AB:17:50:2F:E6:65:43:5D:E8"
///         .parse()?;
/// let identity = config.load_identity(fingerprint, &pem)?;
/// let client = DapsClient::builder(config, identity).build()?;
///
/// let dat = client.get_dat().await?;
/// println!("DAT valid until {:?}", dat.claims.expires_at());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DapsClient {
    config: DapsConfig,
    endpoint: DapsEndpoint,
    identity: Arc<ClientIdentity>,
    http: reqwest::Client,
    exchange: Arc<TokenExchangeClient>,
    jwks: Arc<JwksCache>,
    validator: Arc<DatValidator>,
    dat_cache: Arc<DatCache>,
}

impl DapsClient {
    /// Start building a client
    pub fn builder(config: DapsConfig, identity: ClientIdentity) -> DapsClientBuilder {
        DapsClientBuilder {
            config,
            identity,
            http_client: None,
            clock: None,
            endpoint: None,
        }
    }

    /// Configuration the client was built from
    pub fn config(&self) -> &DapsConfig {
        &self.config
    }

    /// DAPS addresses
    pub fn endpoint(&self) -> &DapsEndpoint {
        &self.endpoint
    }

    /// The connector identity
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// The connector subject (`SKI:keyid:AKI`)
    pub fn subject(&self) -> &str {
        self.identity.subject()
    }

    /// Unsigned client assertion claims for now
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] if `expiration` is `Some(0)`.
    pub fn create_assertion_payload(&self, expiration: Option<u64>) -> Result<AssertionPayload> {
        self.exchange.assertion_builder().payload(expiration)
    }

    /// Freshly signed client assertion
    ///
    /// # Errors
    ///
    /// See [`AssertionBuilder::build`].
    pub fn create_assertion(&self, options: &AssertionOptions) -> Result<String> {
        self.exchange.assertion_builder().build(options)
    }

    /// Form-encoded token request body with a current assertion
    ///
    /// # Errors
    ///
    /// See [`AssertionBuilder::build`].
    pub fn create_token_request_body(&self, options: &AssertionOptions) -> Result<String> {
        let assertion = self.exchange.assertion(options)?;
        Ok(self.exchange.request_body(&assertion))
    }

    /// Request a new DAT, bypassing the cache and validation
    ///
    /// # Errors
    ///
    /// See [`TokenExchangeClient::exchange`].
    pub async fn fetch_dat(&self, options: &AssertionOptions) -> Result<String> {
        self.exchange.fetch_dat(options).await
    }

    /// Exchange a caller-built assertion for a DAT
    ///
    /// # Errors
    ///
    /// See [`TokenExchangeClient::exchange`].
    pub async fn exchange(&self, assertion: &str) -> Result<String> {
        self.exchange.exchange(assertion).await
    }

    /// DAPS key set, fetched if missing or older than `max_age`
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::JwksFetch`] if a needed fetch fails.
    pub async fn get_jwks(&self, max_age: Option<Duration>) -> Result<Arc<JwkSet>> {
        self.jwks.get_keys_with_max_age(max_age).await
    }

    /// Verify a DAT issued to this connector
    ///
    /// # Errors
    ///
    /// See [`DatValidator::validate`]; a foreign subject is a
    /// [`DapsError::ClaimValidation`].
    pub async fn validate_dat(&self, token: &str) -> Result<DatClaims> {
        self.validator
            .validate_for_subject(token, self.identity.subject())
            .await
    }

    /// Verify a DAT presented by another connector
    ///
    /// # Errors
    ///
    /// See [`DatValidator::validate`].
    pub async fn validate_peer_dat(&self, token: &str, subject: Option<&str>) -> Result<DatClaims> {
        match subject {
            Some(subject) => self.validator.validate_for_subject(token, subject).await,
            None => self.validator.validate(token).await,
        }
    }

    /// Cached DAT, refreshed if missing or stale
    ///
    /// # Errors
    ///
    /// See [`DatCache::get_dat`].
    pub async fn get_dat(&self) -> Result<Dat> {
        self.dat_cache.get_dat().await
    }

    /// Cached DAT, refreshed if less than `min_lifespan` remains
    ///
    /// # Errors
    ///
    /// See [`DatCache::get_dat`].
    pub async fn get_dat_with_min_lifespan(&self, min_lifespan: Duration) -> Result<Dat> {
        self.dat_cache
            .get_dat_with_min_lifespan(Some(min_lifespan))
            .await
    }

    /// DAT cache
    pub fn dat_cache(&self) -> &Arc<DatCache> {
        &self.dat_cache
    }

    /// Key set cache
    pub fn jwks_cache(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    /// Validator for DATs from this DAPS
    pub fn validator(&self) -> &Arc<DatValidator> {
        &self.validator
    }

    /// Fetch the DAPS authorization server metadata (RFC 8414)
    ///
    /// # Errors
    ///
    /// See [`fetch_metadata`].
    pub async fn fetch_metadata(&self) -> Result<AuthorizationServerMetadata> {
        fetch_metadata(&self.http, &self.endpoint.metadata_url()).await
    }

    /// Bearer agent drawing DATs from this client
    pub fn bearer_agent<K: Connector>(&self, connector: K) -> BearerAgent<K> {
        BearerAgent::new(Arc::clone(&self.dat_cache) as Arc<dyn DatProvider>, connector)
    }

    /// Tower layer drawing DATs from this client
    #[cfg(feature = "tower")]
    pub fn bearer_layer(&self) -> crate::tower::BearerLayer {
        crate::tower::BearerLayer::new(Arc::clone(&self.dat_cache) as Arc<dyn DatProvider>)
    }
}

#[async_trait]
impl DatProvider for DapsClient {
    async fn get_dat(&self) -> Result<String> {
        self.dat_cache.get_dat().await.map(|dat| dat.token)
    }
}
