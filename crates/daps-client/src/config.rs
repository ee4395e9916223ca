//! DAPS client configuration types
//!
//! [`DapsConfig`] is the serializable construction-time surface. It is
//! validated when the client is built and turned into a [`DapsEndpoint`]
//! plus the per-component settings.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::discovery::AuthorizationServerMetadata;
use crate::error::{DapsError, Result};
use crate::identity::{ClientIdentity, KeyFingerprint, parse_algorithm};

/// Default token endpoint path
pub const DEFAULT_TOKEN_PATH: &str = "/token";
/// Default key set endpoint path
pub const DEFAULT_JWKS_PATH: &str = "/.well-known/jwks.json";
/// RFC 8414 metadata path
pub const METADATA_PATH: &str = "/.well-known/oauth-authorization-server";
/// Scope requested for a DAT
pub const DEFAULT_SCOPE: &str = "idsc:IDS_CONNECTOR_ATTRIBUTES_ALL";
/// Default assertion signature algorithm
pub const DEFAULT_ALGORITHM: &str = "RS256";
/// Default assertion lifetime in seconds
pub const DEFAULT_ASSERTION_EXPIRATION_SECS: u64 = 300;
/// Default minimum remaining lifespan of a cached DAT in seconds
pub const DEFAULT_DAT_MIN_LIFESPAN_SECS: u64 = 60;
/// Default maximum age of a cached key set in seconds (24 hours)
pub const DEFAULT_JWKS_MAX_AGE_SECS: u64 = 86_400;
/// Default clock skew tolerance in seconds
pub const DEFAULT_CLOCK_SKEW_SECS: u64 = 60;

/// DAPS client configuration
///
/// # Example
///
/// ```rust
/// use daps_client::DapsConfig;
///
/// let config = DapsConfig::new("http://localhost:4567")
///     .with_scope("idsc:IDS_CONNECTOR_ATTRIBUTES_ALL")
///     .with_dat_min_lifespan_secs(120);
///
/// config.validate()?;
/// let endpoint = config.endpoint()?;
/// assert_eq!(endpoint.token_url(), "http://localhost:4567/token");
/// # Ok::<(), daps_client::DapsError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DapsConfig {
    /// Base URL of the DAPS
    pub daps_url: String,
    /// Token endpoint path below `daps_url`
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Key set endpoint path below `daps_url`
    #[serde(default = "default_jwks_path")]
    pub jwks_path: String,
    /// Expected `iss` of issued DATs (default: `daps_url`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// `aud` of the client assertion (default: `daps_url`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    /// Scope requested in the token exchange
    #[serde(default = "default_scope")]
    pub scope: String,
    /// Signature algorithm of the client assertion
    #[serde(default = "default_algorithm")]
    pub assertion_algorithm: String,
    /// Lifetime of the client assertion in seconds
    #[serde(default = "default_assertion_expiration")]
    pub assertion_expiration_secs: u64,
    /// Minimum remaining lifespan for a cached DAT to be served, in seconds
    #[serde(default = "default_dat_min_lifespan")]
    pub dat_min_lifespan_secs: u64,
    /// Maximum age of the cached key set, in seconds
    #[serde(default = "default_jwks_max_age")]
    pub jwks_max_age_secs: u64,
    /// Clock skew tolerance for DAT validation, in seconds
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: u64,
    /// Timeout for requests to the DAPS (none by default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_token_path() -> String {
    DEFAULT_TOKEN_PATH.to_string()
}

fn default_jwks_path() -> String {
    DEFAULT_JWKS_PATH.to_string()
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_algorithm() -> String {
    DEFAULT_ALGORITHM.to_string()
}

fn default_assertion_expiration() -> u64 {
    DEFAULT_ASSERTION_EXPIRATION_SECS
}

fn default_dat_min_lifespan() -> u64 {
    DEFAULT_DAT_MIN_LIFESPAN_SECS
}

fn default_jwks_max_age() -> u64 {
    DEFAULT_JWKS_MAX_AGE_SECS
}

fn default_clock_skew() -> u64 {
    DEFAULT_CLOCK_SKEW_SECS
}

impl DapsConfig {
    /// Configuration with defaults for everything but the DAPS URL
    pub fn new(daps_url: impl Into<String>) -> Self {
        Self {
            daps_url: daps_url.into(),
            token_path: default_token_path(),
            jwks_path: default_jwks_path(),
            issuer: None,
            audience: None,
            scope: default_scope(),
            assertion_algorithm: default_algorithm(),
            assertion_expiration_secs: default_assertion_expiration(),
            dat_min_lifespan_secs: default_dat_min_lifespan(),
            jwks_max_age_secs: default_jwks_max_age(),
            clock_skew_secs: default_clock_skew(),
            request_timeout_secs: None,
        }
    }

    /// Set the token endpoint path
    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    /// Set the key set endpoint path
    #[must_use]
    pub fn with_jwks_path(mut self, path: impl Into<String>) -> Self {
        self.jwks_path = path.into();
        self
    }

    /// Set the expected DAT issuer
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Set the assertion audience
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Set the requested scope
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Set the assertion signature algorithm
    #[must_use]
    pub fn with_assertion_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.assertion_algorithm = algorithm.into();
        self
    }

    /// Set the assertion lifetime
    #[must_use]
    pub fn with_assertion_expiration_secs(mut self, secs: u64) -> Self {
        self.assertion_expiration_secs = secs;
        self
    }

    /// Set the minimum remaining DAT lifespan
    #[must_use]
    pub fn with_dat_min_lifespan_secs(mut self, secs: u64) -> Self {
        self.dat_min_lifespan_secs = secs;
        self
    }

    /// Set the key set cache max-age
    #[must_use]
    pub fn with_jwks_max_age_secs(mut self, secs: u64) -> Self {
        self.jwks_max_age_secs = secs;
        self
    }

    /// Set the clock skew tolerance
    #[must_use]
    pub fn with_clock_skew_secs(mut self, secs: u64) -> Self {
        self.clock_skew_secs = secs;
        self
    }

    /// Set a timeout for every request to the DAPS
    #[must_use]
    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = Some(secs);
        self
    }

    /// Check every field
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        parse_algorithm(&self.assertion_algorithm)?;

        if self.assertion_expiration_secs == 0 {
            return Err(DapsError::invalid_parameter(
                "assertion_expiration_secs",
                "expected an integer greater than 0",
            ));
        }
        if self.jwks_max_age_secs == 0 {
            return Err(DapsError::invalid_parameter(
                "jwks_max_age_secs",
                "expected an integer greater than 0",
            ));
        }
        if self.scope.trim().is_empty() {
            return Err(DapsError::invalid_parameter("scope", "expected a non-empty string"));
        }
        if matches!(&self.audience, Some(aud) if aud.trim().is_empty()) {
            return Err(DapsError::invalid_parameter(
                "audience",
                "expected a non-empty string",
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(DapsError::invalid_parameter(
                "request_timeout_secs",
                "expected an integer greater than 0",
            ));
        }
        Ok(())
    }

    /// Endpoint addresses described by this configuration
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] if the URL or a path is malformed.
    pub fn endpoint(&self) -> Result<DapsEndpoint> {
        let mut endpoint = DapsEndpoint::new(&self.daps_url)?
            .with_token_path(&self.token_path)?
            .with_jwks_path(&self.jwks_path)?;
        if let Some(issuer) = &self.issuer {
            endpoint = endpoint.with_issuer(issuer)?;
        }
        Ok(endpoint)
    }

    /// Load the client identity, signing with the configured algorithm
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] for an unusable algorithm or key.
    pub fn load_identity(
        &self,
        fingerprint: KeyFingerprint,
        private_key_pem: &SecretString,
    ) -> Result<ClientIdentity> {
        let algorithm = parse_algorithm(&self.assertion_algorithm)?;
        ClientIdentity::from_pem(fingerprint, private_key_pem, algorithm)
    }

    /// Assertion audience, falling back to the DAPS URL
    pub fn audience(&self) -> String {
        self.audience
            .clone()
            .unwrap_or_else(|| trim_base_url(&self.daps_url).to_string())
    }

    /// Minimum remaining DAT lifespan
    pub fn dat_min_lifespan(&self) -> Duration {
        Duration::from_secs(self.dat_min_lifespan_secs)
    }

    /// Key set cache max-age
    pub fn jwks_max_age(&self) -> Duration {
        Duration::from_secs(self.jwks_max_age_secs)
    }

    /// Clock skew tolerance
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Request timeout, if configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

fn trim_base_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

/// Addresses of a DAPS instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DapsEndpoint {
    base_url: String,
    token_url: String,
    jwks_url: String,
    issuer: String,
}

impl DapsEndpoint {
    /// Endpoint with the default token and key set paths
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] unless `base_url` is an absolute http(s) URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| {
            DapsError::invalid_parameter("daps_url", format!("'{base_url}' is not a URL: {e}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DapsError::invalid_parameter(
                "daps_url",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        let base_url = trim_base_url(base_url).to_string();
        Ok(Self {
            token_url: format!("{base_url}{DEFAULT_TOKEN_PATH}"),
            jwks_url: format!("{base_url}{DEFAULT_JWKS_PATH}"),
            issuer: base_url.clone(),
            base_url,
        })
    }

    /// Override the token endpoint path
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] unless `path` starts with `/`.
    pub fn with_token_path(mut self, path: &str) -> Result<Self> {
        self.token_url = join_path(&self.base_url, "token_path", path)?;
        Ok(self)
    }

    /// Override the key set endpoint path
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] unless `path` starts with `/`.
    pub fn with_jwks_path(mut self, path: &str) -> Result<Self> {
        self.jwks_url = join_path(&self.base_url, "jwks_path", path)?;
        Ok(self)
    }

    /// Override the expected DAT issuer
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] if `issuer` is empty.
    pub fn with_issuer(mut self, issuer: &str) -> Result<Self> {
        if issuer.trim().is_empty() {
            return Err(DapsError::invalid_parameter("issuer", "expected a non-empty string"));
        }
        self.issuer = issuer.to_string();
        Ok(self)
    }

    /// Adopt the token and key set endpoints advertised in RFC 8414 metadata
    ///
    /// The document's `issuer` must equal this endpoint's issuer
    /// (RFC 8414 section 3.3); a trailing `/` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::MalformedResponse`] if the issuer differs or an
    /// advertised URL is not an absolute http(s) URL.
    pub fn with_metadata(mut self, metadata: &AuthorizationServerMetadata) -> Result<Self> {
        if trim_base_url(&metadata.issuer) != self.issuer {
            return Err(DapsError::MalformedResponse(format!(
                "metadata issuer '{}' does not match '{}'",
                metadata.issuer, self.issuer
            )));
        }
        for url in [&metadata.token_endpoint, &metadata.jwks_uri]
            .into_iter()
            .flatten()
        {
            let parsed = Url::parse(url).map_err(|e| {
                DapsError::MalformedResponse(format!("metadata advertises invalid URL '{url}': {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(DapsError::MalformedResponse(format!(
                    "metadata advertises unsupported URL '{url}'"
                )));
            }
        }
        if let Some(token_endpoint) = &metadata.token_endpoint {
            self.token_url = token_endpoint.clone();
        }
        if let Some(jwks_uri) = &metadata.jwks_uri {
            self.jwks_url = jwks_uri.clone();
        }
        Ok(self)
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Token endpoint URL
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Key set endpoint URL
    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// RFC 8414 metadata URL
    pub fn metadata_url(&self) -> String {
        format!("{}{METADATA_PATH}", self.base_url)
    }

    /// Expected `iss` of DATs issued by this DAPS
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

fn join_path(base_url: &str, name: &'static str, path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(DapsError::invalid_parameter(
            name,
            format!("'{path}' must start with '/'"),
        ));
    }
    Ok(format!("{base_url}{path}"))
}
