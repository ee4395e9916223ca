//! Client assertion construction and signing
//!
//! The client proves possession of its private key with a short-lived,
//! self-signed JWT whose `iss` and `sub` are the connector's key-derived
//! subject. The DAPS verifies it against the registered certificate and
//! answers with a DAT.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::error::{DapsError, Result};
use crate::identity::{ClientIdentity, parse_algorithm};

/// JSON-LD context of IDS information model objects
pub const JSONLD_CONTEXT: &str = "https://w3id.org/idsa/contexts/context.jsonld";

/// JSON-LD type of a DAT request
pub const DAT_REQUEST_TYPE: &str = "ids:DatRequestToken";

/// Claims of the client assertion
///
/// Always satisfies `nbf == iat <= exp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionPayload {
    /// JSON-LD context
    #[serde(rename = "@context")]
    pub context: String,
    /// JSON-LD type
    #[serde(rename = "@type")]
    pub type_: String,
    /// Issuer, the client subject
    pub iss: String,
    /// Subject, the client subject
    pub sub: String,
    /// Audience, the DAPS
    pub aud: String,
    /// Expiry (seconds since epoch)
    pub exp: u64,
    /// Not before (seconds since epoch)
    pub nbf: u64,
    /// Issued at (seconds since epoch)
    pub iat: u64,
}

/// Per-call overrides for [`AssertionBuilder::build`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssertionOptions {
    /// Lifetime in seconds, must be greater than 0
    pub expiration: Option<u64>,
    /// JWS algorithm name such as `ES256`
    pub algorithm: Option<String>,
}

impl AssertionOptions {
    /// Whether any default is overridden
    pub fn is_default(&self) -> bool {
        self.expiration.is_none() && self.algorithm.is_none()
    }
}

/// Builds and signs client assertions
#[derive(Debug, Clone)]
pub struct AssertionBuilder {
    identity: Arc<ClientIdentity>,
    audience: String,
    expiration: u64,
    clock: Arc<dyn Clock>,
}

impl AssertionBuilder {
    /// Create a builder
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] if `expiration` is 0 or the
    /// audience is empty.
    pub fn new(
        identity: Arc<ClientIdentity>,
        audience: impl Into<String>,
        expiration: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let audience = audience.into();
        if audience.trim().is_empty() {
            return Err(DapsError::invalid_parameter("audience", "expected a non-empty string"));
        }
        check_expiration(expiration)?;
        Ok(Self {
            identity,
            audience,
            expiration,
            clock,
        })
    }

    /// Identity the assertions are issued for
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Unsigned assertion claims for the current time
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] if `expiration` is `Some(0)`.
    pub fn payload(&self, expiration: Option<u64>) -> Result<AssertionPayload> {
        let expiration = match expiration {
            Some(secs) => {
                check_expiration(secs)?;
                secs
            }
            None => self.expiration,
        };

        let now = self.clock.now();
        let subject = self.identity.subject().to_string();
        Ok(AssertionPayload {
            context: JSONLD_CONTEXT.to_string(),
            type_: DAT_REQUEST_TYPE.to_string(),
            iss: subject.clone(),
            sub: subject,
            aud: self.audience.clone(),
            exp: now.saturating_add(expiration),
            nbf: now,
            iat: now,
        })
    }

    /// Sign a fresh assertion
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] for a zero expiration, an
    /// unusable algorithm override, or an algorithm the private key cannot
    /// sign with.
    pub fn build(&self, options: &AssertionOptions) -> Result<String> {
        Ok(self.build_with_payload(options)?.0)
    }

    /// Sign a fresh assertion and return it together with its claims
    ///
    /// # Errors
    ///
    /// Same as [`AssertionBuilder::build`].
    pub fn build_with_payload(&self, options: &AssertionOptions) -> Result<(String, AssertionPayload)> {
        let algorithm = match options.algorithm.as_deref() {
            Some(name) => parse_algorithm(name)?,
            None => self.identity.algorithm(),
        };
        if !self.identity.supports(algorithm) {
            return Err(DapsError::invalid_parameter(
                "algorithm",
                format!("{algorithm:?} does not match the client key"),
            ));
        }

        let payload = self.payload(options.expiration)?;
        let assertion = sign(&self.identity, algorithm, &payload)?;

        debug!(
            subject = %payload.sub,
            audience = %payload.aud,
            exp = payload.exp,
            algorithm = ?algorithm,
            "Signed client assertion"
        );
        Ok((assertion, payload))
    }
}

fn check_expiration(secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(DapsError::invalid_parameter(
            "expiration",
            "expected an integer greater than 0",
        ));
    }
    Ok(())
}

fn sign(identity: &ClientIdentity, algorithm: Algorithm, payload: &AssertionPayload) -> Result<String> {
    jsonwebtoken::encode(&Header::new(algorithm), payload, identity.encoding_key()).map_err(|e| {
        DapsError::invalid_parameter("private_key", format!("failed to sign assertion: {e}"))
    })
}
