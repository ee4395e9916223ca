//! DAT signature and claim verification
//!
//! The verification key is chosen from the DAPS key set by the token's
//! `kid`. A token without `kid` is only accepted when the key set holds a
//! single key.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode, decode_header};
use tracing::{debug, error, warn};

use super::DatClaims;
use super::jwks::JwksCache;
use crate::config::DEFAULT_CLOCK_SKEW_SECS;
use crate::error::{DapsError, Result};

/// Pick the verification key for a token
///
/// # Errors
///
/// Returns [`DapsError::KeySelection`] when no key carries `kid`, or when
/// `kid` is absent and the set does not hold exactly one key.
pub fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid).ok_or_else(|| {
            error!(kid = kid, key_count = jwks.keys.len(), "Key ID not found in JWKS");
            DapsError::KeySelection(format!("no key with kid '{kid}' in JWKS"))
        }),
        None => match jwks.keys.as_slice() {
            [only] => Ok(only),
            [] => Err(DapsError::KeySelection("JWKS contains no keys".to_string())),
            keys => Err(DapsError::KeySelection(format!(
                "token has no kid and JWKS contains {} keys",
                keys.len()
            ))),
        },
    }
}

/// Verifies DATs against the DAPS key set
#[derive(Debug, Clone)]
pub struct DatValidator {
    jwks: Arc<JwksCache>,
    expected_issuer: String,
    expected_audience: Option<String>,
    allowed_algorithms: Vec<Algorithm>,
    clock_skew_leeway: Duration,
}

impl DatValidator {
    /// Create a validator accepting DATs issued by `expected_issuer`
    ///
    /// Defaults: asymmetric algorithms only, 60 seconds clock skew, no
    /// audience check.
    pub fn new(jwks: Arc<JwksCache>, expected_issuer: impl Into<String>) -> Self {
        Self {
            jwks,
            expected_issuer: expected_issuer.into(),
            expected_audience: None,
            allowed_algorithms: vec![
                Algorithm::ES256,
                Algorithm::ES384,
                Algorithm::RS256,
                Algorithm::RS384,
                Algorithm::RS512,
                Algorithm::PS256,
                Algorithm::PS384,
                Algorithm::PS512,
                Algorithm::EdDSA,
            ],
            clock_skew_leeway: Duration::from_secs(DEFAULT_CLOCK_SKEW_SECS),
        }
    }

    /// Set the clock skew tolerance for `exp` and `nbf`
    #[must_use]
    pub fn with_clock_skew(mut self, leeway: Duration) -> Self {
        self.clock_skew_leeway = leeway;
        self
    }

    /// Require `aud` to contain `audience`
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    /// Restrict the accepted algorithms
    ///
    /// Symmetric algorithms are dropped; a DAPS never signs with a shared secret.
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms
            .into_iter()
            .filter(|alg| !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .collect();
        self
    }

    /// Expected issuer
    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// Key set cache
    pub fn jwks(&self) -> &Arc<JwksCache> {
        &self.jwks
    }

    /// Verify a DAT and return its claims
    ///
    /// # Errors
    ///
    /// - [`DapsError::InvalidParameter`] if the token is not a JWT
    /// - [`DapsError::JwksFetch`] if the key set cannot be loaded
    /// - [`DapsError::KeySelection`] if no unique key matches
    /// - [`DapsError::SignatureVerification`] for a bad signature or algorithm
    /// - [`DapsError::ClaimValidation`] for expired, immature or foreign tokens
    pub async fn validate(&self, token: &str) -> Result<DatClaims> {
        self.verify(token, None).await
    }

    /// Verify a DAT and additionally require `sub == subject`
    ///
    /// # Errors
    ///
    /// Same as [`DatValidator::validate`].
    pub async fn validate_for_subject(&self, token: &str, subject: &str) -> Result<DatClaims> {
        self.verify(token, Some(subject)).await
    }

    async fn verify(&self, token: &str, subject: Option<&str>) -> Result<DatClaims> {
        let header = decode_header(token).map_err(|e| {
            debug!(error = %e, "Failed to decode DAT header");
            DapsError::invalid_parameter("token", format!("not a JWT: {e}"))
        })?;

        if !self.allowed_algorithms.contains(&header.alg) {
            error!(
                algorithm = ?header.alg,
                allowed = ?self.allowed_algorithms,
                "DAT algorithm not allowed"
            );
            return Err(DapsError::SignatureVerification(format!(
                "algorithm {:?} not allowed",
                header.alg
            )));
        }

        let jwks = self.jwks.get_keys().await?;
        let jwk = select_key(&jwks, header.kid.as_deref())?;
        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|e| {
            error!(kid = ?header.kid, error = %e, "Failed to create decoding key from JWK");
            DapsError::KeySelection(format!("unusable JWK: {e}"))
        })?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.expected_issuer]);
        match &self.expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(subject) = subject {
            validation.sub = Some(subject.to_string());
            validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        } else {
            validation.set_required_spec_claims(&["exp", "iss"]);
        }
        validation.validate_nbf = true;
        validation.leeway = self.clock_skew_leeway.as_secs();

        let data: TokenData<DatClaims> =
            decode(token, &decoding_key, &validation).map_err(|e| {
                warn!(
                    error = %e,
                    issuer = %self.expected_issuer,
                    kid = ?header.kid,
                    "DAT validation failed"
                );
                map_validation_error(e)
            })?;

        debug!(
            issuer = %data.claims.iss,
            subject = %data.claims.sub,
            algorithm = ?header.alg,
            kid = ?header.kid,
            "DAT validation successful"
        );
        Ok(data.claims)
    }
}

fn map_validation_error(error: jsonwebtoken::errors::Error) -> DapsError {
    match error.kind() {
        ErrorKind::ExpiredSignature => DapsError::ClaimValidation("token has expired".to_string()),
        ErrorKind::ImmatureSignature => {
            DapsError::ClaimValidation("token is not yet valid".to_string())
        }
        ErrorKind::InvalidIssuer => DapsError::ClaimValidation("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => DapsError::ClaimValidation("audience mismatch".to_string()),
        ErrorKind::InvalidSubject => DapsError::ClaimValidation("subject mismatch".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            DapsError::ClaimValidation(format!("missing required claim '{claim}'"))
        }
        ErrorKind::Json(e) => DapsError::ClaimValidation(format!("unexpected claims: {e}")),
        _ => DapsError::SignatureVerification(error.to_string()),
    }
}
