//! Error types for the DAPS client.
//!
//! Every failure surfaces to the caller of `get_dat`, `validate` or
//! `add_request`. Nothing is retried internally.

use std::fmt;

use thiserror::Error;

use crate::identity::FingerprintError;

/// Result type for DAPS client operations
pub type Result<T> = std::result::Result<T, DapsError>;

/// Rejection reported by the DAPS token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEndpointError {
    /// HTTP status of the response
    pub status: u16,
    /// Canonical reason phrase of the status
    pub status_text: String,
    /// OAuth `error` code, when the body carried one
    pub code: Option<String>,
    /// OAuth `error_description`, when the body carried one
    pub description: Option<String>,
}

impl TokenEndpointError {
    /// Rejection signalled only through the HTTP status
    pub fn from_status(status: http::StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            code: None,
            description: None,
        }
    }

    /// Attach the OAuth error code and description from the response body
    #[must_use]
    pub fn with_oauth_error(mut self, code: impl Into<String>, description: Option<String>) -> Self {
        self.code = Some(code.into());
        self.description = description;
        self
    }
}

impl fmt::Display for TokenEndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.status, self.status_text)?;
        if let Some(code) = &self.code {
            write!(f, " {code}")?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

/// Errors produced by the DAPS client
#[derive(Debug, Clone, Error)]
pub enum DapsError {
    /// A construction or call argument was rejected before any network activity
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Name of the offending parameter
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The SKI/AKI key fingerprint could not be parsed
    #[error("invalid key fingerprint: {0}")]
    Fingerprint(#[from] FingerprintError),

    /// The token endpoint rejected the exchange
    #[error("token endpoint rejected the request: {0}")]
    TokenEndpoint(TokenEndpointError),

    /// The token endpoint answered with an unexpected shape
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The key set could not be fetched or was invalid
    #[error("JWKS fetch failed: {0}")]
    JwksFetch(String),

    /// No key, or more than one candidate key, for the token
    #[error("key selection failed: {0}")]
    KeySelection(String),

    /// The token signature did not verify
    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    /// A registered claim was expired, not yet valid or mismatched
    #[error("claim validation failed: {0}")]
    ClaimValidation(String),

    /// The issued DAT does not belong to this client or DAPS
    #[error("DAT integrity check failed: {0}")]
    DatIntegrity(String),

    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Illegal transition of a pending request
    #[error("invalid request state: {0}")]
    RequestState(String),
}

impl DapsError {
    /// Shorthand for [`DapsError::InvalidParameter`]
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Whether the failure originated at the DAPS or on the wire rather than locally
    pub fn is_remote(&self) -> bool {
        !matches!(
            self,
            DapsError::InvalidParameter { .. }
                | DapsError::Fingerprint(_)
                | DapsError::RequestState(_)
        )
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            DapsError::InvalidParameter { .. } => "invalid_parameter",
            DapsError::Fingerprint(_) => "fingerprint",
            DapsError::TokenEndpoint(_) => "token_endpoint",
            DapsError::MalformedResponse(_) => "malformed_response",
            DapsError::JwksFetch(_) => "jwks_fetch",
            DapsError::KeySelection(_) => "key_selection",
            DapsError::SignatureVerification(_) => "signature_verification",
            DapsError::ClaimValidation(_) => "claim_validation",
            DapsError::DatIntegrity(_) => "dat_integrity",
            DapsError::Transport(_) => "transport",
            DapsError::RequestState(_) => "request_state",
        }
    }
}

impl From<TokenEndpointError> for DapsError {
    fn from(error: TokenEndpointError) -> Self {
        DapsError::TokenEndpoint(error)
    }
}

impl From<std::io::Error> for DapsError {
    fn from(error: std::io::Error) -> Self {
        DapsError::Transport(format!("I/O operation failed: {error}"))
    }
}
