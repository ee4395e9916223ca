//! Authorization server metadata (RFC 8414)
//!
//! DAPS deployments such as Omejdn publish their token and key set endpoints
//! under `/.well-known/oauth-authorization-server`. The document is fetched
//! on request only; nothing is cached.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DapsError, Result};

/// Largest metadata document accepted
const MAX_METADATA_SIZE: usize = 64 * 1024;

/// OAuth 2.0 Authorization Server Metadata (RFC 8414)
///
/// ```json
/// {
///   "issuer": "https://daps.example.com/auth",
///   "token_endpoint": "https://daps.example.com/auth/token",
///   "jwks_uri": "https://daps.example.com/auth/jwks.json",
///   "grant_types_supported": ["client_credentials"],
///   "token_endpoint_auth_methods_supported": ["private_key_jwt"]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationServerMetadata {
    /// The authorization server's issuer identifier
    pub issuer: String,

    /// URL of the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// URL of the JWK Set document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// Scope values supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// Grant types supported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Client authentication methods at the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// Signing algorithms accepted for `private_key_jwt` assertions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_signing_alg_values_supported: Option<Vec<String>>,

    /// Additional metadata fields
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl AuthorizationServerMetadata {
    /// Whether the server advertises support for `alg` in client assertions
    ///
    /// Servers that do not advertise a list are assumed to accept anything.
    pub fn accepts_assertion_algorithm(&self, alg: &str) -> bool {
        self.token_endpoint_auth_signing_alg_values_supported
            .as_ref()
            .is_none_or(|algs| algs.iter().any(|a| a == alg))
    }
}

/// Fetch and parse the metadata document at `metadata_url`
///
/// # Errors
///
/// Returns [`DapsError::Transport`] if the request fails and
/// [`DapsError::MalformedResponse`] for an error status, an oversized body
/// or a document that does not parse.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    metadata_url: &str,
) -> Result<AuthorizationServerMetadata> {
    debug!(metadata_url = %metadata_url, "Fetching authorization server metadata");

    let mut response = client
        .get(metadata_url)
        .send()
        .await
        .map_err(|e| DapsError::Transport(format!("Request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        warn!(metadata_url = %metadata_url, status = status.as_u16(), "Metadata request rejected");
        return Err(DapsError::MalformedResponse(format!(
            "metadata endpoint returned HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown")
        )));
    }

    let too_large = || {
        DapsError::MalformedResponse(format!("metadata document exceeds {MAX_METADATA_SIZE} bytes"))
    };
    if response
        .content_length()
        .is_some_and(|length| length > MAX_METADATA_SIZE as u64)
    {
        warn!(metadata_url = %metadata_url, "Metadata document too large");
        return Err(too_large());
    }

    // Chunked bodies carry no length; stop reading once over the limit
    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| DapsError::Transport(format!("Failed to read response: {e}")))?
    {
        if body.len() + chunk.len() > MAX_METADATA_SIZE {
            warn!(metadata_url = %metadata_url, "Metadata document too large");
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    serde_json::from_slice(&body)
        .map_err(|e| DapsError::MalformedResponse(format!("Failed to parse metadata: {e}")))
}
