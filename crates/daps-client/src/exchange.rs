//! Client-credentials exchange at the DAPS token endpoint
//!
//! The signed client assertion is posted form-encoded and the DAPS answers
//! with `{"access_token": "<DAT>", ...}` or an OAuth error object.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::assertion::{AssertionBuilder, AssertionOptions};
use crate::clock::Clock;
use crate::error::{DapsError, Result, TokenEndpointError};

/// OAuth grant type of the exchange
pub const GRANT_TYPE: &str = "client_credentials";

/// Client assertion type for JWT bearer assertions (RFC 7523)
pub const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Content type of the token request
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// A cached assertion is re-signed once it is this close to expiry
pub const ASSERTION_REUSE_BUFFER_SECS: u64 = 60;

/// Build the reqwest client used for DAPS requests
///
/// Redirects are not followed; the token endpoint must answer directly.
///
/// # Errors
///
/// Returns [`DapsError::Transport`] if the TLS backend fails to initialize.
pub fn default_http_client(timeout: Option<Duration>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| DapsError::Transport(format!("Failed to build HTTP client: {e}")))
}

/// Form-encoded token request body for `assertion`
pub fn request_body(assertion: &str, scope: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", GRANT_TYPE)
        .append_pair("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
        .append_pair("client_assertion", assertion)
        .append_pair("scope", scope)
        .finish()
}

/// Fields of a token endpoint response this client reads
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedAssertion {
    assertion: String,
    exp: u64,
}

/// Exchanges client assertions for DATs
#[derive(Debug)]
pub struct TokenExchangeClient {
    http: reqwest::Client,
    token_url: String,
    scope: String,
    builder: AssertionBuilder,
    clock: Arc<dyn Clock>,
    last_assertion: Mutex<Option<CachedAssertion>>,
}

impl TokenExchangeClient {
    /// Create an exchange client posting to `token_url`
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        scope: impl Into<String>,
        builder: AssertionBuilder,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            scope: scope.into(),
            builder,
            clock,
            last_assertion: Mutex::new(None),
        }
    }

    /// Token endpoint URL
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Requested scope
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Assertion builder
    pub fn assertion_builder(&self) -> &AssertionBuilder {
        &self.builder
    }

    /// Token request body for `assertion`
    pub fn request_body(&self, assertion: &str) -> String {
        request_body(assertion, &self.scope)
    }

    /// Client assertion for the next exchange
    ///
    /// With default options the previous assertion is reused until it is
    /// within [`ASSERTION_REUSE_BUFFER_SECS`] of its expiry. Overrides always
    /// produce a freshly signed assertion.
    ///
    /// # Errors
    ///
    /// Propagates [`AssertionBuilder::build`] failures.
    pub fn assertion(&self, options: &AssertionOptions) -> Result<String> {
        if !options.is_default() {
            return self.builder.build(options);
        }

        let now = self.clock.now();
        let mut last = self.last_assertion.lock();
        if let Some(cached) = last.as_ref()
            && cached.exp > now.saturating_add(ASSERTION_REUSE_BUFFER_SECS)
        {
            debug!(exp = cached.exp, "Reusing client assertion");
            return Ok(cached.assertion.clone());
        }

        let (assertion, payload) = self.builder.build_with_payload(options)?;
        *last = Some(CachedAssertion {
            assertion: assertion.clone(),
            exp: payload.exp,
        });
        Ok(assertion)
    }

    /// Request a DAT, signing or reusing a client assertion
    ///
    /// # Errors
    ///
    /// See [`TokenExchangeClient::exchange`].
    pub async fn fetch_dat(&self, options: &AssertionOptions) -> Result<String> {
        let assertion = self.assertion(options)?;
        self.exchange(&assertion).await
    }

    /// Exchange a signed assertion for a DAT
    ///
    /// # Errors
    ///
    /// - [`DapsError::Transport`] if the endpoint cannot be reached
    /// - [`DapsError::TokenEndpoint`] for an error status or an OAuth error body
    /// - [`DapsError::MalformedResponse`] if the body is not JSON or lacks a
    ///   non-empty `access_token`
    pub async fn exchange(&self, assertion: &str) -> Result<String> {
        info!(token_url = %self.token_url, scope = %self.scope, "Requesting DAT");

        let response = self
            .http
            .post(&self.token_url)
            .header(http::header::CONTENT_TYPE, FORM_CONTENT_TYPE)
            .header(http::header::ACCEPT, "application/json")
            .body(self.request_body(assertion))
            .send()
            .await
            .map_err(|e| {
                error!(token_url = %self.token_url, error = %e, "Token request failed");
                DapsError::Transport(format!("Token request failed: {e}"))
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| DapsError::Transport(format!("Failed to read token response: {e}")))?;

        if !status.is_success() {
            let mut rejection = TokenEndpointError::from_status(status);
            if let Ok(TokenResponse {
                error: Some(code),
                error_description,
                ..
            }) = serde_json::from_slice::<TokenResponse>(&body)
            {
                rejection = rejection.with_oauth_error(code, error_description);
            }
            warn!(token_url = %self.token_url, error = %rejection, "Token endpoint rejected request");
            return Err(rejection.into());
        }

        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(|e| {
            DapsError::MalformedResponse(format!("token response is not a JSON object: {e}"))
        })?;

        if let Some(code) = parsed.error {
            let rejection =
                TokenEndpointError::from_status(status).with_oauth_error(code, parsed.error_description);
            warn!(token_url = %self.token_url, error = %rejection, "Token endpoint returned an error");
            return Err(rejection.into());
        }

        match parsed.access_token {
            Some(serde_json::Value::String(token)) if !token.is_empty() => {
                debug!(token_url = %self.token_url, "Received DAT");
                Ok(token)
            }
            Some(_) => Err(DapsError::MalformedResponse(
                "access_token is not a non-empty string".to_string(),
            )),
            None => Err(DapsError::MalformedResponse(
                "response has no access_token".to_string(),
            )),
        }
    }
}
