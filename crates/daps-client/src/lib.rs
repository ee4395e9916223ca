//! # DAPS Client - Dynamic Attribute Tokens for IDS connectors
//!
//! Obtains, verifies and caches Dynamic Attribute Tokens (DATs) from an IDS
//! Dynamic Attribute Provisioning Service (DAPS), and attaches them to
//! outgoing requests.
//!
//! ## Flow
//!
//! ```text
//! AssertionBuilder ─▶ TokenExchangeClient ─▶ DatCache ◀─▶ DatValidator ◀─▶ JwksCache
//!                                               ▲
//!                              BearerAgent / BearerLayer
//! ```
//!
//! 1. The connector signs a short-lived client assertion with its private
//!    key (`iss == sub == SKI:keyid:AKI`).
//! 2. The assertion is exchanged at the DAPS token endpoint
//!    (OAuth 2.0 client credentials with a JWT bearer assertion).
//! 3. The returned DAT is verified against the DAPS key set and cached
//!    until less than the minimum lifespan remains.
//! 4. Outgoing requests wait for the DAT and carry it as
//!    `Authorization: Bearer <dat>`.
//!
//! ## Architecture
//!
//! - [`config`] - Serializable configuration and endpoint addresses
//! - [`identity`] - Key fingerprints and the assertion signing key
//! - [`assertion`] - Client assertion claims and signing
//! - [`exchange`] - Token endpoint exchange
//! - [`jwt`] - DAT claims, key set cache and validator
//! - [`cache`] - The cached DAT
//! - [`agent`] - Request deferral and bearer injection
//! - [`tower`] - Tower middleware (feature `tower`)
//! - [`discovery`] - RFC 8414 metadata
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use daps_client::{DapsClient, DapsConfig, KeyFingerprint};
//! use secrecy::SecretString;
//!
//! # async fn run(pem: SecretString) -> daps_client::Result<()> {
//! let config = DapsConfig::new("https://daps.example.com")
//!     .with_token_path("/auth/token")
//!     .with_jwks_path("/auth/jwks.json");
//! let fingerprint = KeyFingerprint::from_parts(
//!     "DD:CB:FD:0B:93:84:33:01:11:EB:5D:94:94:88:BE:78:7D:57:FC:4A",
//!     "keyid:CB:8C:C7:B6:85:79:A8:23:A6:CB:15:AB:17:50:2F:E6:65:43:5D:E8",
//! )?;
//! let identity = config.load_identity(fingerprint, &pem)?;
//! let client = DapsClient::builder(config, identity).build()?;
//!
//! // Served from cache until less than 60 seconds remain
//! let dat = client.get_dat().await?;
//! assert_eq!(dat.claims.sub, client.subject());
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `tower` (default) - [`tower::BearerLayer`] for tower HTTP client stacks

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod agent;
pub mod assertion;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod jwt;

#[cfg(feature = "tower")]
#[cfg_attr(docsrs, doc(cfg(feature = "tower")))]
pub mod tower;

pub use agent::{BearerAgent, Connection, Connector, RequestHandle, RequestState};
pub use assertion::{AssertionBuilder, AssertionOptions, AssertionPayload};
pub use cache::{Dat, DatCache, DatProvider};
pub use client::{DapsClient, DapsClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DapsConfig, DapsEndpoint};
pub use discovery::AuthorizationServerMetadata;
pub use error::{DapsError, Result, TokenEndpointError};
pub use exchange::TokenExchangeClient;
pub use identity::{ClientIdentity, FingerprintError, KeyFingerprint, KeyIdentifier};
pub use jwt::{DatClaims, DatValidator, JwksCache, OneOrMany};
