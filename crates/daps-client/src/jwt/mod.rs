//! DAT verification infrastructure
//!
//! ```text
//!   DatValidator ──▶ JwksCache ──▶ GET <jwks_url>
//!        │
//!        ▼
//!   DatClaims (registered claims + IDS attributes)
//! ```
//!
//! - `jwks` - key set fetching and caching
//! - `validator` - key selection, signature and claim verification

pub mod jwks;
pub mod validator;

pub use jwks::JwksCache;
pub use validator::DatValidator;

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A claim that may be a single value or a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Single value
    One(T),
    /// List of values
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Iterate over the contained values
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::One(value) => std::slice::from_ref(value).iter(),
            Self::Many(values) => values.iter(),
        }
    }
}

impl<T: PartialEq> OneOrMany<T> {
    /// Whether `value` is among the contained values
    pub fn contains(&self, value: &T) -> bool {
        self.iter().any(|v| v == value)
    }
}

/// Claims of a Dynamic Attribute Token
///
/// Registered JWT claims plus the attributes the DAPS asserts about the
/// connector. Unknown claims are kept in `additional`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatClaims {
    /// JSON-LD context
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,

    /// JSON-LD type, usually `ids:DatPayload`
    #[serde(rename = "@type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Issuer, the DAPS
    pub iss: String,

    /// Subject, the connector's `SKI:keyid:AKI`
    pub sub: String,

    /// Audience
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<OneOrMany<String>>,

    /// Expiry (seconds since epoch)
    pub exp: u64,

    /// Not before (seconds since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,

    /// Issued at (seconds since epoch)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,

    /// Token identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Granted scopes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<OneOrMany<String>>,

    /// Security profile of the connector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_profile: Option<String>,

    /// Connector self-description URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referring_connector: Option<String>,

    /// SHA-256 fingerprints of the connector's transport certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_certs_sha256: Option<OneOrMany<String>>,

    /// Extended security guarantees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_guarantee: Option<String>,

    /// Any other claims
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl DatClaims {
    /// Expiry as a timestamp
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        timestamp(self.exp)
    }

    /// Issue time as a timestamp
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.iat.and_then(timestamp)
    }

    /// Seconds until expiry at `now`, zero once expired
    pub fn remaining_lifetime(&self, now: u64) -> u64 {
        self.exp.saturating_sub(now)
    }

    /// Whether `scope` was granted
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_ref()
            .is_some_and(|scopes| scopes.iter().any(|s| s == scope))
    }
}

fn timestamp(secs: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(i64::try_from(secs).ok()?, 0).single()
}
