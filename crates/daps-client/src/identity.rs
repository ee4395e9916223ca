//! Client identity: key fingerprint and assertion signing key
//!
//! A connector is known to the DAPS by the Subject Key Identifier (SKI) and
//! Authority Key Identifier (AKI) of its certificate. Both are 20-byte
//! fingerprints written as colon-separated hex pairs; the AKI carries a
//! `keyid:` prefix. Joined as `SKI:keyid:AKI` they form the subject the
//! client asserts in every token request.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use jsonwebtoken::{Algorithm, EncodingKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::error::{DapsError, Result};

/// Number of bytes in a key identifier
pub const KEY_IDENTIFIER_LEN: usize = 20;

const KEYID_PREFIX: &str = "keyid:";

/// Key identifier parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FingerprintError {
    /// Wrong number of hex pairs
    #[error("expected {expected} hex pairs, found {found}")]
    PairCount {
        /// Required pair count
        expected: usize,
        /// Pairs present in the input
        found: usize,
    },

    /// A segment is not a two-digit hex number
    #[error("invalid hex pair '{pair}' at position {position}")]
    InvalidPair {
        /// Zero-based index of the segment
        position: usize,
        /// The offending segment
        pair: String,
    },

    /// The authority key identifier lacks its `keyid:` prefix
    #[error("authority key identifier must start with 'keyid:'")]
    MissingKeyIdPrefix,
}

/// A 20-byte certificate key identifier (`AA:BB:...`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyIdentifier([u8; KEY_IDENTIFIER_LEN]);

impl KeyIdentifier {
    /// Wrap raw identifier bytes
    pub fn from_bytes(bytes: [u8; KEY_IDENTIFIER_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8; KEY_IDENTIFIER_LEN] {
        &self.0
    }
}

impl FromStr for KeyIdentifier {
    type Err = FingerprintError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let pairs: Vec<&str> = s.split(':').collect();
        if pairs.len() != KEY_IDENTIFIER_LEN {
            return Err(FingerprintError::PairCount {
                expected: KEY_IDENTIFIER_LEN,
                found: pairs.len(),
            });
        }

        let mut bytes = [0u8; KEY_IDENTIFIER_LEN];
        for (position, pair) in pairs.iter().enumerate() {
            if pair.len() != 2 || !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(FingerprintError::InvalidPair {
                    position,
                    pair: (*pair).to_string(),
                });
            }
            bytes[position] =
                u8::from_str_radix(pair, 16).map_err(|_| FingerprintError::InvalidPair {
                    position,
                    pair: (*pair).to_string(),
                })?;
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for KeyIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// SKI/AKI pair identifying a connector at the DAPS
///
/// Parsing is case-insensitive, but the text is kept as configured: the
/// DAPS matches the client subject as an exact string. Equality and
/// hashing compare the identifier bytes only.
///
/// # Example
///
/// ```rust
/// use daps_client::KeyFingerprint;
///
/// let ski = "DD:CB:FD:0B:93:84:33:01:11:EB:5D:94:94:88:BE:78:7D:57:FC:4A";
/// let aki = "keyid:CB:8C:C7:B6:85:79:A8:23:A6:CB:15:AB:17:50:2F:E6:65:43:5D:E8";
///
/// let fingerprint = KeyFingerprint::from_parts(ski, aki)?;
/// assert_eq!(fingerprint.to_string(), format!("{ski}:{aki}"));
/// # Ok::<(), daps_client::FingerprintError>(())
/// ```
#[derive(Debug, Clone)]
pub struct KeyFingerprint {
    ski: KeyIdentifier,
    aki: KeyIdentifier,
    text: String,
}

impl KeyFingerprint {
    /// Create a fingerprint from already parsed identifiers
    ///
    /// The text form uses upper-case hex.
    pub fn new(ski: KeyIdentifier, aki: KeyIdentifier) -> Self {
        Self {
            text: format!("{ski}:{KEYID_PREFIX}{aki}"),
            ski,
            aki,
        }
    }

    /// Parse the SKI (`AA:BB:...`) and the AKI (`keyid:AA:BB:...`) separately
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError`] if either identifier is malformed or the
    /// AKI lacks its `keyid:` prefix.
    pub fn from_parts(ski: &str, aki: &str) -> std::result::Result<Self, FingerprintError> {
        let aki_hex = strip_keyid_prefix(aki).ok_or(FingerprintError::MissingKeyIdPrefix)?;
        Ok(Self {
            ski: ski.parse()?,
            aki: aki_hex.parse()?,
            text: format!("{ski}:{aki}"),
        })
    }

    /// The `SKI:keyid:AKI` text as configured
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Subject key identifier
    pub fn ski(&self) -> &KeyIdentifier {
        &self.ski
    }

    /// Authority key identifier
    pub fn aki(&self) -> &KeyIdentifier {
        &self.aki
    }
}

impl PartialEq for KeyFingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.ski == other.ski && self.aki == other.aki
    }
}

impl Eq for KeyFingerprint {}

impl Hash for KeyFingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ski.hash(state);
        self.aki.hash(state);
    }
}

fn strip_keyid_prefix(s: &str) -> Option<&str> {
    let head = s.get(..KEYID_PREFIX.len())?;
    head.eq_ignore_ascii_case(KEYID_PREFIX)
        .then(|| &s[KEYID_PREFIX.len()..])
}

impl FromStr for KeyFingerprint {
    type Err = FingerprintError;

    /// Parse the combined `SKI:keyid:AKI` form
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let separator = format!(":{KEYID_PREFIX}");
        let index = s
            .to_ascii_lowercase()
            .find(&separator)
            .ok_or(FingerprintError::MissingKeyIdPrefix)?;

        Self::from_parts(&s[..index], &s[index + 1..])
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for KeyFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for KeyFingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Key material families usable for asymmetric JWT signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA keys (RS*, PS*)
    Rsa,
    /// Elliptic-curve keys (ES*)
    Ec,
    /// Edwards-curve keys (EdDSA)
    Ed,
}

impl KeyFamily {
    /// Family an algorithm signs with, `None` for symmetric algorithms
    pub fn of(algorithm: Algorithm) -> Option<Self> {
        match algorithm {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(Self::Ec),
            Algorithm::EdDSA => Some(Self::Ed),
            _ => None,
        }
    }
}

/// Parse a JWS algorithm name such as `RS256`
///
/// # Errors
///
/// Returns [`DapsError::InvalidParameter`] for empty, unknown or symmetric algorithms.
pub fn parse_algorithm(name: &str) -> Result<Algorithm> {
    if name.trim().is_empty() {
        return Err(DapsError::invalid_parameter(
            "algorithm",
            "expected a non-empty algorithm name",
        ));
    }
    let algorithm = Algorithm::from_str(name).map_err(|e| {
        DapsError::invalid_parameter("algorithm", format!("unknown algorithm '{name}': {e}"))
    })?;
    if KeyFamily::of(algorithm).is_none() {
        return Err(DapsError::invalid_parameter(
            "algorithm",
            format!("'{name}' is not an asymmetric signature algorithm"),
        ));
    }
    Ok(algorithm)
}

/// The connector's identity towards the DAPS
///
/// Holds the key fingerprint that forms the assertion subject and the
/// private key the client assertion is signed with. Immutable once built.
#[derive(Clone)]
pub struct ClientIdentity {
    fingerprint: KeyFingerprint,
    subject: String,
    encoding_key: EncodingKey,
    key_family: KeyFamily,
    algorithm: Algorithm,
}

impl ClientIdentity {
    /// Build an identity from a PEM encoded private key
    ///
    /// The key family is taken from `algorithm`: RSA for RS*/PS*, EC for
    /// ES*, Ed25519 for EdDSA.
    ///
    /// # Errors
    ///
    /// Returns [`DapsError::InvalidParameter`] if the algorithm is symmetric
    /// or the PEM does not hold a private key of the matching family.
    pub fn from_pem(
        fingerprint: KeyFingerprint,
        private_key_pem: &SecretString,
        algorithm: Algorithm,
    ) -> Result<Self> {
        let key_family = KeyFamily::of(algorithm).ok_or_else(|| {
            DapsError::invalid_parameter(
                "algorithm",
                format!("{algorithm:?} is not an asymmetric signature algorithm"),
            )
        })?;

        let pem = private_key_pem.expose_secret().as_bytes();
        let encoding_key = match key_family {
            KeyFamily::Rsa => EncodingKey::from_rsa_pem(pem),
            KeyFamily::Ec => EncodingKey::from_ec_pem(pem),
            KeyFamily::Ed => EncodingKey::from_ed_pem(pem),
        }
        .map_err(|e| {
            DapsError::invalid_parameter("private_key", format!("not a {key_family:?} private key: {e}"))
        })?;

        Ok(Self {
            subject: fingerprint.as_str().to_string(),
            fingerprint,
            encoding_key,
            key_family,
            algorithm,
        })
    }

    /// Key fingerprint
    pub fn fingerprint(&self) -> &KeyFingerprint {
        &self.fingerprint
    }

    /// Subject identifier (`SKI:keyid:AKI`) used as `iss` and `sub`
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Default signing algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Whether the private key can produce signatures for `algorithm`
    pub fn supports(&self, algorithm: Algorithm) -> bool {
        KeyFamily::of(algorithm) == Some(self.key_family)
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

// Manual Debug impl to keep key material out of logs
impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("subject", &self.subject)
            .field("key_family", &self.key_family)
            .field("algorithm", &self.algorithm)
            .field("encoding_key", &"<redacted>")
            .finish()
    }
}
