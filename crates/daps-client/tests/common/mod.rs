//! Common test utilities for integration tests
//!
//! A wiremock DAPS that checks the client assertion and issues DATs signed
//! with fixed EC P-256 keys, plus helpers to build clients against it.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use daps_client::{ClientIdentity, DapsClient, DapsConfig, KeyFingerprint, ManualClock};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::SecretString;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{method, path},
};

pub const SKI: &str = "DD:CB:FD:0B:93:84:33:01:11:EB:5D:94:94:88:BE:78:7D:57:FC:4A";
pub const AKI: &str = "keyid:CB:8C:C7:B6:85:79:A8:23:A6:CB:15:AB:17:50:2F:E6:65:43:5D:E8";

/// Connector key (RSA 2048)
pub const CLIENT_KEY: &str = include_str!("../fixtures/client.pem");
pub const CLIENT_PUBLIC_KEY: &str = include_str!("../fixtures/client.pub.pem");

/// DAPS signing keys (EC P-256) and their public coordinates
pub const DAPS_KEY_1: &str = include_str!("../fixtures/daps1.pem");
pub const DAPS_KEY_1_X: &str = "Zogqygmf9vSWx1WX2y6upOYmuXcDpjk8l1HkmHt8WS0";
pub const DAPS_KEY_1_Y: &str = "0F-EhIBPpJ-oAZoodKxoz5mCS_c1A7uz-_pWrnpBWWc";
pub const DAPS_KEY_2: &str = include_str!("../fixtures/daps2.pem");
pub const DAPS_KEY_2_X: &str = "Lb4BvbNarbCvHnHs3e3yMeXbvUOK-VkRPC5jlRaEQcE";
pub const DAPS_KEY_2_Y: &str = "LbFXj1UB6AwAjAvLydTM1m0P2KP_l_c3w_O3ovTC1_M";

pub const DAPS_KID: &str = "daps-1";
pub const DAT_LIFETIME: u64 = 3600;

pub fn subject() -> String {
    format!("{SKI}:{AKI}")
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

pub fn client_identity() -> ClientIdentity {
    let fingerprint = KeyFingerprint::from_parts(SKI, AKI).unwrap();
    DapsConfig::new("http://localhost:4567")
        .load_identity(fingerprint, &SecretString::new(CLIENT_KEY.to_string()))
        .unwrap()
}

/// Public JWK of one of the DAPS keys
pub fn ec_jwk(kid: Option<&str>, x: &str, y: &str) -> Value {
    let mut jwk = json!({
        "kty": "EC",
        "crv": "P-256",
        "use": "sig",
        "alg": "ES256",
        "x": x,
        "y": y,
    });
    if let Some(kid) = kid {
        jwk["kid"] = json!(kid);
    }
    jwk
}

pub fn daps_jwk() -> Value {
    ec_jwk(Some(DAPS_KID), DAPS_KEY_1_X, DAPS_KEY_1_Y)
}

/// Sign `claims` as ES256 with a DAPS key
pub fn mint_token(key_pem: &str, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = kid.map(str::to_string);
    let key = EncodingKey::from_ec_pem(key_pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// DAT claims as issued by the mock DAPS
pub fn dat_claims(issuer: &str, subject: &str, jti: usize) -> Value {
    let now = now();
    json!({
        "@context": "https://w3id.org/idsa/contexts/context.jsonld",
        "@type": "ids:DatPayload",
        "iss": issuer,
        "sub": subject,
        "aud": "idsc:IDS_CONNECTORS_ALL",
        "iat": now,
        "nbf": now,
        "exp": now + DAT_LIFETIME,
        "jti": format!("dat-{jti}"),
        "scope": "idsc:IDS_CONNECTOR_ATTRIBUTES_ALL",
        "securityProfile": "idsc:BASE_SECURITY_PROFILE",
        "referringConnector": "http://connector.example.com",
    })
}

/// Token endpoint that verifies the client assertion and mints DATs
#[derive(Clone)]
pub struct DatResponder {
    issuer: String,
    issued: Arc<AtomicUsize>,
    subject_override: Option<String>,
    delay: Option<Duration>,
}

impl DatResponder {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            issued: Arc::new(AtomicUsize::new(0)),
            subject_override: None,
            delay: None,
        }
    }

    /// Issue DATs for a different subject than the one asserted
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject_override = Some(subject.into());
        self
    }

    /// Delay every response
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of DATs issued so far
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    fn reject(description: &str) -> ResponseTemplate {
        ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_client",
            "error_description": description,
        }))
    }
}

impl Respond for DatResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let form: std::collections::HashMap<String, String> =
            url::form_urlencoded::parse(&request.body).into_owned().collect();

        if form.get("grant_type").map(String::as_str) != Some("client_credentials") {
            return Self::reject("unsupported grant_type");
        }
        if form.get("client_assertion_type").map(String::as_str)
            != Some("urn:ietf:params:oauth:client-assertion-type:jwt-bearer")
        {
            return Self::reject("unsupported client_assertion_type");
        }
        let Some(assertion) = form.get("client_assertion") else {
            return Self::reject("missing client_assertion");
        };

        let key = DecodingKey::from_rsa_pem(CLIENT_PUBLIC_KEY.as_bytes()).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims::<&str>(&[]);
        let claims = match jsonwebtoken::decode::<Value>(assertion, &key, &validation) {
            Ok(data) => data.claims,
            Err(_) => return Self::reject("assertion signature invalid"),
        };
        if claims["iss"] != claims["sub"] || claims["@type"] != "ids:DatRequestToken" {
            return Self::reject("malformed assertion");
        }

        let jti = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let subject = self
            .subject_override
            .clone()
            .unwrap_or_else(|| claims["sub"].as_str().unwrap_or_default().to_string());
        let dat = mint_token(DAPS_KEY_1, Some(DAPS_KID), &dat_claims(&self.issuer, &subject, jti));

        let response = ResponseTemplate::new(200).set_body_json(json!({
            "access_token": dat,
            "token_type": "bearer",
            "expires_in": DAT_LIFETIME,
            "scope": form.get("scope"),
        }));
        match self.delay {
            Some(delay) => response.set_delay(delay),
            None => response,
        }
    }
}

/// Mock DAPS
pub struct MockDaps {
    pub server: MockServer,
    pub issuer: String,
}

impl MockDaps {
    /// Start a DAPS without mounted endpoints
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Self { server, issuer }
    }

    /// Start a DAPS issuing valid DATs and serving its key set
    pub async fn start_default() -> (Self, DatResponder) {
        let daps = Self::start().await;
        let responder = DatResponder::new(&daps.issuer);
        daps.mount_token(responder.clone()).await;
        daps.mount_jwks(vec![daps_jwk()]).await;
        (daps, responder)
    }

    pub async fn mount_token(&self, responder: impl Respond + 'static) {
        self.mount_token_at("/token", responder).await;
    }

    pub async fn mount_token_at(&self, endpoint: &str, responder: impl Respond + 'static) {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(responder)
            .mount(&self.server)
            .await;
    }

    pub async fn mount_jwks(&self, keys: Vec<Value>) {
        self.mount_jwks_at("/.well-known/jwks.json", keys).await;
    }

    pub async fn mount_jwks_at(&self, endpoint: &str, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    pub async fn mount_metadata(&self) {
        self.mount_metadata_with(&self.issuer, "/token", "/.well-known/jwks.json")
            .await;
    }

    /// Metadata naming `issuer` and endpoints below this server
    pub async fn mount_metadata_with(&self, issuer: &str, token_path: &str, jwks_path: &str) {
        let base = &self.issuer;
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "token_endpoint": format!("{base}{token_path}"),
                "jwks_uri": format!("{base}{jwks_path}"),
                "grant_types_supported": ["client_credentials"],
                "token_endpoint_auth_methods_supported": ["private_key_jwt"],
                "token_endpoint_auth_signing_alg_values_supported": ["RS256"],
            })))
            .mount(&self.server)
            .await;
    }

    pub fn config(&self) -> DapsConfig {
        DapsConfig::new(self.server.uri())
    }

    /// Client against this DAPS driven by a manual clock set to now
    pub fn client(&self) -> (DapsClient, Arc<ManualClock>) {
        self.client_with_config(self.config())
    }

    pub fn client_with_config(&self, config: DapsConfig) -> (DapsClient, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now()));
        let client = DapsClient::builder(config, client_identity())
            .clock(clock.clone())
            .build()
            .unwrap();
        (client, clock)
    }

    /// Number of requests received on `endpoint`
    pub async fn requests_to(&self, endpoint: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == endpoint)
            .count()
    }
}
