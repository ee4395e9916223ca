//! DAT validation edge cases
//!
//! Key selection, signature and claim failures against a mock key set.

mod common;

use std::sync::Arc;

use common::{
    DAPS_KEY_1, DAPS_KEY_1_X, DAPS_KEY_1_Y, DAPS_KEY_2, DAPS_KEY_2_X, DAPS_KEY_2_Y, MockDaps,
    dat_claims, ec_jwk, mint_token, now, subject,
};
use daps_client::{DapsError, DatValidator, JwksCache, SystemClock};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::json;

async fn validator_with_keys(keys: Vec<serde_json::Value>) -> (MockDaps, DatValidator) {
    let daps = MockDaps::start().await;
    daps.mount_jwks(keys).await;
    let jwks = Arc::new(JwksCache::new(
        reqwest::Client::new(),
        format!("{}/.well-known/jwks.json", daps.issuer),
        Arc::new(SystemClock),
    ));
    let validator = DatValidator::new(jwks, daps.issuer.clone());
    (daps, validator)
}

fn two_keys() -> Vec<serde_json::Value> {
    vec![
        ec_jwk(Some("daps-1"), DAPS_KEY_1_X, DAPS_KEY_1_Y),
        ec_jwk(Some("daps-2"), DAPS_KEY_2_X, DAPS_KEY_2_Y),
    ]
}

#[tokio::test]
async fn test_select_by_kid_among_many() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let token = mint_token(DAPS_KEY_2, Some("daps-2"), &dat_claims(&daps.issuer, &subject(), 1));

    let claims = validator.validate(&token).await.unwrap();
    assert_eq!(claims.jti.as_deref(), Some("dat-1"));
}

#[tokio::test]
async fn test_single_key_without_kid() {
    let (daps, validator) =
        validator_with_keys(vec![ec_jwk(None, DAPS_KEY_1_X, DAPS_KEY_1_Y)]).await;
    let token = mint_token(DAPS_KEY_1, None, &dat_claims(&daps.issuer, &subject(), 1));

    assert!(validator.validate(&token).await.is_ok());
}

#[tokio::test]
async fn test_unknown_kid_is_key_selection_error() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let token = mint_token(DAPS_KEY_1, Some("daps-9"), &dat_claims(&daps.issuer, &subject(), 1));

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::KeySelection(_))
    ));
}

#[tokio::test]
async fn test_many_keys_without_kid_is_key_selection_error() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let token = mint_token(DAPS_KEY_1, None, &dat_claims(&daps.issuer, &subject(), 1));

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::KeySelection(_))
    ));
}

#[tokio::test]
async fn test_wrong_key_is_signature_error() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    // Signed with key 2 but claims to be key 1
    let token = mint_token(DAPS_KEY_2, Some("daps-1"), &dat_claims(&daps.issuer, &subject(), 1));

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::SignatureVerification(_))
    ));
}

#[tokio::test]
async fn test_expired_dat() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let mut claims = dat_claims(&daps.issuer, &subject(), 1);
    claims["iat"] = json!(now() - 7200);
    claims["nbf"] = json!(now() - 7200);
    claims["exp"] = json!(now() - 3600);
    let token = mint_token(DAPS_KEY_1, Some("daps-1"), &claims);

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::ClaimValidation(_))
    ));
}

#[tokio::test]
async fn test_expiry_within_clock_skew_accepted() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let mut claims = dat_claims(&daps.issuer, &subject(), 1);
    claims["exp"] = json!(now() - 10);
    let token = mint_token(DAPS_KEY_1, Some("daps-1"), &claims);

    assert!(validator.validate(&token).await.is_ok());
}

#[tokio::test]
async fn test_not_yet_valid_dat() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let mut claims = dat_claims(&daps.issuer, &subject(), 1);
    claims["nbf"] = json!(now() + 3000);
    let token = mint_token(DAPS_KEY_1, Some("daps-1"), &claims);

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::ClaimValidation(_))
    ));
}

#[tokio::test]
async fn test_wrong_issuer() {
    let (_daps, validator) = validator_with_keys(two_keys()).await;
    let token = mint_token(
        DAPS_KEY_1,
        Some("daps-1"),
        &dat_claims("https://other-daps.example.com", &subject(), 1),
    );

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::ClaimValidation(_))
    ));
}

#[tokio::test]
async fn test_subject_check() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let token = mint_token(DAPS_KEY_1, Some("daps-1"), &dat_claims(&daps.issuer, &subject(), 1));

    assert!(validator.validate_for_subject(&token, &subject()).await.is_ok());
    assert!(matches!(
        validator
            .validate_for_subject(&token, "AA:BB:keyid:CC:DD")
            .await,
        Err(DapsError::ClaimValidation(_))
    ));
}

#[tokio::test]
async fn test_missing_subject_claim() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let mut claims = dat_claims(&daps.issuer, &subject(), 1);
    claims.as_object_mut().unwrap().remove("sub");
    let token = mint_token(DAPS_KEY_1, Some("daps-1"), &claims);

    assert!(matches!(
        validator.validate_for_subject(&token, &subject()).await,
        Err(DapsError::ClaimValidation(_))
    ));
}

#[tokio::test]
async fn test_audience_check_when_configured() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let token = mint_token(DAPS_KEY_1, Some("daps-1"), &dat_claims(&daps.issuer, &subject(), 1));

    let strict = validator.clone().with_audience("idsc:IDS_CONNECTORS_ALL");
    assert!(strict.validate(&token).await.is_ok());

    let other = validator.with_audience("https://broker.example.com");
    assert!(matches!(
        other.validate(&token).await,
        Err(DapsError::ClaimValidation(_))
    ));
}

#[tokio::test]
async fn test_symmetric_algorithm_rejected() {
    let (daps, validator) = validator_with_keys(two_keys()).await;
    let token = jsonwebtoken::encode(
        &Header::default(),
        &dat_claims(&daps.issuer, &subject(), 1),
        &EncodingKey::from_secret(b"shared-secret"),
    )
    .unwrap();

    assert!(matches!(
        validator.validate(&token).await,
        Err(DapsError::SignatureVerification(_))
    ));
    // Rejected before the key set is consulted
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 0);
}

#[tokio::test]
async fn test_garbage_token() {
    let (_daps, validator) = validator_with_keys(two_keys()).await;

    assert!(matches!(
        validator.validate("not-a-jwt").await,
        Err(DapsError::InvalidParameter { .. })
    ));
}
