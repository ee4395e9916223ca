//! Key set caching integration tests
//!
//! - Cached key set reused until older than its max-age
//! - Per-call max-age override
//! - Fetch failures surface as `JwksFetch`
//! - Single-flight under concurrency

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{DAPS_KEY_2_X, DAPS_KEY_2_Y, MockDaps, daps_jwk, ec_jwk, now};
use daps_client::{DapsError, JwksCache, ManualClock};
use serde_json::json;
use wiremock::{
    Mock, ResponseTemplate,
    matchers::{method, path},
};

fn cache(daps: &MockDaps, clock: Arc<ManualClock>) -> JwksCache {
    JwksCache::new(
        reqwest::Client::new(),
        format!("{}/.well-known/jwks.json", daps.issuer),
        clock,
    )
    .with_max_age(Duration::from_secs(600))
}

#[tokio::test]
async fn test_key_set_cached_until_max_age() {
    let daps = MockDaps::start().await;
    daps.mount_jwks(vec![daps_jwk()]).await;
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = cache(&daps, clock.clone());

    let first = cache.get_keys().await.unwrap();
    assert!(first.find("daps-1").is_some());

    clock.advance(Duration::from_secs(600));
    cache.get_keys().await.unwrap();
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 1);

    clock.advance(Duration::from_secs(1));
    cache.get_keys().await.unwrap();
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 2);
}

#[tokio::test]
async fn test_max_age_override() {
    let daps = MockDaps::start().await;
    daps.mount_jwks(vec![daps_jwk()]).await;
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = cache(&daps, clock.clone());

    cache.get_keys().await.unwrap();
    clock.advance(Duration::from_secs(30));

    cache
        .get_keys_with_max_age(Some(Duration::from_secs(60)))
        .await
        .unwrap();
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 1);

    cache
        .get_keys_with_max_age(Some(Duration::from_secs(10)))
        .await
        .unwrap();
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 2);
}

#[tokio::test]
async fn test_refresh_and_clear() {
    let daps = MockDaps::start().await;
    daps.mount_jwks(vec![daps_jwk()]).await;
    let cache = cache(&daps, Arc::new(ManualClock::new(1_000)));

    cache.get_keys().await.unwrap();
    cache.refresh().await.unwrap();
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 2);

    cache.clear().await;
    cache.get_keys().await.unwrap();
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 3);
}

#[tokio::test]
async fn test_rotated_key_picked_up_after_max_age() {
    let daps = MockDaps::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [daps_jwk()] })))
        .up_to_n_times(1)
        .mount(&daps.server)
        .await;
    daps.mount_jwks(vec![ec_jwk(Some("daps-2"), DAPS_KEY_2_X, DAPS_KEY_2_Y)])
        .await;
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = cache(&daps, clock.clone());

    assert!(cache.get_keys().await.unwrap().find("daps-1").is_some());
    clock.advance(Duration::from_secs(601));
    let rotated = cache.get_keys().await.unwrap();
    assert!(rotated.find("daps-1").is_none());
    assert!(rotated.find("daps-2").is_some());
}

#[tokio::test]
async fn test_fetch_failures() {
    let responses = [
        ResponseTemplate::new(500),
        ResponseTemplate::new(200).set_body_string("<html></html>"),
        ResponseTemplate::new(200).set_body_json(json!({ "issuer": "x" })),
        ResponseTemplate::new(200).set_body_json(json!({ "keys": {} })),
    ];

    for response in responses {
        let daps = MockDaps::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/jwks.json"))
            .respond_with(response)
            .mount(&daps.server)
            .await;
        let cache = cache(&daps, Arc::new(ManualClock::new(1_000)));

        let result = cache.get_keys().await;
        assert!(matches!(result, Err(DapsError::JwksFetch(_))), "got {result:?}");
    }
}

#[tokio::test]
async fn test_stale_key_set_not_served_when_refetch_fails() {
    let daps = MockDaps::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": [daps_jwk()] })))
        .up_to_n_times(1)
        .mount(&daps.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&daps.server)
        .await;
    let clock = Arc::new(ManualClock::new(1_000));
    let cache = cache(&daps, clock.clone());

    cache.get_keys().await.unwrap();
    clock.advance(Duration::from_secs(601));
    assert!(matches!(
        cache.get_keys().await,
        Err(DapsError::JwksFetch(_))
    ));
}

#[tokio::test]
async fn test_concurrent_cold_cache_single_fetch() {
    let daps = MockDaps::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "keys": [daps_jwk()] }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&daps.server)
        .await;
    let cache = Arc::new(cache(&daps, Arc::new(ManualClock::new(now()))));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_keys().await })
        })
        .collect();
    for joined in futures::future::join_all(tasks).await {
        assert_eq!(joined.unwrap().unwrap().keys.len(), 1);
    }
    assert_eq!(daps.requests_to("/.well-known/jwks.json").await, 1);
}
