mod common;

use std::time::Duration;

use syncache_core::{Method, RequestParams};
use syncache_engine::{EngineConfig, EntryState, IntervalPolicy, ResourceOptions};

use common::{MockApi, client, client_with, settle};

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

#[tokio::test(start_paused = true)]
async fn test_most_eager_subscriber_governs_polling() {
    let api = MockApi::new();
    let client = client(&api);
    let params = RequestParams::new();

    let slow = client
        .use_resource(Method::Get, "/items", &params, ResourceOptions::new().poll_interval_ms(1000))
        .unwrap();
    let fast = client
        .use_resource(Method::Get, "/items", &params, ResourceOptions::new().poll_interval_ms(500))
        .unwrap();
    let key = slow.key().clone();

    settle().await;
    assert_eq!(api.reads(), 1);
    assert_eq!(client.scheduler().scheduled_interval(&key), Some(ms(500)));

    tokio::time::sleep(ms(510)).await;
    assert_eq!(api.reads(), 2);
    tokio::time::sleep(ms(500)).await;
    assert_eq!(api.reads(), 3);

    // The remaining subscriber's interval takes over
    drop(fast);
    assert_eq!(client.scheduler().scheduled_interval(&key), Some(ms(1000)));

    tokio::time::sleep(ms(600)).await;
    assert_eq!(api.reads(), 3);
    tokio::time::sleep(ms(410)).await;
    assert_eq!(api.reads(), 4);

    drop(slow);
    assert!(!client.scheduler().is_scheduled(&key));
    tokio::time::sleep(ms(5000)).await;
    assert_eq!(api.reads(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_max_policy_uses_least_eager_interval() {
    let api = MockApi::new();
    let config = EngineConfig {
        interval_policy: IntervalPolicy::Max,
        ..EngineConfig::default()
    };
    let client = client_with(&api, config);
    let params = RequestParams::new();

    let _slow = client
        .use_resource(Method::Get, "/items", &params, ResourceOptions::new().poll_interval_ms(1000))
        .unwrap();
    let fast = client
        .use_resource(Method::Get, "/items", &params, ResourceOptions::new().poll_interval_ms(500))
        .unwrap();

    assert_eq!(
        client.scheduler().scheduled_interval(fast.key()),
        Some(ms(1000))
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscriber_without_interval_does_not_poll() {
    let api = MockApi::new();
    let client = client(&api);

    let handle = client
        .use_resource(Method::Get, "/items", &RequestParams::new(), ResourceOptions::new())
        .unwrap();

    assert!(!client.scheduler().is_scheduled(handle.key()));
    tokio::time::sleep(ms(10_000)).await;
    assert_eq!(api.reads(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_fetch_keeps_polling() {
    let api = MockApi::new();
    api.fail_reads(true);
    let client = client(&api);

    let mut handle = client
        .use_resource(
            Method::Post,
            "/logical-things",
            &RequestParams::new(),
            ResourceOptions::new().poll_interval_ms(100),
        )
        .unwrap();

    tokio::time::sleep(ms(350)).await;
    assert_eq!(api.reads(), 4);

    let state = handle.state();
    assert_eq!(state.state, EntryState::Failed);
    assert_eq!(state.error.and_then(|e| e.status_code()), Some(503));
    assert!(client.scheduler().is_scheduled(handle.key()));

    // The next tick recovers
    api.fail_reads(false);
    tokio::time::sleep(ms(100)).await;
    let state = handle.state();
    assert_eq!(state.state, EntryState::Fresh);
    assert!(state.error.is_none());
    assert!(state.data.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_slow_request_is_joined_by_ticks() {
    let api = MockApi::new();
    api.set_delay(ms(250));
    let client = client(&api);

    let _handle = client
        .use_resource(
            Method::Get,
            "/items",
            &RequestParams::new(),
            ResourceOptions::new().poll_interval_ms(100),
        )
        .unwrap();

    // The tick at 100 joins the request started on subscribe
    tokio::time::sleep(ms(240)).await;
    assert_eq!(api.calls_for("GET /items"), 1);
    assert_eq!(client.metrics().joins(), 1);
}
