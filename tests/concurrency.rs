//! Concurrent admission must never exceed the quota.

use std::sync::Arc;

use futures::future::join_all;
use redlimit::clock::ManualClock;
use redlimit::ratelimit::{
    HandlerMeta, KeyGeneratorRegistry, LimiterRegistry, LimiterType, RateLimitInterceptor,
    RateLimitPolicy, RequestContext,
};
use redlimit::store::MemoryStore;

const TASKS: usize = 100;
const MAX_ATTEMPTS: u32 = 10;

fn interceptor() -> Arc<RateLimitInterceptor> {
    // Frozen clock: no window rolls over and no token refills mid-test
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    Arc::new(RateLimitInterceptor::new(
        Arc::new(LimiterRegistry::with_store(store, clock, "concurrency:")),
        Arc::new(KeyGeneratorRegistry::new()),
    ))
}

async fn admitted_count(interceptor: Arc<RateLimitInterceptor>, limiter_type: LimiterType) -> usize {
    let request = Arc::new(
        RequestContext::new("GET", "/api/search").with_handler(
            HandlerMeta::new("search::query")
                .with_method_policy(RateLimitPolicy::new(limiter_type, MAX_ATTEMPTS, 60)),
        ),
    );

    let handles = (0..TASKS).map(|_| {
        let interceptor = interceptor.clone();
        let request = request.clone();
        tokio::spawn(async move { interceptor.pre_handle(&request).await })
    });

    let mut admitted = 0;
    for result in join_all(handles).await {
        match result.unwrap() {
            Ok(_) => admitted += 1,
            Err(err) => assert!(err.is_quota_exceeded(), "unexpected error: {}", err),
        }
    }
    admitted
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_fixed_window_admits_exactly_max_under_contention() {
    assert_eq!(
        admitted_count(interceptor(), LimiterType::FixedWindow).await,
        MAX_ATTEMPTS as usize
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_sliding_window_admits_exactly_max_under_contention() {
    assert_eq!(
        admitted_count(interceptor(), LimiterType::SlidingWindow).await,
        MAX_ATTEMPTS as usize
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_token_bucket_admits_exactly_max_under_contention() {
    assert_eq!(
        admitted_count(interceptor(), LimiterType::TokenBucket).await,
        MAX_ATTEMPTS as usize
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_limiter_types_share_one_store_without_interference() {
    let interceptor = interceptor();
    let counts = join_all(
        LimiterType::ALL
            .into_iter()
            .map(|limiter_type| admitted_count(interceptor.clone(), limiter_type)),
    )
    .await;

    assert_eq!(counts, vec![MAX_ATTEMPTS as usize; 3]);
}
