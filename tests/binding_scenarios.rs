//! Integration Tests for Cache Bindings
//!
//! End-to-end behaviour of bindings against one shared manager: hits,
//! stale-while-revalidate, fetch deduplication, failure handling and fan-out.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use portal_cache::cache::Params;
use portal_cache::{CacheError, CacheManager, CacheOptions};
use serde_json::json;
use tokio::sync::oneshot;
use tokio_test::{assert_pending, task};

// == Helper Functions ==

type UsersFetcher =
    Box<dyn Fn(Params) -> BoxFuture<'static, anyhow::Result<Vec<String>>> + Send + Sync>;

/// Fetcher returning `value` and counting its invocations.
fn counting(calls: &Arc<AtomicUsize>, value: &[&str]) -> UsersFetcher {
    let calls = Arc::clone(calls);
    let value: Vec<String> = value.iter().map(|s| s.to_string()).collect();
    Box::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        let value = value.clone();
        async move { Ok(value) }.boxed()
    })
}

/// Fetcher that waits for a value sent through the returned channel.
fn gated(calls: &Arc<AtomicUsize>) -> (UsersFetcher, oneshot::Sender<Vec<String>>) {
    let (tx, rx) = oneshot::channel::<Vec<String>>();
    let rx = Arc::new(Mutex::new(Some(rx)));
    let calls = Arc::clone(calls);
    let fetcher: UsersFetcher = Box::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        let rx = rx.lock().unwrap().take();
        async move {
            let rx = rx.ok_or_else(|| anyhow::anyhow!("gate already used"))?;
            Ok(rx.await?)
        }
        .boxed()
    });
    (fetcher, tx)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// == Cache Hit ==

#[tokio::test(start_paused = true)]
async fn test_cache_hit_avoids_fetcher() {
    let manager = CacheManager::default();
    manager.set("users", json!(["cached"]), Duration::from_secs(60));
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = manager
        .use_cache("users", counting(&calls, &["remote"]), CacheOptions::new())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(binding.data(), Some(strings(&["cached"])));
}

#[tokio::test(start_paused = true)]
async fn test_use_cache_twice_within_ttl_then_after_expiry() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let options = CacheOptions::new().ttl(Duration::from_millis(1000));

    let _first = manager
        .use_cache("users", counting(&calls, &["ann"]), options.clone())
        .await;
    tokio::time::advance(Duration::from_millis(500)).await;
    let _second = manager
        .use_cache("users", counting(&calls, &["ann"]), options.clone())
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    let third = manager
        .use_cache("users", counting(&calls, &["ann", "bob"]), options)
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(third.data(), Some(strings(&["ann", "bob"])));
}

#[tokio::test(start_paused = true)]
async fn test_disabled_binding_does_not_fetch() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = manager
        .use_cache(
            "users",
            counting(&calls, &["ann"]),
            CacheOptions::new().enabled(false),
        )
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(binding.data().is_none());

    // Manual trigger still works
    binding.revalidate().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// == Stale While Revalidate ==

#[tokio::test(start_paused = true)]
async fn test_stale_value_exposed_before_fetch_resolves() {
    let manager = CacheManager::default();
    manager.set("news", json!(["old"]), Duration::from_secs(1));
    tokio::time::advance(Duration::from_secs(2)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let (fetcher, gate) = gated(&calls);
    let binding = manager.bind("news", fetcher, CacheOptions::new());

    let mut fetch = task::spawn(binding.fetch(false));
    assert_pending!(fetch.poll());

    assert_eq!(binding.data(), Some(strings(&["old"])));
    assert!(!binding.is_loading());

    gate.send(strings(&["new"])).unwrap();
    let result = loop {
        tokio::task::yield_now().await;
        if let Poll::Ready(result) = fetch.poll() {
            break result;
        }
    };

    assert_eq!(result.unwrap(), Some(strings(&["new"])));
    assert_eq!(binding.data(), Some(strings(&["new"])));
    assert_eq!(manager.stats().stale_served, 1);
}

#[tokio::test(start_paused = true)]
async fn test_without_swr_binding_shows_loading() {
    let manager = CacheManager::default();
    manager.set("news", json!(["old"]), Duration::from_secs(1));
    tokio::time::advance(Duration::from_secs(2)).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let (fetcher, gate) = gated(&calls);
    let binding = manager.bind(
        "news",
        fetcher,
        CacheOptions::new().stale_while_revalidate(false),
    );

    let mut fetch = task::spawn(binding.fetch(false));
    assert_pending!(fetch.poll());

    assert!(binding.data().is_none());
    assert!(binding.is_loading());

    gate.send(strings(&["new"])).unwrap();
    loop {
        tokio::task::yield_now().await;
        if fetch.poll().is_ready() {
            break;
        }
    }
    assert!(!binding.is_loading());
}

// == In-flight Deduplication ==

#[tokio::test(start_paused = true)]
async fn test_second_trigger_on_same_binding_is_dropped() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let (fetcher, gate) = gated(&calls);
    let binding = manager.bind("users", fetcher, CacheOptions::new());

    let mut first = task::spawn(binding.fetch(true));
    assert_pending!(first.poll());

    let second = binding.fetch(true).await.unwrap();
    assert!(second.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    gate.send(strings(&["ann"])).unwrap();
    let result = loop {
        tokio::task::yield_now().await;
        if let Poll::Ready(result) = first.poll() {
            break result;
        }
    };
    assert_eq!(result.unwrap(), Some(strings(&["ann"])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_bindings_share_one_fetch() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let (fetcher, gate) = gated(&calls);
    let a = manager.bind("users", fetcher, CacheOptions::new());
    let b = manager.bind("users", counting(&calls, &["unused"]), CacheOptions::new());

    let release = async {
        tokio::task::yield_now().await;
        gate.send(strings(&["ann"])).unwrap();
    };
    let (ra, rb, ()) = tokio::join!(a.fetch(false), b.fetch(false), release);

    assert_eq!(ra.unwrap(), Some(strings(&["ann"])));
    assert_eq!(rb.unwrap(), Some(strings(&["ann"])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!manager.is_fetching("users"));
}

// == Failure Handling ==

#[tokio::test(start_paused = true)]
async fn test_failure_preserves_last_good_value() {
    let manager = CacheManager::default();
    let fail = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fail);
    let binding = manager.bind(
        "trainings",
        move |_| {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(anyhow::anyhow!("backend unavailable"))
                } else {
                    Ok(vec!["safety".to_string()])
                }
            }
        },
        CacheOptions::new().ttl(Duration::from_secs(10)),
    );
    binding.fetch(false).await.unwrap();

    fail.store(true, Ordering::SeqCst);
    let result = binding.revalidate().await;

    assert!(matches!(result, Err(CacheError::Fetch { .. })));
    assert!(matches!(binding.error(), Some(CacheError::Fetch { .. })));
    assert_eq!(binding.data(), Some(strings(&["safety"])));
    assert_eq!(manager.get("trainings"), Some(json!(["safety"])));

    // Expiry was pushed to now + 2 x ttl
    tokio::time::advance(Duration::from_secs(15)).await;
    assert!(!manager.is_expired("trainings"));
    tokio::time::advance(Duration::from_secs(6)).await;
    assert!(manager.is_expired("trainings"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_initial_fetch_recorded_on_binding() {
    let manager = CacheManager::default();
    let reported = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reported);

    let binding = manager
        .use_cache(
            "feedback",
            |_| async { Err::<Vec<String>, _>(anyhow::anyhow!("permission denied")) },
            CacheOptions::new().on_error(move |err| sink.lock().unwrap().push(err.to_string())),
        )
        .await;

    assert!(binding.data().is_none());
    assert!(binding.error().is_some());
    assert!(!binding.is_loading());
    let reported = reported.lock().unwrap();
    assert_eq!(reported.len(), 1);
    assert!(reported[0].contains("permission denied"));
}

#[tokio::test(start_paused = true)]
async fn test_failure_does_not_touch_other_bindings() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let healthy = manager
        .use_cache("users", counting(&calls, &["ann"]), CacheOptions::new())
        .await;
    let failing = manager.bind(
        "users",
        |_| async { Err::<Vec<String>, _>(anyhow::anyhow!("flaky")) },
        CacheOptions::new(),
    );

    assert!(failing.revalidate().await.is_err());

    assert!(healthy.error().is_none());
    assert_eq!(healthy.data(), Some(strings(&["ann"])));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_fetcher_does_not_wedge_key() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let binding = manager.bind(
        "users",
        move |_| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    panic!("fetcher bug");
                }
                Ok(vec!["ann".to_string()])
            }
        },
        CacheOptions::new(),
    );

    let first = binding.fetch(false).await;
    assert!(matches!(first, Err(CacheError::Fetch { .. })));
    assert!(binding.error().is_some());
    assert!(!manager.is_fetching("users"));

    let second = binding.revalidate().await.unwrap();

    assert_eq!(second, Some(strings(&["ann"])));
    assert!(binding.error().is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_ttl_binding_fetches() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let binding = manager
        .use_cache(
            "categories",
            counting(&calls, &["hr"]),
            CacheOptions::new().ttl(Duration::MAX),
        )
        .await;

    assert!(binding.error().is_none());
    assert_eq!(binding.data(), Some(strings(&["hr"])));

    tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
    binding.fetch(false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// == Fan-out ==

#[tokio::test(start_paused = true)]
async fn test_fetch_on_one_binding_updates_the_other() {
    let manager = CacheManager::default();
    let calls_a = Arc::new(AtomicUsize::new(0));
    let calls_b = Arc::new(AtomicUsize::new(0));
    let a = manager.bind("users", counting(&calls_a, &["ann"]), CacheOptions::new());
    let b = manager.bind("users", counting(&calls_b, &["bob"]), CacheOptions::new());

    a.fetch(false).await.unwrap();

    assert_eq!(b.data(), Some(strings(&["ann"])));
    assert_eq!(calls_b.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_append_visible_to_subscribers() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let a = manager
        .use_cache("categories", counting(&calls, &["hr"]), CacheOptions::new())
        .await;
    let b = manager
        .use_cache("categories", counting(&calls, &["hr"]), CacheOptions::new())
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let next = a
        .mutate_with(|prev| {
            let mut items = prev.unwrap_or_default();
            items.push("it".to_string());
            items
        })
        .unwrap();

    assert_eq!(next, strings(&["hr", "it"]));
    assert_eq!(b.data(), Some(strings(&["hr", "it"])));
    assert_eq!(manager.get("categories"), Some(json!(["hr", "it"])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_manager_mutate_reaches_bindings() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let binding = manager.bind("notifications", counting(&calls, &[]), CacheOptions::new());

    manager
        .mutate("notifications", &strings(&["welcome"]), Duration::from_secs(60))
        .unwrap();

    assert_eq!(binding.data(), Some(strings(&["welcome"])));
    assert!(!manager.is_expired("notifications"));
}

#[tokio::test(start_paused = true)]
async fn test_panicking_subscriber_does_not_block_bindings() {
    let manager = CacheManager::default();
    let _bad = manager.subscribe("users", |_| panic!("broken widget"));
    let calls = Arc::new(AtomicUsize::new(0));
    let a = manager.bind("users", counting(&calls, &["ann"]), CacheOptions::new());
    let b = manager.bind("users", counting(&calls, &[]), CacheOptions::new());

    a.fetch(false).await.unwrap();

    assert_eq!(b.data(), Some(strings(&["ann"])));
}

// == Deactivation ==

#[tokio::test(start_paused = true)]
async fn test_deactivated_binding_ignores_late_result() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let (fetcher, gate) = gated(&calls);
    let binding = manager.bind("users", fetcher, CacheOptions::new());

    let mut fetch = task::spawn(binding.fetch(false));
    assert_pending!(fetch.poll());
    binding.deactivate();

    gate.send(strings(&["ann"])).unwrap();
    loop {
        tokio::task::yield_now().await;
        if fetch.poll().is_ready() {
            break;
        }
    }

    assert!(binding.data().is_none());
    assert_eq!(manager.get("users"), Some(json!(["ann"])));
    assert_eq!(manager.subscriber_count("users"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_then_fetch_goes_to_fetcher() {
    let manager = CacheManager::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let binding = manager
        .use_cache("users", counting(&calls, &["ann"]), CacheOptions::new())
        .await;

    binding.invalidate();
    assert!(binding.data().is_none());

    binding.fetch(false).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
