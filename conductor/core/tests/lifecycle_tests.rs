//! Lifecycle manager integration tests
//!
//! Exercise the manager under real concurrency:
//! - Single-flight loading across many tasks
//! - Cancelled leaders and waiters giving back what they reserved
//! - Budget invariant under an acquire/release stress sequence
//! - Pinned handles are never evicted
//! - Two backends competing for a one-unit budget

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_test::{assert_pending, assert_ready};

use common::{init_tracing, MockLoader};
use mdsa_conductor::backend::BackendSpec;
use mdsa_conductor::config::LifecycleConfig;
use mdsa_conductor::lifecycle::{HandleState, LifecycleError, ModelLifecycleManager, QuantizationLevel};
use mdsa_conductor::probe::{ComputeClass, StaticProbe};

fn manager(
    budget: u64,
    backends: Vec<BackendSpec>,
    loader: Arc<MockLoader>,
) -> Arc<ModelLifecycleManager> {
    Arc::new(ModelLifecycleManager::new(
        LifecycleConfig {
            memory_budget_bytes: budget,
            backends,
            ..LifecycleConfig::default()
        },
        loader,
        Arc::new(StaticProbe::unlimited(ComputeClass::Accelerator)),
    ))
}

fn full_only(id: &str, bytes: u64) -> BackendSpec {
    BackendSpec::new(id, format!("{id}-model"), bytes)
        .with_quantizations(vec![QuantizationLevel::Full])
}

// =============================================================================
// Single-flight
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_share_one_load() {
    init_tracing();
    const TASKS: usize = 16;

    let loader = Arc::new(MockLoader::new().with_load_delay(Duration::from_millis(50)));
    let manager = manager(10_000, vec![full_only("finance", 1_000)], Arc::clone(&loader));

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.acquire("finance").await })
        })
        .collect();

    let mut leases = Vec::with_capacity(TASKS);
    for handle in handles {
        leases.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(loader.loads_of("finance"), 1);
    assert!(leases.iter().all(|l| l.backend_id() == "finance"));

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].ref_count, TASKS);
    assert_eq!(snapshot[0].state, HandleState::Ready);
    assert_eq!(manager.used_bytes(), 1_000);

    drop(leases);
    assert_eq!(manager.snapshot()[0].ref_count, 0);
    assert!(manager.stats().single_flight_joins >= 1);
}

#[tokio::test]
async fn waiter_stays_pending_until_leader_finishes() {
    let loader = Arc::new(MockLoader::new().with_load_delay(Duration::from_millis(20)));
    let manager = manager(10_000, vec![full_only("finance", 1_000)], Arc::clone(&loader));

    let leader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire("finance").await })
    };
    // Let the leader reserve its slot
    while manager.state_of("finance") != HandleState::Loading {
        tokio::task::yield_now().await;
    }

    let mut waiter = tokio_test::task::spawn(manager.acquire("finance"));
    assert_pending!(waiter.poll());

    let lease = leader.await.unwrap().unwrap();
    assert!(waiter.is_woken());
    let joined = assert_ready!(waiter.poll()).unwrap();

    assert_eq!(lease.quantization_level(), joined.quantization_level());
    assert_eq!(loader.loads_of("finance"), 1);
}

#[tokio::test]
async fn cancelled_leader_releases_waiters_and_reservation() {
    let loader = Arc::new(MockLoader::new().with_load_delay(Duration::from_secs(60)));
    let manager = manager(10_000, vec![full_only("finance", 1_000)], Arc::clone(&loader));

    let leader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire("finance").await })
    };
    while manager.state_of("finance") != HandleState::Loading {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.used_bytes(), 1_000);

    let mut waiter = tokio_test::task::spawn(manager.acquire("finance"));
    assert_pending!(waiter.poll());

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    assert!(waiter.is_woken());
    match assert_ready!(waiter.poll()) {
        Err(LifecycleError::LoadFailure { backend_id, reason }) => {
            assert_eq!(backend_id, "finance");
            assert_eq!(reason, "load abandoned by its initiator");
        }
        other => panic!("expected an abandoned load, got {other:?}"),
    }
    assert_eq!(manager.state_of("finance"), HandleState::Unloaded);
    assert_eq!(manager.used_bytes(), 0);
}

#[tokio::test]
async fn cancelled_waiter_gives_back_its_reference() {
    let loader = Arc::new(MockLoader::new().with_load_delay(Duration::from_millis(20)));
    let manager = manager(10_000, vec![full_only("finance", 1_000)], Arc::clone(&loader));

    let leader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire("finance").await })
    };
    while manager.state_of("finance") != HandleState::Loading {
        tokio::task::yield_now().await;
    }

    let mut waiter = tokio_test::task::spawn(manager.acquire("finance"));
    assert_pending!(waiter.poll());
    drop(waiter);

    let lease = leader.await.unwrap().unwrap();
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, HandleState::Ready);
    assert_eq!(snapshot[0].ref_count, 1);

    drop(lease);
    assert_eq!(manager.snapshot()[0].ref_count, 0);
    assert_eq!(loader.loads_of("finance"), 1);
}

// =============================================================================
// Budget invariant
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ready_footprint_never_exceeds_budget_under_stress() {
    const BUDGET: u64 = 3_000;
    let ids = ["a", "b", "c", "d", "e"];

    let loader = Arc::new(MockLoader::new().with_load_delay(Duration::from_millis(2)));
    let specs = ids
        .iter()
        .map(|id| BackendSpec::new(*id, format!("{id}-model"), 1_000))
        .collect();
    let manager = manager(BUDGET, specs, Arc::clone(&loader));

    let done = Arc::new(AtomicBool::new(false));
    let observer = {
        let manager = Arc::clone(&manager);
        let done = Arc::clone(&done);
        tokio::spawn(async move {
            let mut observations = 0u64;
            while !done.load(Ordering::SeqCst) {
                let ready: u64 = manager
                    .snapshot()
                    .iter()
                    .filter(|h| h.state == HandleState::Ready)
                    .map(|h| h.memory_footprint_bytes)
                    .sum();
                assert!(ready <= BUDGET, "ready footprint {ready} exceeds {BUDGET}");
                assert!(manager.used_bytes() <= BUDGET);
                observations += 1;
                tokio::task::yield_now().await;
            }
            observations
        })
    };

    let workers: Vec<_> = (0..40usize)
        .map(|i| {
            let manager = Arc::clone(&manager);
            let id = ids[(i * 7) % ids.len()];
            tokio::spawn(async move {
                match manager.acquire(id).await {
                    Ok(lease) => {
                        tokio::task::yield_now().await;
                        drop(lease);
                        true
                    }
                    Err(LifecycleError::ResourceExhausted { .. }) => false,
                    Err(other) => panic!("unexpected error: {other}"),
                }
            })
        })
        .collect();

    let mut served = 0;
    for worker in workers {
        if worker.await.unwrap() {
            served += 1;
        }
    }
    done.store(true, Ordering::SeqCst);
    let observations = observer.await.unwrap();

    assert!(served > 0);
    assert!(observations > 0);
    let stats = manager.stats();
    assert!(stats.peak_bytes <= BUDGET);
    assert!(stats.evictions > 0, "five backends cannot all fit in the budget");
}

// =============================================================================
// Pinning
// =============================================================================

#[tokio::test]
async fn pinned_handle_is_never_evicted() {
    let loader = Arc::new(MockLoader::new());
    let manager = manager(
        1_000,
        vec![full_only("a", 1_000), full_only("b", 1_000)],
        Arc::clone(&loader),
    );

    let pinned = manager.acquire("a").await.unwrap();

    for _ in 0..5 {
        let err = manager.acquire("b").await.unwrap_err();
        assert!(matches!(err, LifecycleError::ResourceExhausted { .. }));
        assert_eq!(manager.state_of("a"), HandleState::Ready);
    }
    assert!(!manager.evict("a").await);
    assert_eq!(manager.evict_idle(Duration::ZERO).await, 0);
    assert_eq!(manager.state_of("a"), HandleState::Ready);
    assert_eq!(loader.unloads(), 0);

    drop(pinned);
    let lease = manager.acquire("b").await.unwrap();
    assert_eq!(lease.backend_id(), "b");
    assert_eq!(manager.state_of("a"), HandleState::Unloaded);
    assert_eq!(loader.unloads(), 1);
}

// =============================================================================
// One-unit budget
// =============================================================================

#[tokio::test]
async fn second_backend_is_exhausted_when_budget_holds_one() {
    let loader = Arc::new(MockLoader::new().with_load_delay(Duration::from_millis(10)));
    let manager = manager(1, vec![full_only("a", 1), full_only("b", 1)], Arc::clone(&loader));

    let (first, second) = tokio::join!(manager.acquire("a"), manager.acquire("b"));

    let (granted, refused) = match (first, second) {
        (Ok(lease), Err(err)) | (Err(err), Ok(lease)) => (lease, err),
        (first, second) => panic!("expected exactly one grant, got {first:?} / {second:?}"),
    };
    assert!(matches!(
        refused,
        LifecycleError::ResourceExhausted {
            required_bytes: 1,
            ..
        }
    ));
    assert_eq!(loader.total_loads(), 1);
    assert_eq!(manager.used_bytes(), 1);
    assert_eq!(manager.stats().exhausted, 1);
    drop(granted);
}
