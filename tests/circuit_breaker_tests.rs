use chat_resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, ManualClock,
    StateObserver,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct RecordingObserver {
    transitions: Mutex<Vec<(String, CircuitState, CircuitState)>>,
}

impl StateObserver for RecordingObserver {
    fn on_state_change(&self, name: &str, from: CircuitState, to: CircuitState) {
        self.transitions.lock().push((name.to_string(), from, to));
    }
}

#[tokio::test]
async fn test_circuit_breaker_end_to_end() {
    let config = CircuitBreakerConfig::new(3, Duration::from_millis(100), 2);
    let registry = CircuitBreakerRegistry::new();
    let breaker = registry.get_with("redis-get-message", config);

    // Initially circuit should be closed
    assert_eq!(breaker.state(), CircuitState::Closed);

    for _ in 0..3 {
        assert!(breaker.admit());
        breaker.record(false);
    }

    // Circuit should be open now
    assert_eq!(breaker.state(), CircuitState::Open);
    assert!(!breaker.admit());

    // Wait for the reset timeout
    sleep(Duration::from_millis(150)).await;

    assert!(breaker.admit());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    breaker.record(true);
    breaker.record(true);

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failures, 0);
    assert_eq!(snapshot.successes, 0);
}

#[test]
fn test_observer_sees_full_cycle_in_order() {
    let clock = ManualClock::new();
    let observer = Arc::new(RecordingObserver::default());
    let registry = CircuitBreakerRegistry::builder()
        .clock(Arc::new(clock.clone()))
        .observer(observer.clone())
        .build();

    let breaker = registry.get_with("redis-set-message", CircuitBreakerConfig::new(2, Duration::from_secs(10), 1));

    breaker.record_failure();
    breaker.record_success();
    breaker.record_failure();
    breaker.record_failure();
    assert!(!breaker.admit());

    clock.advance(Duration::from_secs(11));
    assert!(breaker.admit());
    breaker.record_success();

    let transitions = observer.transitions.lock();
    assert_eq!(
        *transitions,
        vec![
            ("redis-set-message".to_string(), CircuitState::Closed, CircuitState::Open),
            ("redis-set-message".to_string(), CircuitState::Open, CircuitState::HalfOpen),
            ("redis-set-message".to_string(), CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_first_lookup_creates_one_breaker() {
    let registry = CircuitBreakerRegistry::new();

    let handles: Vec<_> = (0..64)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get("new-name") })
        })
        .collect();

    let breakers: Vec<Arc<CircuitBreaker>> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(registry.len(), 1);
    let first = &breakers[0];
    assert!(breakers.iter().all(|b| Arc::ptr_eq(first, b)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_permits_bound_concurrent_probes() {
    let clock = ManualClock::new();
    let breaker = Arc::new(
        CircuitBreaker::builder("probe-bound")
            .config(CircuitBreakerConfig::new(1, Duration::from_millis(100), 2))
            .clock(Arc::new(clock.clone()))
            .build(),
    );

    breaker.record_failure();
    assert_eq!(breaker.state(), CircuitState::Open);
    clock.advance(Duration::from_millis(200));

    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let invoked = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let breaker = breaker.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let invoked = invoked.clone();
            tokio::spawn(async move {
                breaker
                    .execute(|| async {
                        invoked.fetch_add(1, Ordering::SeqCst);
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(200)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, std::io::Error>(())
                    })
                    .await
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let admitted = results
        .iter()
        .filter(|joined| joined.as_ref().unwrap().is_ok())
        .count();

    assert_eq!(admitted, 2);
    assert_eq!(invoked.load(Ordering::SeqCst), 2);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_cancelled_execution_counts_as_failure() {
    let breaker = CircuitBreaker::new("cancelled", CircuitBreakerConfig::new(1, Duration::from_secs(5), 1));

    let slow = breaker.execute(|| async {
        sleep(Duration::from_secs(5)).await;
        Ok::<_, std::io::Error>(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(20), slow).await;

    assert!(timed_out.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[test]
fn test_multiple_breakers_are_independent() {
    let registry = CircuitBreakerRegistry::builder()
        .defaults(CircuitBreakerConfig::new(2, Duration::from_secs(10), 1))
        .build();

    let healthy = registry.get("redis-get-message");
    let failing = registry.get("redis-set-message");

    healthy.record_success();
    failing.record_failure();
    failing.record_failure();

    assert_eq!(healthy.state(), CircuitState::Closed);
    assert_eq!(failing.state(), CircuitState::Open);

    let all = registry.list_all();
    assert_eq!(all.len(), 2);
    assert_eq!(all["redis-set-message"].state(), CircuitState::Open);
}
