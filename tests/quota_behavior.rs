//! Behavior-driven tests for quota tracking
//!
//! These tests verify HOW the shared quota tracker admits, delays and rejects
//! calls across its daily, per-minute and per-second windows.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use fmpkit_core::{
    ApiVersion, BlockingHttpClient, ClientConfig, Clock, Endpoint, ErrorKind, FmpClient, HttpError,
    HttpRequest, HttpResponse, ManualClock, QuotaConfig, QuotaTracker, ResponseShape, ThrottleMode,
};
use serde_json::Value;
use time::macros::datetime;
use time::OffsetDateTime;

#[derive(Default)]
struct CountingTransport {
    calls: AtomicUsize,
}

impl BlockingHttpClient for CountingTransport {
    fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::ok_json(r#"[{"symbol":"AAPL"}]"#))
    }
}

/// Clock whose next `armed` reads block until that many threads have read
/// it, so concurrent callers reach quota admission together.
#[derive(Debug)]
struct RendezvousClock {
    inner: ManualClock,
    barrier: Barrier,
    armed: AtomicUsize,
}

impl RendezvousClock {
    fn new(start: OffsetDateTime, parties: usize) -> Self {
        Self {
            inner: ManualClock::new(start),
            barrier: Barrier::new(parties),
            armed: AtomicUsize::new(0),
        }
    }

    fn arm(&self, reads: usize) {
        self.armed.store(reads, Ordering::SeqCst);
    }
}

impl Clock for RendezvousClock {
    fn now(&self) -> OffsetDateTime {
        let now = self.inner.now();
        let claimed = self
            .armed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if claimed {
            self.barrier.wait();
        }
        now
    }
}

fn stock_list() -> Endpoint<Value> {
    Endpoint::new("stock_list", "stock/list", ApiVersion::V3).returns(ResponseShape::ListOfItems)
}

fn generous(daily_limit: u32) -> QuotaConfig {
    QuotaConfig {
        daily_limit,
        per_second_limit: 100,
        per_minute_limit: 1000,
    }
}

// =============================================================================
// Quota: Daily Limit
// =============================================================================

#[test]
fn when_daily_limit_is_spent_next_call_is_rejected_with_wait_until_midnight() {
    // Given: A daily limit of three, a reject-mode client and a clock at 23:00
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-15 23:00:00 UTC)));
    let transport = Arc::new(CountingTransport::default());
    let client = FmpClient::builder(
        ClientConfig::new("test-key")
            .with_rate_limit(generous(3))
            .with_throttle_mode(ThrottleMode::Reject),
    )
    .blocking_transport(transport.clone())
    .clock(clock.clone())
    .build()
    .expect("config is valid");

    // When: Three calls are made
    for _ in 0..3 {
        client
            .request(&stock_list(), &Default::default())
            .expect("within quota");
    }

    // Then: The tracker refuses further calls until midnight
    assert!(!client.quota().should_allow());
    assert_eq!(client.quota().wait_time(), Duration::from_secs(3600));

    // And: A fourth call fails locally without reaching the transport
    let error = client
        .request(&stock_list(), &Default::default())
        .expect_err("daily quota is spent");
    assert_eq!(error.kind(), ErrorKind::RateLimit);
    assert_eq!(error.status(), None);
    assert_eq!(error.retry_after(), Some(Duration::from_secs(3600)));
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

    // And: After midnight the day starts over
    clock.advance(Duration::from_secs(3600));
    client
        .request(&stock_list(), &Default::default())
        .expect("new day, new quota");
    assert_eq!(client.quota_snapshot().daily_count, 1);
}

#[test]
fn wait_until_midnight_follows_the_clock_offset() {
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-15 22:30:00 +02:00)));
    let tracker = QuotaTracker::with_clock(generous(1), clock);

    tracker.record();

    assert_eq!(tracker.wait_time(), Duration::from_secs(90 * 60));
}

// =============================================================================
// Quota: Sliding Windows
// =============================================================================

#[test]
fn minute_window_releases_capacity_as_entries_age_out() {
    // Given: A per-minute limit of two
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-15 10:00:00 UTC)));
    let tracker = QuotaTracker::with_clock(
        QuotaConfig {
            daily_limit: 100,
            per_second_limit: 100,
            per_minute_limit: 2,
        },
        clock.clone(),
    );

    // When: Two calls are recorded twenty seconds apart
    tracker.record();
    clock.advance(Duration::from_secs(20));
    tracker.record();

    // Then: The next call must wait for the first entry to leave the window
    assert!(!tracker.should_allow());
    assert_eq!(tracker.wait_time(), Duration::from_secs(40));

    clock.advance(Duration::from_secs(40));
    assert!(tracker.should_allow());
    assert_eq!(tracker.wait_time(), Duration::ZERO);
}

#[test]
fn wait_time_is_the_largest_of_the_saturated_windows() {
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-15 10:00:00 UTC)));
    let tracker = QuotaTracker::with_clock(
        QuotaConfig {
            daily_limit: 100,
            per_second_limit: 1,
            per_minute_limit: 1,
        },
        clock,
    );

    tracker.record();

    assert_eq!(tracker.wait_time(), Duration::from_secs(60));
}

#[test]
fn blocking_mode_waits_for_the_second_window_and_then_sends() {
    // Given: One request per second on the real clock
    let transport = Arc::new(CountingTransport::default());
    let client = FmpClient::builder(ClientConfig::new("test-key").with_rate_limit(QuotaConfig {
        daily_limit: 100,
        per_second_limit: 1,
        per_minute_limit: 100,
    }))
    .blocking_transport(transport.clone())
    .build()
    .expect("config is valid");

    // When: Two calls are made back to back
    let started = std::time::Instant::now();
    for _ in 0..2 {
        client
            .request(&stock_list(), &Default::default())
            .expect("block mode waits instead of failing");
    }

    // Then: Both were sent and the second one waited for the window
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_millis(900));
}

// =============================================================================
// Quota: Concurrency
// =============================================================================

#[test]
fn concurrent_records_are_all_counted() {
    let tracker = Arc::new(QuotaTracker::new(QuotaConfig {
        daily_limit: 10_000,
        per_second_limit: 10_000,
        per_minute_limit: 10_000,
    }));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || {
                for _ in 0..50 {
                    tracker.record();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("recording thread should not panic");
    }

    assert_eq!(tracker.snapshot().daily_count, 400);
}

#[test]
fn concurrent_callers_cannot_overspend_the_last_slot() {
    // Given: One call left for the day and two callers reading the clock together
    let clock = Arc::new(RendezvousClock::new(datetime!(2024-03-15 10:00:00 UTC), 2));
    let transport = Arc::new(CountingTransport::default());
    let client = FmpClient::builder(
        ClientConfig::new("test-key")
            .with_rate_limit(generous(1))
            .with_throttle_mode(ThrottleMode::Reject),
    )
    .blocking_transport(transport.clone())
    .clock(clock.clone())
    .build()
    .expect("config is valid");
    clock.arm(2);

    // When: Both callers request at the same moment
    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| scope.spawn(|| client.request(&stock_list(), &Default::default())))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("caller thread should not panic"))
            .collect()
    });

    // Then: Exactly one is admitted and the other is rejected locally
    let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].kind(), ErrorKind::RateLimit);
    assert_eq!(rejected[0].status(), None);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.quota_snapshot().daily_count, 1);
}

#[test]
fn snapshot_reports_usage_against_limits() {
    let clock = Arc::new(ManualClock::new(datetime!(2024-03-15 10:00:00 UTC)));
    let tracker = QuotaTracker::with_clock(QuotaConfig::default(), clock);

    tracker.record();
    tracker.record();
    tracker.note_rejection(r#"{"message":"Limit Reach"}"#);

    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.daily_count, 2);
    assert_eq!(snapshot.daily_limit, 250);
    assert_eq!(snapshot.minute_count, 2);
    assert_eq!(snapshot.second_count, 2);
    assert_eq!(snapshot.server_rejections, 1);

    let json = serde_json::to_value(snapshot).expect("snapshot serializes");
    assert_eq!(json["per_minute_limit"], 300);
}
