//! End-to-end exercises of `DecisionEngine::decide`/`track` against a
//! fake catalog, covering concurrent tracking correctness and the
//! day-spent/hourly-sum invariant under contention.

use chrono::{TimeZone, Utc};
use pacer_core::clock::TestClock;
use pacer_core::event_bus::CaptureSink;
use pacer_core::types::{CampaignSpec, CampaignStatus, PacingMode};
use pacer_engine::{DecisionEngine, EngineConfig};
use pacer_ledger::SpendLedger;
use pacer_registry::catalog::FakeCatalogClient;
use pacer_registry::CampaignRegistry;
use std::sync::Arc;
use std::thread;

fn spec(id: &str, daily_budget_cents: i64) -> CampaignSpec {
    CampaignSpec {
        id: id.to_string(),
        daily_budget_cents,
        total_budget_cents: None,
        active_from: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        active_to: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
        pacing_mode: PacingMode::Even,
        status: CampaignStatus::Active,
        version: 1,
    }
}

fn engine_with(spec: CampaignSpec) -> Arc<DecisionEngine> {
    let fake = Arc::new(FakeCatalogClient::new());
    fake.insert(spec);
    let registry = Arc::new(CampaignRegistry::new(fake));

    // Populate the cache synchronously so concurrent `decide`/`track`
    // calls below never hit the async-refresh miss path.
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(registry.refresh("camp-1")).unwrap();

    let (ledger, _rx) = SpendLedger::new(8, chrono_tz::UTC, 7, 256);
    let clock = Arc::new(TestClock::new(Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap()));
    let cfg = EngineConfig {
        shard_count: 8,
        open_fraction: 0.95,
        cooldown_seconds: 300,
        half_open_probe: 0.10,
        overshoot_cap: 1.5,
        decision_deadline_ms: 50,
        dedup_cache_size: 1024,
        timezone: chrono_tz::UTC,
    };
    Arc::new(DecisionEngine::new(
        cfg,
        registry,
        Arc::new(ledger),
        clock,
        Arc::new(CaptureSink::new()),
    ))
}

#[test]
fn concurrent_tracking_sums_exactly() {
    let engine = engine_with(spec("camp-1", 10_000_000));
    let at = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();

    let threads: Vec<_> = (0..100)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    engine.track("camp-1", 100, 1, Some(at), None);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let snapshot = engine.ledger().snapshot("camp-1", at);
    assert_eq!(snapshot.day_spent_cents, 100 * 100 * 100);
    assert_eq!(snapshot.impressions, 100 * 100);
    assert_eq!(
        snapshot.day_spent_cents,
        snapshot.hourly_spent_cents.iter().sum::<i64>()
    );
}

#[test]
fn decide_never_admits_once_breaker_trips_under_contention() {
    let engine = engine_with(spec("camp-2", 10_000));
    let at = Utc.with_ymd_and_hms(2026, 7, 31, 8, 0, 0).unwrap();

    let threads: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.track("camp-2", 500, 1, Some(at), None))
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let snapshot = engine.ledger().snapshot("camp-2", at);
    assert_eq!(snapshot.day_spent_cents, 10_000);
    assert_eq!(
        engine.ledger().breaker_phase("camp-2"),
        pacer_core::types::BreakerPhase::Open
    );

    let decision = engine.decide("camp-2", 100);
    assert!(!decision.allow_bid);
    assert_eq!(decision.reason, pacer_core::types::DenyReason::CircuitOpen);
}

#[test]
fn status_reports_open_breaker_after_concurrent_overspend() {
    let engine = engine_with(spec("camp-3", 10_000));
    let at = Utc.with_ymd_and_hms(2026, 7, 31, 8, 0, 0).unwrap();

    let threads: Vec<_> = (0..20)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || engine.track("camp-3", 500, 1, Some(at), None))
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    let status = engine.status("camp-3");
    assert_eq!(status.daily_budget_cents, Some(10_000));
    assert_eq!(status.day_spent_cents, 10_000);
    assert!(status.circuit_breaker_open);
    assert!(status.should_throttle);
}
