pub mod dedup;

use chrono_tz::Tz;
use pacer_breaker::{BreakerGate, BreakerThresholds};
use pacer_core::clock::Clock;
use pacer_core::event_bus::{BudgetUpdateEvent, EventSink};
use pacer_core::types::{CampaignStatus, DecisionResult, DenyReason, LedgerSnapshot};
use pacer_ledger::SpendLedger;
use pacer_pacing::PacingOutcome;
use pacer_registry::CampaignRegistry;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dedup::DedupCache;

/// Everything returned by `Track`, mirroring `/spend/track`'s response
/// shape.
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub snapshot: LedgerSnapshot,
    pub breaker_state: pacer_core::types::BreakerPhase,
    pub pace_percentage: f64,
    /// `false` when the per-shard persistence queue was full and this
    /// track's delta was dropped from the mirror path. The ledger
    /// increment itself always lands — this only tells the caller the
    /// write is not yet durable and should be retried so the
    /// persistence bridge eventually sees it.
    pub enqueued: bool,
}

/// Everything returned by a read-only status lookup, mirroring
/// `GET /budget/status/{id}`'s response shape. Never mutates anything;
/// the pacing throttle shown here is the same deterministic curve
/// `Decide` would consult, just without the Bernoulli draw.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub campaign_id: String,
    pub daily_budget_cents: Option<i64>,
    pub day_spent_cents: i64,
    pub hourly_spent_cents: [i64; 24],
    pub impressions: i64,
    pub pace_percentage: f64,
    pub should_throttle: bool,
    pub throttle_rate: f64,
    pub breaker_state: pacer_core::types::BreakerPhase,
    pub circuit_breaker_open: bool,
}

pub struct EngineConfig {
    pub shard_count: usize,
    pub open_fraction: f64,
    pub cooldown_seconds: u64,
    pub half_open_probe: f64,
    pub overshoot_cap: f64,
    pub decision_deadline_ms: u64,
    pub dedup_cache_size: usize,
    pub timezone: Tz,
}

/// Composes the registry, ledger, pacing policy, and circuit breaker
/// behind the `Decide`/`Track` contract. Owns the fast path.
pub struct DecisionEngine {
    registry: Arc<CampaignRegistry>,
    ledger: Arc<SpendLedger>,
    clock: Arc<dyn Clock>,
    event_sink: Arc<dyn EventSink>,
    thresholds: BreakerThresholds,
    overshoot_cap: f64,
    decision_deadline: Duration,
    timezone: Tz,
    rngs: Vec<Mutex<StdRng>>,
    dedup: DedupCache,
}

impl DecisionEngine {
    pub fn new(
        cfg: EngineConfig,
        registry: Arc<CampaignRegistry>,
        ledger: Arc<SpendLedger>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let rngs = (0..ledger.shard_count())
            .map(|_| Mutex::new(StdRng::from_entropy()))
            .collect();
        Self {
            registry,
            ledger,
            clock,
            event_sink,
            thresholds: BreakerThresholds {
                open_fraction: cfg.open_fraction,
                cooldown_ns: cfg.cooldown_seconds.saturating_mul(1_000_000_000),
                half_open_probe: cfg.half_open_probe,
            },
            overshoot_cap: cfg.overshoot_cap,
            decision_deadline: Duration::from_millis(cfg.decision_deadline_ms),
            timezone: cfg.timezone,
            rngs,
            dedup: DedupCache::new(cfg.dedup_cache_size),
        }
    }

    /// Builds the engine with a caller-supplied RNG per shard, for
    /// deterministic tests.
    pub fn with_seeded_rngs(
        cfg: EngineConfig,
        registry: Arc<CampaignRegistry>,
        ledger: Arc<SpendLedger>,
        clock: Arc<dyn Clock>,
        event_sink: Arc<dyn EventSink>,
        seeds: &[u64],
    ) -> Self {
        let mut engine = Self::new(cfg, registry, ledger, clock, event_sink);
        for (i, seed) in seeds.iter().enumerate() {
            if let Some(slot) = engine.rngs.get(i) {
                *slot.lock() = StdRng::seed_from_u64(*seed);
            }
        }
        engine
    }

    fn rng_for(&self, campaign_id: &str) -> &Mutex<StdRng> {
        let idx = self.ledger.shard_index_for(campaign_id);
        &self.rngs[idx % self.rngs.len()]
    }

    /// Fast path: no network I/O, no suspension beyond acquiring the
    /// campaign's shard lock.
    pub fn decide(&self, campaign_id: &str, bid_cents: i64) -> DecisionResult {
        let start = Instant::now();
        metrics::counter!("pacer.decisions").increment(1);

        let spec = match self.registry.try_get(campaign_id) {
            Some(spec) => spec,
            None => {
                metrics::counter!("pacer.decisions.denied").increment(1);
                return DecisionResult::deny(DenyReason::UnknownCampaign);
            }
        };

        if spec.status != CampaignStatus::Active {
            metrics::counter!("pacer.decisions.denied").increment(1);
            return DecisionResult::deny(DenyReason::Paused);
        }

        let now = self.clock.wall_now();
        if now < spec.active_from || now > spec.active_to {
            metrics::counter!("pacer.decisions.denied").increment(1);
            return DecisionResult::deny(DenyReason::Inactive);
        }

        if start.elapsed() >= self.decision_deadline {
            metrics::counter!("pacer.decisions.denied").increment(1);
            return DecisionResult::deny(DenyReason::DeadlineExceeded);
        }

        let rng_lock = self.rng_for(campaign_id);
        let thresholds = self.thresholds;
        let overshoot_cap = self.overshoot_cap;
        let tz = self.timezone;
        let now_ns = self.clock.monotonic_ns();

        let result = self.ledger.with_campaign_state(campaign_id, now, |state, _today| {
            let snapshot = current_snapshot(campaign_id, state);
            let budget = spec.daily_budget_cents.max(1);
            let ratio = snapshot.day_spent_cents as f64 / budget as f64;

            let mut rng = rng_lock.lock();
            let gate = pacer_breaker::evaluate_for_decide(
                &mut state.breaker,
                ratio,
                now_ns,
                &thresholds,
                &mut *rng,
            );

            match gate {
                BreakerGate::Open | BreakerGate::HalfOpenDeny => {
                    DecisionResult::deny(DenyReason::CircuitOpen)
                }
                BreakerGate::HalfOpenAdmit => DecisionResult::allow(0.0),
                BreakerGate::Closed => {
                    let (_, local_hour) = pacer_core::clock::local_date_and_hour(now, tz);
                    let outcome = pacer_pacing::compute_throttle(
                        spec.pacing_mode,
                        spec.daily_budget_cents,
                        snapshot.day_spent_cents,
                        &snapshot.hourly_spent_cents,
                        local_hour,
                        overshoot_cap,
                    );
                    let _ = bid_cents;
                    match outcome {
                        PacingOutcome::BudgetExhausted => {
                            DecisionResult::deny(DenyReason::BudgetExhausted)
                        }
                        PacingOutcome::Throttle(throttle) => {
                            let draw: f64 = rng.gen();
                            if draw < throttle {
                                DecisionResult::deny(DenyReason::Throttled)
                            } else {
                                DecisionResult::allow(throttle)
                            }
                        }
                    }
                }
            }
        });

        if !result.allow_bid {
            metrics::counter!("pacer.decisions.denied").increment(1);
        }
        result
    }

    /// `Track` is at-least-once by contract; when `event_id` is
    /// supplied, repeated calls within the dedup window return the
    /// prior outcome without incrementing.
    pub fn track(
        &self,
        campaign_id: &str,
        spend_cents: i64,
        impressions: i64,
        at: Option<chrono::DateTime<chrono::Utc>>,
        event_id: Option<&str>,
    ) -> TrackOutcome {
        if let Some(eid) = event_id {
            if let Some(cached) = self.dedup.get(campaign_id, eid) {
                return cached;
            }
        }

        metrics::counter!("pacer.track.spend_cents").increment(spend_cents.max(0) as u64);

        let at = at.unwrap_or_else(|| self.clock.wall_now());
        let now_ns = self.clock.monotonic_ns();
        let daily_budget = self.registry.try_get(campaign_id).map(|s| s.daily_budget_cents);

        let (snapshot, phase, enqueued) =
            self.ledger
                .track(campaign_id, spend_cents, impressions, at, now_ns, daily_budget, &self.thresholds);

        if !enqueued {
            metrics::counter!("pacer.engine.track_queue_full").increment(1);
        }

        self.event_sink.emit(BudgetUpdateEvent {
            campaign_id: campaign_id.to_string(),
            day_spent_cents: snapshot.day_spent_cents,
            breaker_state: phase,
            ts: self.clock.wall_now(),
        });

        let pace_percentage = daily_budget
            .filter(|b| *b > 0)
            .map(|b| (snapshot.day_spent_cents as f64 / b as f64) * 100.0)
            .unwrap_or(0.0);

        let outcome = TrackOutcome {
            snapshot,
            breaker_state: phase,
            pace_percentage,
            enqueued,
        };

        if let Some(eid) = event_id {
            self.dedup.insert(campaign_id, eid, outcome.clone());
        }

        outcome
    }

    /// Read-only status lookup for `GET /budget/status/{id}`. Never
    /// touches the breaker or ledger beyond a snapshot read.
    pub fn status(&self, campaign_id: &str) -> StatusSnapshot {
        let now = self.clock.wall_now();
        let snapshot = self.ledger.snapshot(campaign_id, now);
        let phase = self.ledger.breaker_phase(campaign_id);
        let spec = self.registry.try_get(campaign_id);

        let daily_budget_cents = spec.as_ref().map(|s| s.daily_budget_cents);
        let pace_percentage = daily_budget_cents
            .filter(|b| *b > 0)
            .map(|b| (snapshot.day_spent_cents as f64 / b as f64) * 100.0)
            .unwrap_or(0.0);

        let (should_throttle, throttle_rate) = if phase != pacer_core::types::BreakerPhase::Closed {
            (true, 1.0)
        } else if let Some(spec) = spec {
            let (_, local_hour) = pacer_core::clock::local_date_and_hour(now, self.timezone);
            match pacer_pacing::compute_throttle(
                spec.pacing_mode,
                spec.daily_budget_cents,
                snapshot.day_spent_cents,
                &snapshot.hourly_spent_cents,
                local_hour,
                self.overshoot_cap,
            ) {
                PacingOutcome::BudgetExhausted => (true, 1.0),
                PacingOutcome::Throttle(rate) => (rate > 0.0, rate),
            }
        } else {
            (false, 0.0)
        };

        StatusSnapshot {
            campaign_id: campaign_id.to_string(),
            daily_budget_cents,
            day_spent_cents: snapshot.day_spent_cents,
            hourly_spent_cents: snapshot.hourly_spent_cents,
            impressions: snapshot.impressions,
            pace_percentage,
            should_throttle,
            throttle_rate,
            breaker_state: phase,
            circuit_breaker_open: phase != pacer_core::types::BreakerPhase::Closed,
        }
    }

    pub fn registry(&self) -> &Arc<CampaignRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<SpendLedger> {
        &self.ledger
    }
}

fn current_snapshot(
    campaign_id: &str,
    state: &pacer_ledger::CampaignLedgerState,
) -> LedgerSnapshot {
    match &state.current {
        Some(cell) => LedgerSnapshot {
            campaign_id: campaign_id.to_string(),
            local_date: cell.local_date,
            day_spent_cents: cell.day_spent_cents,
            hourly_spent_cents: cell.hourly_spent_cents,
            impressions: cell.impressions,
        },
        None => LedgerSnapshot {
            campaign_id: campaign_id.to_string(),
            local_date: chrono::Utc::now().date_naive(),
            day_spent_cents: 0,
            hourly_spent_cents: [0; 24],
            impressions: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pacer_core::clock::TestClock;
    use pacer_core::event_bus::CaptureSink;
    use pacer_core::types::{CampaignSpec, CampaignStatus, PacingMode};
    use pacer_ledger::SpendLedger;
    use pacer_registry::catalog::FakeCatalogClient;

    fn make_engine(
        spec: CampaignSpec,
        clock: Arc<TestClock>,
        seeds: &[u64],
    ) -> (Arc<DecisionEngine>, Arc<SpendLedger>) {
        let fake = Arc::new(FakeCatalogClient::new());
        fake.insert(spec);
        let registry = Arc::new(CampaignRegistry::new(fake));
        let (ledger, _rx) = SpendLedger::new(4, chrono_tz::UTC, 7, 64);
        let ledger = Arc::new(ledger);
        let cfg = EngineConfig {
            shard_count: 4,
            open_fraction: 0.95,
            cooldown_seconds: 300,
            half_open_probe: 0.10,
            overshoot_cap: 1.5,
            decision_deadline_ms: 50,
            dedup_cache_size: 1024,
            timezone: chrono_tz::UTC,
        };
        let engine = DecisionEngine::with_seeded_rngs(
            cfg,
            registry,
            ledger.clone(),
            clock,
            Arc::new(CaptureSink::new()),
            seeds,
        );
        (Arc::new(engine), ledger)
    }

    fn even_spec(daily_budget_cents: i64) -> CampaignSpec {
        CampaignSpec {
            id: "camp-1".to_string(),
            daily_budget_cents,
            total_budget_cents: None,
            active_from: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            active_to: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            pacing_mode: PacingMode::Even,
            status: CampaignStatus::Active,
            version: 1,
        }
    }

    async fn settle(registry: &Arc<CampaignRegistry>, id: &str) {
        // try_get spawns an async refresh; give it a turn to land.
        registry.refresh(id).await.unwrap();
    }

    #[tokio::test]
    async fn happy_path_even_allows_on_target_spend() {
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(240_000), clock, &[1, 1, 1, 1]);
        settle(engine.registry(), "camp-1").await;

        engine
            .ledger()
            .rehydrate("camp-1", at.date_naive(), 120_000, [0; 24]);

        let decision = engine.decide("camp-1", 1_000);
        assert!(decision.allow_bid);
        assert_eq!(decision.reason, DenyReason::Ok);

        let outcome = engine.track("camp-1", 1_000, 1, Some(at), None);
        assert_eq!(outcome.snapshot.day_spent_cents, 121_000);
    }

    #[tokio::test]
    async fn status_reflects_budget_and_pace_without_mutating_anything() {
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(240_000), clock, &[1, 1, 1, 1]);
        settle(engine.registry(), "camp-1").await;
        engine
            .ledger()
            .rehydrate("camp-1", at.date_naive(), 120_000, [0; 24]);

        let status = engine.status("camp-1");
        assert_eq!(status.daily_budget_cents, Some(240_000));
        assert_eq!(status.day_spent_cents, 120_000);
        assert!(!status.circuit_breaker_open);
        assert!((status.pace_percentage - 50.0).abs() < 1e-9);

        let again = engine.status("camp-1");
        assert_eq!(again.day_spent_cents, 120_000);
    }

    #[tokio::test]
    async fn status_on_unknown_campaign_is_inert() {
        let at = Utc::now();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(1), clock, &[1, 1, 1, 1]);
        let status = engine.status("does-not-exist");
        assert_eq!(status.daily_budget_cents, None);
        assert!(!status.should_throttle);
        assert_eq!(status.day_spent_cents, 0);
    }

    #[tokio::test]
    async fn even_overspend_throttles_to_full_deny() {
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(240_000), clock, &[1, 1, 1, 1]);
        settle(engine.registry(), "camp-1").await;
        engine
            .ledger()
            .rehydrate("camp-1", at.date_naive(), 180_000, [0; 24]);

        let decision = engine.decide("camp-1", 1_000);
        assert!(!decision.allow_bid);
        assert_eq!(decision.reason, DenyReason::Throttled);
    }

    #[tokio::test]
    async fn unknown_campaign_denies_immediately() {
        let at = Utc::now();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(1), clock, &[1, 1, 1, 1]);
        let decision = engine.decide("does-not-exist", 100);
        assert!(!decision.allow_bid);
        assert_eq!(decision.reason, DenyReason::UnknownCampaign);
    }

    #[tokio::test]
    async fn idempotent_track_does_not_double_count() {
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 10, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(240_000), clock, &[1, 1, 1, 1]);
        settle(engine.registry(), "camp-1").await;

        let first = engine.track("camp-1", 5_000, 1, Some(at), Some("evt-1"));
        let second = engine.track("camp-1", 5_000, 1, Some(at), Some("evt-1"));
        assert_eq!(first.snapshot.day_spent_cents, second.snapshot.day_spent_cents);
        assert_eq!(second.snapshot.day_spent_cents, 5_000);
    }

    #[tokio::test]
    async fn breaker_trips_at_ninety_five_percent_and_blocks_decide() {
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 8, 0, 0).unwrap();
        let clock = Arc::new(TestClock::new(at));
        let (engine, _ledger) = make_engine(even_spec(10_000), clock, &[1, 1, 1, 1]);
        settle(engine.registry(), "camp-1").await;

        for _ in 0..19 {
            engine.track("camp-1", 500, 1, Some(at), None);
        }
        let decision = engine.decide("camp-1", 100);
        assert!(!decision.allow_bid);
        assert_eq!(decision.reason, DenyReason::CircuitOpen);

        let outcome = engine.track("camp-1", 500, 1, Some(at), None);
        assert_eq!(outcome.snapshot.day_spent_cents, 10_000);
        assert_eq!(outcome.breaker_state, pacer_core::types::BreakerPhase::Open);
    }
}
