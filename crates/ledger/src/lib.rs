use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use pacer_core::clock::local_date_and_hour;
use pacer_core::types::{BreakerState, LedgerCell, LedgerSnapshot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A single (campaign, day, hour) counter change, queued for the
/// persistence mirror. Produced under the shard lock, drained by a
/// background flusher outside of it.
#[derive(Debug, Clone)]
pub struct ShardDelta {
    pub campaign_id: String,
    pub local_date: NaiveDate,
    pub hour: usize,
    pub delta_spend_cents: i64,
    pub delta_impressions: i64,
}

/// Everything the shard lock guards for one campaign: the live cell,
/// retained history for status queries, and the breaker state (they
/// share a lock by design, see the concurrency model).
pub struct CampaignLedgerState {
    pub current: Option<LedgerCell>,
    pub history: VecDeque<LedgerCell>,
    pub breaker: BreakerState,
}

impl Default for CampaignLedgerState {
    fn default() -> Self {
        Self {
            current: None,
            history: VecDeque::new(),
            breaker: BreakerState::closed(),
        }
    }
}

struct Shard {
    state: Mutex<HashMap<String, CampaignLedgerState>>,
    delta_tx: tokio::sync::mpsc::Sender<ShardDelta>,
}

/// Sharded per-campaign spend counters. N independent shards, each
/// guarded by its own lock; a campaign always hashes to the same
/// shard so decide/track for that campaign never cross shards.
pub struct SpendLedger {
    shards: Vec<Shard>,
    tz: Tz,
    retention_days: i64,
}

impl SpendLedger {
    /// Builds a ledger with `shard_count` shards, each with its own
    /// bounded delta queue of `queue_capacity`. Returns the ledger plus
    /// one delta receiver per shard, for the persistence bridge to
    /// drain.
    pub fn new(
        shard_count: usize,
        tz: Tz,
        retention_days: i64,
        queue_capacity: usize,
    ) -> (Self, Vec<tokio::sync::mpsc::Receiver<ShardDelta>>) {
        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        let mut receivers = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            let (tx, rx) = tokio::sync::mpsc::channel(queue_capacity.max(1));
            shards.push(Shard {
                state: Mutex::new(HashMap::new()),
                delta_tx: tx,
            });
            receivers.push(rx);
        }
        (
            Self {
                shards,
                tz,
                retention_days,
            },
            receivers,
        )
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Exposes the shard a campaign hashes to, so callers that keep
    /// per-shard auxiliary state (e.g. the engine's per-shard RNGs)
    /// can stay aligned with the ledger's own sharding.
    pub fn shard_index_for(&self, campaign_id: &str) -> usize {
        self.shard_index(campaign_id)
    }

    /// Current breaker phase for a campaign, without mutating it.
    /// Returns CLOSED for a campaign with no tracked state yet.
    pub fn breaker_phase(&self, campaign_id: &str) -> pacer_core::types::BreakerPhase {
        let shard = &self.shards[self.shard_index(campaign_id)];
        let map = shard.state.lock();
        map.get(campaign_id)
            .map(|s| s.breaker.phase)
            .unwrap_or(pacer_core::types::BreakerPhase::Closed)
    }

    fn shard_index(&self, campaign_id: &str) -> usize {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        campaign_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    fn rollover_if_needed(&self, state: &mut CampaignLedgerState, today: NaiveDate) {
        let needs_rollover = match &state.current {
            Some(cell) => cell.local_date != today,
            None => true,
        };
        if !needs_rollover {
            return;
        }
        if let Some(old) = state.current.take() {
            state.history.push_front(old);
            while state.history.len() as i64 > self.retention_days {
                state.history.pop_back();
            }
        }
        state.current = Some(LedgerCell::new(today));
        state.breaker = BreakerState::closed();
    }

    fn cell_to_snapshot(campaign_id: &str, cell: &LedgerCell) -> LedgerSnapshot {
        LedgerSnapshot {
            campaign_id: campaign_id.to_string(),
            local_date: cell.local_date,
            day_spent_cents: cell.day_spent_cents,
            hourly_spent_cents: cell.hourly_spent_cents,
            impressions: cell.impressions,
        }
    }

    /// The single atomic-access primitive: acquires the shard lock for
    /// `campaign_id`, rolls the cell over to `at`'s local day if
    /// needed, and runs `f` against the resulting state before
    /// releasing the lock. Used by the decision engine to compose
    /// ledger reads/writes with circuit breaker evaluation under one
    /// critical section.
    pub fn with_campaign_state<R>(
        &self,
        campaign_id: &str,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut CampaignLedgerState, NaiveDate) -> R,
    ) -> R {
        let (today, _hour) = local_date_and_hour(at, self.tz);
        let shard = &self.shards[self.shard_index(campaign_id)];
        let mut map = shard.state.lock();
        let state = map.entry(campaign_id.to_string()).or_default();
        self.rollover_if_needed(state, today);
        f(state, today)
    }

    /// Atomic increment of the day and derived-hour counters. Returns
    /// the post-increment snapshot and whether the delta was
    /// successfully enqueued for persistence (a `false` here means the
    /// per-shard queue is saturated; the caller should surface a
    /// retryable error while trusting the in-memory snapshot, which is
    /// always authoritative).
    pub fn increment(
        &self,
        campaign_id: &str,
        spend_cents: i64,
        impressions: i64,
        at: DateTime<Utc>,
        now_ns: u64,
    ) -> (LedgerSnapshot, bool) {
        let (today, hour) = local_date_and_hour(at, self.tz);
        let hour_idx = hour as usize % 24;
        let shard_idx = self.shard_index(campaign_id);
        let shard = &self.shards[shard_idx];

        let (snapshot, delta) = {
            let mut map = shard.state.lock();
            let state = map.entry(campaign_id.to_string()).or_default();
            self.rollover_if_needed(state, today);
            let cell = state.current.as_mut().expect("rollover ensures a current cell");
            cell.day_spent_cents += spend_cents;
            cell.hourly_spent_cents[hour_idx] += spend_cents;
            cell.impressions += impressions;
            cell.last_update_ns = now_ns;
            (
                Self::cell_to_snapshot(campaign_id, cell),
                ShardDelta {
                    campaign_id: campaign_id.to_string(),
                    local_date: today,
                    hour: hour_idx,
                    delta_spend_cents: spend_cents,
                    delta_impressions: impressions,
                },
            )
        };

        let enqueued = shard.delta_tx.try_send(delta).is_ok();
        if !enqueued {
            metrics::counter!("pacer.ledger.delta_queue_full").increment(1);
        }
        (snapshot, enqueued)
    }

    /// Atomic increment plus breaker re-evaluation, used by `Track`.
    /// Spend is applied even when the breaker is OPEN — tracking is
    /// never denied, only decisions are. `daily_budget_cents` is
    /// `None` when the campaign spec hasn't resolved yet; the breaker
    /// is left untouched in that case (there's nothing to compare
    /// spend against).
    #[allow(clippy::too_many_arguments)]
    pub fn track(
        &self,
        campaign_id: &str,
        spend_cents: i64,
        impressions: i64,
        at: DateTime<Utc>,
        now_ns: u64,
        daily_budget_cents: Option<i64>,
        thresholds: &pacer_breaker::BreakerThresholds,
    ) -> (LedgerSnapshot, pacer_core::types::BreakerPhase, bool) {
        let (today, hour) = local_date_and_hour(at, self.tz);
        let hour_idx = hour as usize % 24;
        let shard_idx = self.shard_index(campaign_id);
        let shard = &self.shards[shard_idx];

        let (snapshot, phase, delta) = {
            let mut map = shard.state.lock();
            let state = map.entry(campaign_id.to_string()).or_default();
            self.rollover_if_needed(state, today);
            let cell = state.current.as_mut().expect("rollover ensures a current cell");
            cell.day_spent_cents += spend_cents;
            cell.hourly_spent_cents[hour_idx] += spend_cents;
            cell.impressions += impressions;
            cell.last_update_ns = now_ns;

            if let Some(budget) = daily_budget_cents {
                if budget > 0 {
                    let was_open = state.breaker.phase == pacer_core::types::BreakerPhase::Open;
                    let ratio = cell.day_spent_cents as f64 / budget as f64;
                    pacer_breaker::evaluate_for_track(&mut state.breaker, ratio, now_ns, thresholds);
                    if !was_open && state.breaker.phase == pacer_core::types::BreakerPhase::Open {
                        metrics::counter!("pacer.breaker.trips").increment(1);
                    }
                }
            }

            (
                Self::cell_to_snapshot(campaign_id, cell),
                state.breaker.phase,
                ShardDelta {
                    campaign_id: campaign_id.to_string(),
                    local_date: today,
                    hour: hour_idx,
                    delta_spend_cents: spend_cents,
                    delta_impressions: impressions,
                },
            )
        };

        let enqueued = shard.delta_tx.try_send(delta).is_ok();
        if !enqueued {
            metrics::counter!("pacer.ledger.delta_queue_full").increment(1);
        }
        (snapshot, phase, enqueued)
    }

    /// Lock-free-from-the-caller's-perspective read: may be stale by at
    /// most one inflight increment, never shows partial hour/day state.
    /// Does not itself create or roll over cells; an uninitialized or
    /// stale cell reads back as an all-zero snapshot for `at`'s local
    /// day.
    pub fn snapshot(&self, campaign_id: &str, at: DateTime<Utc>) -> LedgerSnapshot {
        let (today, _hour) = local_date_and_hour(at, self.tz);
        let shard = &self.shards[self.shard_index(campaign_id)];
        let map = shard.state.lock();
        match map.get(campaign_id).and_then(|s| s.current.as_ref()) {
            Some(cell) if cell.local_date == today => Self::cell_to_snapshot(campaign_id, cell),
            _ => LedgerSnapshot {
                campaign_id: campaign_id.to_string(),
                local_date: today,
                day_spent_cents: 0,
                hourly_spent_cents: [0; 24],
                impressions: 0,
            },
        }
    }

    /// Rehydrates a campaign's current-day cell from persisted totals
    /// at startup. Does not touch history or breaker state.
    pub fn rehydrate(
        &self,
        campaign_id: &str,
        local_date: NaiveDate,
        day_spent_cents: i64,
        hourly_spent_cents: [i64; 24],
    ) {
        let shard = &self.shards[self.shard_index(campaign_id)];
        let mut map = shard.state.lock();
        let state = map.entry(campaign_id.to_string()).or_default();
        state.current = Some(LedgerCell {
            local_date,
            day_spent_cents,
            hourly_spent_cents,
            impressions: 0,
            last_update_ns: 0,
        });
    }

    /// Restores a breaker phase persisted from a previous process.
    /// Never trusts a persisted `opened_at_ns` (it was measured against
    /// the old process's monotonic clock) — an OPEN or HALF_OPEN phase
    /// restarts its cooldown from `now_ns` instead.
    pub fn restore_breaker(&self, campaign_id: &str, phase: pacer_core::types::BreakerPhase, now_ns: u64) {
        let shard = &self.shards[self.shard_index(campaign_id)];
        let mut map = shard.state.lock();
        let state = map.entry(campaign_id.to_string()).or_default();
        state.breaker = BreakerState {
            phase,
            opened_at_ns: match phase {
                pacer_core::types::BreakerPhase::Closed => None,
                _ => Some(now_ns),
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ledger() -> SpendLedger {
        SpendLedger::new(4, chrono_tz::UTC, 7, 64).0
    }

    #[test]
    fn increment_accumulates_day_and_hour() {
        let l = ledger();
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 12, 0, 0).unwrap();
        let (snap, enq) = l.increment("camp-1", 1000, 1, at, 1);
        assert!(enq);
        assert_eq!(snap.day_spent_cents, 1000);
        assert_eq!(snap.hourly_spent_cents[12], 1000);

        let (snap2, _) = l.increment("camp-1", 500, 1, at, 2);
        assert_eq!(snap2.day_spent_cents, 1500);
        assert_eq!(snap2.hourly_spent_cents[12], 1500);
        assert_eq!(
            snap2.day_spent_cents,
            snap2.hourly_spent_cents.iter().sum::<i64>()
        );
    }

    #[test]
    fn snapshot_does_not_create_state() {
        let l = ledger();
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
        let snap = l.snapshot("never-tracked", at);
        assert_eq!(snap.day_spent_cents, 0);
    }

    #[test]
    fn track_trips_breaker_atomically_with_spend() {
        let l = ledger();
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 10, 0, 0).unwrap();
        let thresholds = pacer_breaker::BreakerThresholds {
            open_fraction: 0.95,
            cooldown_ns: 5 * 60 * 1_000_000_000,
            half_open_probe: 0.10,
        };
        let (snap, phase, enq) = l.track("camp-1", 9_500, 1, at, 1, Some(10_000), &thresholds);
        assert!(enq);
        assert_eq!(snap.day_spent_cents, 9_500);
        assert_eq!(phase, pacer_core::types::BreakerPhase::Open);
        assert_eq!(l.breaker_phase("camp-1"), pacer_core::types::BreakerPhase::Open);
    }

    #[test]
    fn day_rollover_resets_breaker_and_archives_cell() {
        let l = ledger();
        let day1 = Utc.with_ymd_and_hms(2026, 7, 30, 23, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 7, 31, 0, 30, 0).unwrap();

        l.increment("camp-1", 5000, 1, day1, 1);
        l.with_campaign_state("camp-1", day1, |state, _| {
            state.breaker.phase = pacer_core::types::BreakerPhase::Open;
        });

        let (snap, _) = l.increment("camp-1", 100, 1, day2, 2);
        assert_eq!(snap.day_spent_cents, 100);

        l.with_campaign_state("camp-1", day2, |state, _| {
            assert_eq!(state.breaker.phase, pacer_core::types::BreakerPhase::Closed);
            assert_eq!(state.history.len(), 1);
        });
    }

    #[test]
    fn restore_breaker_stamps_open_phase_with_current_clock() {
        let l = ledger();
        l.restore_breaker("camp-1", pacer_core::types::BreakerPhase::Open, 777);
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
        l.with_campaign_state("camp-1", at, |state, _| {
            assert_eq!(state.breaker.phase, pacer_core::types::BreakerPhase::Open);
            assert_eq!(state.breaker.opened_at_ns, Some(777));
        });
        assert_eq!(l.breaker_phase("camp-1"), pacer_core::types::BreakerPhase::Open);
    }

    #[test]
    fn restore_breaker_closed_clears_opened_at() {
        let l = ledger();
        l.restore_breaker("camp-1", pacer_core::types::BreakerPhase::Open, 777);
        l.restore_breaker("camp-1", pacer_core::types::BreakerPhase::Closed, 999);
        let at = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
        l.with_campaign_state("camp-1", at, |state, _| {
            assert_eq!(state.breaker.phase, pacer_core::types::BreakerPhase::Closed);
            assert_eq!(state.breaker.opened_at_ns, None);
        });
    }

    proptest::proptest! {
        #[test]
        fn day_spent_always_equals_sum_of_hourly(
            amounts in proptest::collection::vec(0i64..5_000, 1..50),
        ) {
            let l = ledger();
            let at = Utc.with_ymd_and_hms(2026, 7, 31, 9, 0, 0).unwrap();
            let mut snap = l.snapshot("camp-1", at);
            for (i, amount) in amounts.iter().enumerate() {
                let (s, _) = l.increment("camp-1", *amount, 1, at, i as u64);
                snap = s;
            }
            prop_assert_eq!(snap.day_spent_cents, amounts.iter().sum::<i64>());
            prop_assert_eq!(snap.day_spent_cents, snap.hourly_spent_cents.iter().sum::<i64>());
        }
    }
}
