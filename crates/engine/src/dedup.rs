use crate::TrackOutcome;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Bounded per-campaign idempotence cache for `Track`'s optional
/// `event_id`. A repeated `event_id` within the window returns the
/// prior outcome without re-incrementing the ledger.
pub struct DedupCache {
    per_campaign: DashMap<String, Mutex<LruCache<String, TrackOutcome>>>,
    capacity: NonZeroUsize,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            per_campaign: DashMap::new(),
            capacity: NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero"),
        }
    }

    pub fn get(&self, campaign_id: &str, event_id: &str) -> Option<TrackOutcome> {
        let entry = self.per_campaign.get(campaign_id)?;
        entry.lock().get(event_id).cloned()
    }

    pub fn insert(&self, campaign_id: &str, event_id: &str, outcome: TrackOutcome) {
        let cache = self
            .per_campaign
            .entry(campaign_id.to_string())
            .or_insert_with(|| Mutex::new(LruCache::new(self.capacity)));
        cache.lock().put(event_id.to_string(), outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pacer_core::types::{BreakerPhase, LedgerSnapshot};

    fn outcome(spend: i64) -> TrackOutcome {
        TrackOutcome {
            snapshot: LedgerSnapshot {
                campaign_id: "camp-1".to_string(),
                local_date: chrono::Utc::now().date_naive(),
                day_spent_cents: spend,
                hourly_spent_cents: [0; 24],
                impressions: 1,
            },
            breaker_state: BreakerPhase::Closed,
            pace_percentage: 0.0,
            enqueued: true,
        }
    }

    #[test]
    fn repeated_event_id_returns_cached_outcome() {
        let cache = DedupCache::new(4);
        cache.insert("camp-1", "evt-1", outcome(1000));
        let hit = cache.get("camp-1", "evt-1").unwrap();
        assert_eq!(hit.snapshot.day_spent_cents, 1000);
        assert!(cache.get("camp-1", "evt-2").is_none());
    }
}
