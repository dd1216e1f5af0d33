//! Production `EventSink`: publishes every `budget_updates` event to
//! Redis and, while a campaign's breaker is open or half-open, mirrors
//! its phase under `breaker:{campaign_id}` so another process (or this
//! one after a restart) can see it.

use std::sync::Arc;

use pacer_core::event_bus::{BudgetUpdateEvent, EventSink};
use pacer_core::types::{BreakerPhase, BreakerState};
use tracing::warn;

use crate::client::RedisMirror;
use crate::keys;

pub struct RedisEventSink {
    mirror: RedisMirror,
    breaker_ttl_secs: u64,
}

impl RedisEventSink {
    /// `cooldown_secs` is the breaker's configured cooldown; the
    /// persisted key's TTL is set to four times it, per the retention
    /// convention used elsewhere for breaker state.
    pub fn new(mirror: RedisMirror, cooldown_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            mirror,
            breaker_ttl_secs: cooldown_secs.saturating_mul(4).max(1),
        })
    }
}

impl EventSink for RedisEventSink {
    fn emit(&self, event: BudgetUpdateEvent) {
        let mirror = self.mirror.clone();
        let breaker_ttl_secs = self.breaker_ttl_secs;
        tokio::spawn(async move {
            let campaign_id = event.campaign_id.clone();
            let breaker_phase = event.breaker_state;

            match serde_json::to_string(&event) {
                Ok(payload) => {
                    if let Err(e) = mirror.publish(keys::BUDGET_UPDATES_CHANNEL, &payload).await {
                        warn!(campaign_id = %campaign_id, error = %e, "failed to publish budget update");
                    }
                }
                Err(e) => {
                    warn!(campaign_id = %campaign_id, error = %e, "failed to serialize budget update")
                }
            }

            if breaker_phase != BreakerPhase::Closed {
                let state = BreakerState {
                    phase: breaker_phase,
                    opened_at_ns: None,
                };
                if let Err(e) = mirror.set_breaker(&campaign_id, &state, breaker_ttl_secs).await {
                    warn!(campaign_id = %campaign_id, error = %e, "failed to persist breaker state");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_four_times_cooldown() {
        // Guard against unit drift: a cooldown in seconds should
        // always yield a TTL comfortably longer than the cooldown
        // itself, per the documented 4x retention convention.
        let cooldown = 30u64;
        let ttl = cooldown.saturating_mul(4).max(1);
        assert_eq!(ttl, 120);
    }
}
