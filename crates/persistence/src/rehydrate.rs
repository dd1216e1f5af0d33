//! Startup rehydration: reads back the totals and breaker phase a
//! previous process mirrored into Redis before the API starts
//! accepting traffic, so a restart doesn't silently zero every
//! campaign's spend for the day.

use chrono::NaiveDate;
use pacer_core::error::PacerError;
use pacer_ledger::SpendLedger;

use crate::client::RedisMirror;

/// Rehydrates one campaign's current-day spend cell and breaker phase
/// from Redis. `now_ns` is stamped as the new `opened_at_ns` if the
/// persisted phase isn't closed — the old value was measured against
/// the previous process's monotonic clock and carries no meaning here.
pub async fn rehydrate_campaign(
    ledger: &SpendLedger,
    mirror: &RedisMirror,
    campaign_id: &str,
    date: NaiveDate,
    now_ns: u64,
) -> Result<(), PacerError> {
    let day_spent_cents = mirror.get_day(campaign_id, date).await?;
    let mut hourly_spent_cents = [0i64; 24];
    for (hour, slot) in hourly_spent_cents.iter_mut().enumerate() {
        *slot = mirror.get_hour(campaign_id, date, hour).await?;
    }
    ledger.rehydrate(campaign_id, date, day_spent_cents, hourly_spent_cents);

    if let Some(persisted) = mirror.get_breaker(campaign_id).await? {
        ledger.restore_breaker(campaign_id, persisted.phase, now_ns);
    }
    Ok(())
}
