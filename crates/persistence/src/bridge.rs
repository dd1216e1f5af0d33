//! Persistence bridge: drains per-shard spend deltas produced by
//! `pacer_ledger::SpendLedger`, coalesces them over a short flush
//! window, and mirrors the totals into Redis. Never sits in the
//! decision path — the ledger is always authoritative in memory, this
//! is the durability and cross-process visibility layer.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use pacer_ledger::ShardDelta;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::mpsc::Receiver;
use tracing::{error, warn};

use crate::client::RedisMirror;
use crate::keys;

const BASE_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 5_000;
const DEGRADED_AFTER_FAILURES: u32 = 5;

#[derive(Default)]
struct Coalesced {
    spend_cents: i64,
    impressions: i64,
}

/// Drains a single shard's delta queue forever, coalescing everything
/// that arrives within `flush_window` into one write per
/// (campaign, date, hour) key before publishing a budget update event
/// for each campaign touched in the batch.
pub async fn run_shard_flusher(
    shard_id: usize,
    mut rx: Receiver<ShardDelta>,
    mirror: RedisMirror,
    flush_window: Duration,
    health: pacer_core::health::HealthFlag,
) {
    let mut consecutive_failures: u32 = 0;

    loop {
        let Some(first) = rx.recv().await else {
            warn!(shard_id, "delta channel closed, flusher exiting");
            return;
        };

        let mut batch: HashMap<(String, chrono::NaiveDate, usize), Coalesced> = HashMap::new();
        let mut day_totals: HashMap<(String, chrono::NaiveDate), i64> = HashMap::new();
        fold_delta(&mut batch, &mut day_totals, first);

        let deadline = tokio::time::sleep(flush_window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                maybe = rx.recv() => {
                    match maybe {
                        Some(delta) => fold_delta(&mut batch, &mut day_totals, delta),
                        None => break,
                    }
                }
            }
        }

        if let Err(e) = flush_batch(&mirror, &batch, &day_totals).await {
            consecutive_failures += 1;
            metrics::counter!("pacer.persistence.flush_errors").increment(1);
            let backoff = backoff_with_full_jitter(consecutive_failures);
            error!(
                shard_id,
                error = %e,
                consecutive_failures,
                backoff_ms = backoff.as_millis() as u64,
                "persistence flush failed"
            );
            if consecutive_failures >= DEGRADED_AFTER_FAILURES {
                metrics::counter!("pacer.persistence.degraded").increment(1);
                health.mark_degraded();
            }
            tokio::time::sleep(backoff).await;
        } else {
            if consecutive_failures >= DEGRADED_AFTER_FAILURES {
                warn!(shard_id, "persistence flush recovered");
                health.mark_healthy();
            }
            consecutive_failures = 0;
            metrics::counter!("pacer.persistence.flush_ok").increment(1);
        }
    }
}

fn fold_delta(
    batch: &mut HashMap<(String, chrono::NaiveDate, usize), Coalesced>,
    day_totals: &mut HashMap<(String, chrono::NaiveDate), i64>,
    delta: ShardDelta,
) {
    let key = (delta.campaign_id.clone(), delta.local_date, delta.hour);
    let entry = batch.entry(key).or_default();
    entry.spend_cents += delta.delta_spend_cents;
    entry.impressions += delta.delta_impressions;

    let day_key = (delta.campaign_id, delta.local_date);
    *day_totals.entry(day_key).or_insert(0) += delta.delta_spend_cents;
}

async fn flush_batch(
    mirror: &RedisMirror,
    batch: &HashMap<(String, chrono::NaiveDate, usize), Coalesced>,
    day_totals: &HashMap<(String, chrono::NaiveDate), i64>,
) -> Result<(), pacer_core::error::PacerError> {
    for ((campaign_id, date, hour), coalesced) in batch {
        if coalesced.spend_cents != 0 {
            mirror
                .incr_hour(campaign_id, *date, *hour, coalesced.spend_cents)
                .await?;
        }
    }
    for ((campaign_id, date), spend) in day_totals {
        if *spend == 0 {
            continue;
        }
        // The coalesced write here only mirrors totals into Redis for
        // cross-process reads and restart rehydration. `budget_updates`
        // is published per-track by the decision engine's event sink,
        // not here, so this loop never publishes.
        mirror.incr_day(campaign_id, *date, *spend).await?;
    }
    Ok(())
}

fn backoff_with_full_jitter(attempt: u32) -> Duration {
    let capped = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(16)).min(MAX_BACKOFF_MS);
    let jittered = rand::thread_rng().gen_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

#[derive(Debug, Deserialize)]
struct ChangeNotification {
    id: String,
}

/// Subscribes to `campaigns:changes` forever, calling `on_change` with
/// each campaign id that changed upstream. Reconnects with a fixed
/// delay on disconnect; never gives up.
pub async fn run_change_listener(url: &str, mut on_change: impl FnMut(&str) + Send) {
    loop {
        match listen_once(url, &mut on_change).await {
            Ok(()) => warn!("campaign change subscription ended, reconnecting"),
            Err(e) => warn!(error = %e, "campaign change subscription failed, reconnecting"),
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

async fn listen_once(
    url: &str,
    on_change: &mut impl FnMut(&str),
) -> Result<(), pacer_core::error::PacerError> {
    let client = redis::Client::open(url).map_err(|e| pacer_core::error::PacerError::Cache(e.to_string()))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| pacer_core::error::PacerError::Cache(e.to_string()))?;
    pubsub
        .subscribe(keys::CAMPAIGN_CHANGES_CHANNEL)
        .await
        .map_err(|e| pacer_core::error::PacerError::Cache(e.to_string()))?;

    let mut messages = pubsub.on_message();
    while let Some(msg) = messages.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "malformed campaign change payload");
                continue;
            }
        };
        match serde_json::from_str::<ChangeNotification>(&payload) {
            Ok(notice) => on_change(&notice.id),
            Err(e) => warn!(error = %e, payload = %payload, "unparseable campaign change notification"),
        }
    }
    Ok(())
}

/// Enumerates and deletes every persisted key for `campaign_id` across
/// the retention window. Explicit enumeration only, never a wildcard
/// scan/delete pattern.
pub async fn reset_campaign(
    mirror: &RedisMirror,
    campaign_id: &str,
    today: chrono::NaiveDate,
    retention_days: i64,
) -> Result<(), pacer_core::error::PacerError> {
    let keys = keys::retention_window_keys(campaign_id, today, retention_days);
    mirror.delete_keys(&keys).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_stays_within_bounds() {
        for attempt in 0..20 {
            let d = backoff_with_full_jitter(attempt);
            assert!(d.as_millis() as u64 <= MAX_BACKOFF_MS);
        }
    }

    #[test]
    fn fold_delta_sums_same_hour_and_day() {
        let mut batch = HashMap::new();
        let mut day_totals = HashMap::new();
        let date = chrono::Utc::now().date_naive();
        fold_delta(
            &mut batch,
            &mut day_totals,
            ShardDelta {
                campaign_id: "camp-1".into(),
                local_date: date,
                hour: 5,
                delta_spend_cents: 100,
                delta_impressions: 1,
            },
        );
        fold_delta(
            &mut batch,
            &mut day_totals,
            ShardDelta {
                campaign_id: "camp-1".into(),
                local_date: date,
                hour: 5,
                delta_spend_cents: 50,
                delta_impressions: 1,
            },
        );
        let entry = &batch[&("camp-1".to_string(), date, 5)];
        assert_eq!(entry.spend_cents, 150);
        assert_eq!(entry.impressions, 2);
        assert_eq!(day_totals[&("camp-1".to_string(), date)], 150);
    }
}
