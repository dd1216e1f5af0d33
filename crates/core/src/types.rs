use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a campaign's daily budget is shaped across the day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PacingMode {
    Even,
    Asap,
    FrontLoaded,
    Adaptive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Deleted,
}

/// Immutable campaign configuration as known to the pacer. Replaced
/// wholesale (never mutated in place) when the registry refreshes a
/// newer version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CampaignSpec {
    pub id: String,
    pub daily_budget_cents: i64,
    pub total_budget_cents: Option<i64>,
    pub active_from: DateTime<Utc>,
    pub active_to: DateTime<Utc>,
    pub pacing_mode: PacingMode,
    pub status: CampaignStatus,
    pub version: u64,
}

/// One (campaign, local calendar day) counter cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerCell {
    pub local_date: chrono::NaiveDate,
    pub day_spent_cents: i64,
    pub hourly_spent_cents: [i64; 24],
    pub impressions: i64,
    pub last_update_ns: u64,
}

impl LedgerCell {
    pub fn new(local_date: chrono::NaiveDate) -> Self {
        Self {
            local_date,
            day_spent_cents: 0,
            hourly_spent_cents: [0; 24],
            impressions: 0,
            last_update_ns: 0,
        }
    }
}

/// A coherent, point-in-time read of a ledger cell, returned by both
/// `Increment` and `Snapshot`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub campaign_id: String,
    pub local_date: chrono::NaiveDate,
    pub day_spent_cents: i64,
    pub hourly_spent_cents: [i64; 24],
    pub impressions: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

/// Per-campaign circuit breaker state. `opened_at` is a monotonic
/// timestamp (nanoseconds since an arbitrary epoch) so wall-clock jumps
/// never reopen or prematurely cool down a breaker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerState {
    pub phase: BreakerPhase,
    pub opened_at_ns: Option<u64>,
}

impl BreakerState {
    pub fn closed() -> Self {
        Self {
            phase: BreakerPhase::Closed,
            opened_at_ns: None,
        }
    }
}

impl Default for BreakerState {
    fn default() -> Self {
        Self::closed()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyReason {
    Ok,
    Throttled,
    CircuitOpen,
    BudgetExhausted,
    Inactive,
    UnknownCampaign,
    Paused,
    DeadlineExceeded,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        write!(f, "{s}")
    }
}

/// Returned by `Decide`. Never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecisionResult {
    pub allow_bid: bool,
    pub throttle_rate: f64,
    pub reason: DenyReason,
}

impl DecisionResult {
    pub fn deny(reason: DenyReason) -> Self {
        Self {
            allow_bid: false,
            throttle_rate: 1.0,
            reason,
        }
    }

    pub fn allow(throttle_rate: f64) -> Self {
        Self {
            allow_bid: true,
            throttle_rate,
            reason: DenyReason::Ok,
        }
    }
}
