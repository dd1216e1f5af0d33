use chrono::NaiveDate;

pub fn day_key(campaign_id: &str, date: NaiveDate) -> String {
    format!("budget:day:{campaign_id}:{}", date.format("%Y-%m-%d"))
}

pub fn hour_key(campaign_id: &str, date: NaiveDate, hour: usize) -> String {
    format!(
        "budget:hour:{campaign_id}:{}:{hour:02}",
        date.format("%Y-%m-%d")
    )
}

pub fn breaker_key(campaign_id: &str) -> String {
    format!("breaker:{campaign_id}")
}

pub const BUDGET_UPDATES_CHANNEL: &str = "budget_updates";
pub const CAMPAIGN_CHANGES_CHANNEL: &str = "campaigns:changes";

/// Enumerates every day/hour key for `campaign_id` across the
/// retention window ending today. Resets must delete these explicitly
/// — never a wildcard pattern (see the budget reset note carried over
/// from the original catalog service).
pub fn retention_window_keys(campaign_id: &str, today: NaiveDate, retention_days: i64) -> Vec<String> {
    let mut keys = Vec::new();
    for offset in 0..retention_days.max(1) {
        let date = today - chrono::Duration::days(offset);
        keys.push(day_key(campaign_id, date));
        for hour in 0..24 {
            keys.push(hour_key(campaign_id, date, hour));
        }
    }
    keys.push(breaker_key(campaign_id));
    keys
}
