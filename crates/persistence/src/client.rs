//! Redis mirror for cross-process spend consistency and restart
//! recovery. All increments are transactional (`INCRBY`) so concurrent
//! writers across processes sum correctly.

use chrono::NaiveDate;
use pacer_core::error::PacerError;
use pacer_core::types::BreakerState;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::keys;

#[derive(Clone)]
pub struct RedisMirror {
    conn: ConnectionManager,
}

impl RedisMirror {
    pub async fn connect(url: &str) -> Result<Self, PacerError> {
        info!(url = %url, "connecting to redis");
        let client = redis::Client::open(url).map_err(|e| PacerError::Cache(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))?;
        info!("redis connection established");
        Ok(Self { conn })
    }

    /// Connects with a short fixed backoff schedule. Only used once at
    /// process startup; the background flusher uses its own
    /// exponential-with-jitter backoff for steady-state writes.
    pub async fn connect_with_retry(url: &str, delays_ms: &[u64]) -> Result<Self, PacerError> {
        let mut last_err = None;
        for (attempt, delay_ms) in std::iter::once(&0u64).chain(delays_ms.iter()).enumerate() {
            if *delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(*delay_ms)).await;
            }
            match Self::connect(url).await {
                Ok(mirror) => return Ok(mirror),
                Err(e) => {
                    warn!(attempt, error = %e, "redis connect attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PacerError::Cache("no connection attempts made".into())))
    }

    pub async fn incr_day(
        &self,
        campaign_id: &str,
        date: NaiveDate,
        delta_cents: i64,
    ) -> Result<i64, PacerError> {
        let mut conn = self.conn.clone();
        conn.incr(keys::day_key(campaign_id, date), delta_cents)
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))
    }

    pub async fn incr_hour(
        &self,
        campaign_id: &str,
        date: NaiveDate,
        hour: usize,
        delta_cents: i64,
    ) -> Result<i64, PacerError> {
        let mut conn = self.conn.clone();
        conn.incr(keys::hour_key(campaign_id, date, hour), delta_cents)
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))
    }

    pub async fn get_day(&self, campaign_id: &str, date: NaiveDate) -> Result<i64, PacerError> {
        let mut conn = self.conn.clone();
        let v: Option<i64> = conn
            .get(keys::day_key(campaign_id, date))
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))?;
        Ok(v.unwrap_or(0))
    }

    pub async fn get_hour(
        &self,
        campaign_id: &str,
        date: NaiveDate,
        hour: usize,
    ) -> Result<i64, PacerError> {
        let mut conn = self.conn.clone();
        let v: Option<i64> = conn
            .get(keys::hour_key(campaign_id, date, hour))
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))?;
        Ok(v.unwrap_or(0))
    }

    /// Persists breaker phase so a restart can see a campaign was
    /// tripped without waiting on a fresh evaluation. `ttl_secs` should
    /// be the cooldown window scaled well past its own expiry so a
    /// crashed process doesn't leave a stale key behind indefinitely.
    pub async fn set_breaker(
        &self,
        campaign_id: &str,
        state: &BreakerState,
        ttl_secs: u64,
    ) -> Result<(), PacerError> {
        let payload = serde_json::to_string(state)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(keys::breaker_key(campaign_id), payload, ttl_secs)
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))
    }

    pub async fn get_breaker(&self, campaign_id: &str) -> Result<Option<BreakerState>, PacerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(keys::breaker_key(campaign_id))
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<(), PacerError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Deletes every key in `keys` individually. Never issues a
    /// wildcard delete pattern — the original catalog service's
    /// `budget:day:{id}:*` reset was unreliable across cache backends.
    pub async fn delete_keys(&self, keys: &[String]) -> Result<(), PacerError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .del(keys)
            .await
            .map_err(|e| PacerError::Cache(e.to_string()))?;
        Ok(())
    }
}
