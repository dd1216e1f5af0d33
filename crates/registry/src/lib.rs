pub mod catalog;

use dashmap::DashMap;
use pacer_core::types::CampaignSpec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

use catalog::CatalogClient;

const NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Thread-safe, read-heavy, copy-on-write mapping from campaign id to
/// its current spec. Readers never block writers: a refresh replaces
/// the `Arc<CampaignSpec>` for an id atomically, it never mutates one
/// in place.
pub struct CampaignRegistry {
    specs: DashMap<String, Arc<CampaignSpec>>,
    negative_cache: DashMap<String, Instant>,
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
    catalog: Arc<dyn CatalogClient>,
}

impl CampaignRegistry {
    pub fn new(catalog: Arc<dyn CatalogClient>) -> Self {
        Self {
            specs: DashMap::new(),
            negative_cache: DashMap::new(),
            inflight: DashMap::new(),
            catalog,
        }
    }

    /// Non-blocking lookup for the decision fast path. Never performs
    /// I/O. A miss that isn't negatively cached triggers an
    /// asynchronous background refresh and returns `None` immediately.
    pub fn try_get(self: &Arc<Self>, campaign_id: &str) -> Option<Arc<CampaignSpec>> {
        if let Some(spec) = self.specs.get(campaign_id) {
            return Some(spec.clone());
        }

        if let Some(marked) = self.negative_cache.get(campaign_id) {
            if marked.elapsed() < NEGATIVE_CACHE_TTL {
                return None;
            }
        }

        let this = Arc::clone(self);
        let id = campaign_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = this.refresh(&id).await {
                tracing::warn!(campaign_id = %id, error = %err, "catalog refresh failed");
            }
        });
        None
    }

    /// Single-flight fetch against the catalog: concurrent callers for
    /// the same id await the same underlying request.
    pub async fn refresh(&self, campaign_id: &str) -> Result<Option<Arc<CampaignSpec>>, pacer_core::error::PacerError> {
        let lock = self
            .inflight
            .entry(campaign_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another flight may have populated the cache while we waited.
        if let Some(spec) = self.specs.get(campaign_id) {
            return Ok(Some(spec.clone()));
        }

        match self.catalog.fetch_spec(campaign_id).await {
            Ok(Some(spec)) => {
                metrics::counter!("pacer.registry.refresh_ok").increment(1);
                self.negative_cache.remove(campaign_id);
                let arc = Arc::new(spec);
                self.specs.insert(campaign_id.to_string(), arc.clone());
                Ok(Some(arc))
            }
            Ok(None) => {
                metrics::counter!("pacer.registry.refresh_not_found").increment(1);
                self.negative_cache
                    .insert(campaign_id.to_string(), Instant::now());
                Ok(None)
            }
            Err(err) => {
                metrics::counter!("pacer.registry.refresh_error").increment(1);
                self.negative_cache
                    .insert(campaign_id.to_string(), Instant::now());
                Err(err)
            }
        }
    }

    /// Applied when a catalog change notification arrives. Evicts the
    /// cached entry unconditionally so the next lookup refetches.
    pub fn invalidate(&self, campaign_id: &str) {
        self.specs.remove(campaign_id);
        self.negative_cache.remove(campaign_id);
        self.inflight.remove(campaign_id);
    }

    /// Ids of campaigns the catalog currently considers active. Used
    /// once at startup to seed ledger rehydration; not part of the
    /// decision fast path.
    pub async fn list_active_ids(&self) -> Result<Vec<String>, pacer_core::error::PacerError> {
        self.catalog.list_active_ids().await
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::FakeCatalogClient;
    use chrono::Utc;
    use pacer_core::types::{CampaignStatus, PacingMode};

    fn spec(id: &str) -> CampaignSpec {
        CampaignSpec {
            id: id.to_string(),
            daily_budget_cents: 100_00,
            total_budget_cents: None,
            active_from: Utc::now() - chrono::Duration::days(1),
            active_to: Utc::now() + chrono::Duration::days(30),
            pacing_mode: PacingMode::Even,
            status: CampaignStatus::Active,
            version: 1,
        }
    }

    #[tokio::test]
    async fn refresh_populates_cache() {
        let fake = Arc::new(FakeCatalogClient::new());
        fake.insert(spec("camp-1"));
        let registry = Arc::new(CampaignRegistry::new(fake));

        let got = registry.refresh("camp-1").await.unwrap();
        assert!(got.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_campaign_is_negatively_cached() {
        let fake = Arc::new(FakeCatalogClient::new());
        let registry = Arc::new(CampaignRegistry::new(fake));

        let got = registry.refresh("ghost").await.unwrap();
        assert!(got.is_none());
        assert!(registry.negative_cache.contains_key("ghost"));
    }

    #[tokio::test]
    async fn try_get_never_blocks_on_miss() {
        let fake = Arc::new(FakeCatalogClient::new());
        fake.insert(spec("camp-2"));
        let registry = Arc::new(CampaignRegistry::new(fake));

        assert!(registry.try_get("camp-2").is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.try_get("camp-2").is_some());
    }

    #[tokio::test]
    async fn invalidate_evicts_and_allows_refetch_of_new_version() {
        let fake = Arc::new(FakeCatalogClient::new());
        fake.insert(spec("camp-3"));
        let registry = Arc::new(CampaignRegistry::new(fake.clone()));

        registry.refresh("camp-3").await.unwrap();
        assert_eq!(registry.specs.get("camp-3").unwrap().version, 1);

        let mut updated = spec("camp-3");
        updated.version = 2;
        fake.insert(updated);

        registry.invalidate("camp-3");
        assert!(!registry.specs.contains_key("camp-3"));

        let got = registry.refresh("camp-3").await.unwrap().unwrap();
        assert_eq!(got.version, 2);
    }

    #[tokio::test]
    async fn list_active_ids_excludes_paused_and_deleted() {
        let fake = Arc::new(FakeCatalogClient::new());
        fake.insert(spec("camp-active"));
        let mut paused = spec("camp-paused");
        paused.status = CampaignStatus::Paused;
        fake.insert(paused);
        let registry = Arc::new(CampaignRegistry::new(fake));

        let mut ids = registry.list_active_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["camp-active".to_string()]);
    }
}
