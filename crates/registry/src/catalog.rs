use pacer_core::error::PacerError;
use pacer_core::types::{CampaignSpec, CampaignStatus};
use std::time::Duration;

/// The external campaign catalog collaborator, reached over HTTP. The
/// registry never waits on this trait from the decision fast path;
/// it is only ever called from a background refresh task.
#[async_trait::async_trait]
pub trait CatalogClient: Send + Sync {
    async fn fetch_spec(&self, campaign_id: &str) -> Result<Option<CampaignSpec>, PacerError>;

    /// Ids of currently-active campaigns, used once at startup to seed
    /// ledger rehydration.
    async fn list_active_ids(&self) -> Result<Vec<String>, PacerError>;
}

pub struct HttpCatalogClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, PacerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PacerError::Registry(e.to_string()))?;
        Ok(Self { client, base_url })
    }
}

#[async_trait::async_trait]
impl CatalogClient for HttpCatalogClient {
    async fn fetch_spec(&self, campaign_id: &str) -> Result<Option<CampaignSpec>, PacerError> {
        let url = format!("{}/campaigns/{campaign_id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PacerError::Registry(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(PacerError::Registry(format!(
                "catalog returned {} for {campaign_id}",
                resp.status()
            )));
        }
        let spec = resp
            .json::<CampaignSpec>()
            .await
            .map_err(|e| PacerError::Registry(e.to_string()))?;
        Ok(Some(spec))
    }

    async fn list_active_ids(&self) -> Result<Vec<String>, PacerError> {
        let url = format!("{}/campaigns?status=active", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| PacerError::Registry(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PacerError::Registry(format!(
                "catalog returned {} for active campaign listing",
                resp.status()
            )));
        }
        let specs = resp
            .json::<Vec<CampaignSpec>>()
            .await
            .map_err(|e| PacerError::Registry(e.to_string()))?;
        Ok(specs.into_iter().map(|s| s.id).collect())
    }
}

/// In-memory catalog used in tests; never performs I/O.
#[derive(Default)]
pub struct FakeCatalogClient {
    specs: dashmap::DashMap<String, CampaignSpec>,
}

impl FakeCatalogClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, spec: CampaignSpec) {
        self.specs.insert(spec.id.clone(), spec);
    }
}

#[async_trait::async_trait]
impl CatalogClient for FakeCatalogClient {
    async fn fetch_spec(&self, campaign_id: &str) -> Result<Option<CampaignSpec>, PacerError> {
        Ok(self.specs.get(campaign_id).map(|e| e.value().clone()))
    }

    async fn list_active_ids(&self) -> Result<Vec<String>, PacerError> {
        Ok(self
            .specs
            .iter()
            .filter(|e| e.value().status == CampaignStatus::Active)
            .map(|e| e.key().clone())
            .collect())
    }
}
