use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `BUDGET_PACER__` and `__`-separated sections.
#[derive(Debug, Clone, Deserialize)]
pub struct PacerConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default = "default_open_fraction")]
    pub open_fraction: f64,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_half_open_probe")]
    pub half_open_probe: f64,
    #[serde(default = "default_flush_window_ms")]
    pub flush_window_ms: u64,
    #[serde(default = "default_overshoot_cap")]
    pub overshoot_cap: f64,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_decision_deadline_ms")]
    pub decision_deadline_ms: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_dedup_cache_size")]
    pub dedup_cache_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Connection details for the out-of-scope campaign catalog collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_base_url")]
    pub base_url: String,
    #[serde(default = "default_catalog_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_node_id() -> String {
    "pacer-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_catalog_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_catalog_lookup_timeout_ms() -> u64 {
    100
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_pool_size() -> u32 {
    32
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_shard_count() -> usize {
    256
}
fn default_open_fraction() -> f64 {
    0.95
}
fn default_cooldown_seconds() -> u64 {
    300
}
fn default_half_open_probe() -> f64 {
    0.10
}
fn default_flush_window_ms() -> u64 {
    50
}
fn default_overshoot_cap() -> f64 {
    1.5
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_decision_deadline_ms() -> u64 {
    50
}
fn default_retention_days() -> i64 {
    7
}
fn default_dedup_cache_size() -> usize {
    10_000
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: default_catalog_base_url(),
            lookup_timeout_ms: default_catalog_lookup_timeout_ms(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_pool_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            catalog: CatalogConfig::default(),
            redis: RedisConfig::default(),
            shard_count: default_shard_count(),
            open_fraction: default_open_fraction(),
            cooldown_seconds: default_cooldown_seconds(),
            half_open_probe: default_half_open_probe(),
            flush_window_ms: default_flush_window_ms(),
            overshoot_cap: default_overshoot_cap(),
            timezone: default_timezone(),
            decision_deadline_ms: default_decision_deadline_ms(),
            retention_days: default_retention_days(),
            dedup_cache_size: default_dedup_cache_size(),
        }
    }
}

impl PacerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("BUDGET_PACER")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn tz(&self) -> chrono_tz::Tz {
        self.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}
