//! Budget Pacer — real-time ad-serving budget pacing and circuit
//! breaking service.
//!
//! Main entry point that wires the campaign registry, sharded ledger,
//! persistence bridge, and decision engine, then starts the HTTP API.

use clap::Parser;
use pacer_core::clock::{Clock, SystemClock};
use pacer_core::config::PacerConfig;
use pacer_core::event_bus::{noop_sink, EventSink};
use pacer_engine::{DecisionEngine, EngineConfig};
use pacer_ledger::SpendLedger;
use pacer_registry::catalog::HttpCatalogClient;
use pacer_registry::CampaignRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "budget-pacer")]
#[command(about = "Real-time ad-serving budget pacer and circuit breaker")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "BUDGET_PACER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "BUDGET_PACER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Number of ledger shards (overrides config)
    #[arg(long, env = "BUDGET_PACER__SHARD_COUNT")]
    shard_count: Option<usize>,

    /// Skip the persistence mirror (in-memory only, for local testing)
    #[arg(long, default_value_t = false)]
    no_persistence: bool,
}

/// Reads back day/hour totals and breaker phase for every campaign the
/// catalog currently considers active, so a restart doesn't start
/// every campaign at zero spend. Best-effort: a campaign that fails to
/// rehydrate is logged and skipped, not fatal to startup.
async fn rehydrate_active_campaigns(
    registry: &Arc<CampaignRegistry>,
    ledger: &Arc<SpendLedger>,
    mirror: &pacer_persistence::RedisMirror,
    today: chrono::NaiveDate,
    now_ns: u64,
) {
    let ids = match registry.list_active_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "failed to list active campaigns for rehydration, starting cold");
            return;
        }
    };

    let mut rehydrated = 0usize;
    for id in &ids {
        if let Err(e) = registry.refresh(id).await {
            warn!(campaign_id = %id, error = %e, "failed to refresh campaign spec during rehydration");
            continue;
        }
        match pacer_persistence::rehydrate_campaign(ledger, mirror, id, today, now_ns).await {
            Ok(()) => rehydrated += 1,
            Err(e) => warn!(campaign_id = %id, error = %e, "failed to rehydrate campaign, starting at zero spend"),
        }
    }
    info!(total = ids.len(), rehydrated, "startup rehydration complete");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budget_pacer=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("budget pacer starting up");

    let mut config = PacerConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        PacerConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(shard_count) = cli.shard_count {
        config.shard_count = shard_count;
    }

    info!(
        node_id = %config.node_id,
        shard_count = config.shard_count,
        http_port = config.api.http_port,
        "configuration loaded"
    );

    let tz = config.tz();

    let catalog = Arc::new(HttpCatalogClient::new(
        config.catalog.base_url.clone(),
        Duration::from_millis(config.catalog.lookup_timeout_ms),
    )?);
    let registry = Arc::new(CampaignRegistry::new(catalog));

    let (ledger, delta_receivers) = SpendLedger::new(
        config.shard_count,
        tz,
        config.retention_days,
        1024,
    );
    let ledger = Arc::new(ledger);

    let health = pacer_core::health::HealthFlag::new();
    let clock = Arc::new(SystemClock::new());

    let mut event_sink: Arc<dyn EventSink> = noop_sink();

    if !cli.no_persistence {
        let mirror = match pacer_persistence::RedisMirror::connect_with_retry(
            &config.redis.url,
            &[0, 2_000, 4_000],
        )
        .await
        {
            Ok(mirror) => mirror,
            Err(e) => {
                error!(error = %e, "persistence mirror unreachable at startup");
                std::process::exit(2);
            }
        };

        let today = chrono::Utc::now().with_timezone(&tz).date_naive();
        rehydrate_active_campaigns(&registry, &ledger, &mirror, today, clock.monotonic_ns()).await;

        let flush_window = Duration::from_millis(config.flush_window_ms);
        for (shard_id, rx) in delta_receivers.into_iter().enumerate() {
            let mirror = mirror.clone();
            tokio::spawn(pacer_persistence::run_shard_flusher(
                shard_id,
                rx,
                mirror,
                flush_window,
                health.clone(),
            ));
        }
        info!(shards = config.shard_count, "persistence flushers started");

        let change_registry = registry.clone();
        let change_url = config.redis.url.clone();
        tokio::spawn(async move {
            pacer_persistence::run_change_listener(&change_url, move |id| {
                change_registry.invalidate(id);
            })
            .await;
        });

        event_sink = pacer_persistence::RedisEventSink::new(mirror, config.cooldown_seconds);
    } else {
        info!("running without the persistence mirror (in-memory only)");
    }

    let engine_cfg = EngineConfig {
        shard_count: config.shard_count,
        open_fraction: config.open_fraction,
        cooldown_seconds: config.cooldown_seconds,
        half_open_probe: config.half_open_probe,
        overshoot_cap: config.overshoot_cap,
        decision_deadline_ms: config.decision_deadline_ms,
        dedup_cache_size: config.dedup_cache_size,
        timezone: tz,
    };
    let engine = Arc::new(DecisionEngine::new(
        engine_cfg,
        registry,
        ledger,
        clock,
        event_sink,
    ));

    let api_server = Arc::new(pacer_api::ApiServer::new(config.clone(), engine, health));

    let metrics_server = api_server.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics_server.start_metrics().await {
            error!(error = %e, "failed to start metrics exporter");
        }
    });

    info!("budget pacer is ready to serve traffic");

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT, shutting down");
        }
    };

    if let Err(e) = api_server.start_http(shutdown).await {
        error!(error = %e, "HTTP server exited with an error");
        std::process::exit(1);
    }

    info!("budget pacer shut down cleanly");
    Ok(())
}
