//! API server — starts the HTTP (REST) server and the Prometheus
//! metrics exporter.

use crate::rest::{self, AppState};
use axum::routing::{get, post};
use axum::Router;
use pacer_core::config::PacerConfig;
use pacer_engine::DecisionEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Main API server exposing the pacing decision and tracking surface.
pub struct ApiServer {
    config: PacerConfig,
    engine: Arc<DecisionEngine>,
    health: pacer_core::health::HealthFlag,
}

impl ApiServer {
    pub fn new(config: PacerConfig, engine: Arc<DecisionEngine>, health: pacer_core::health::HealthFlag) -> Self {
        Self { config, engine, health }
    }

    /// Start the HTTP REST server, shutting down gracefully once
    /// `shutdown` resolves.
    pub async fn start_http(&self, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
        let state = AppState {
            engine: self.engine.clone(),
            node_id: self.config.node_id.clone(),
            start_time: Instant::now(),
            health: self.health.clone(),
        };

        let app = Router::new()
            .route("/pacing/decision", post(rest::handle_decision))
            .route("/spend/track", post(rest::handle_track))
            .route("/budget/status/{campaign_id}", get(rest::handle_status))
            .route("/health", get(rest::health_check))
            .with_state(state)
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "metrics exporter started");

        std::mem::forget(handle);
        Ok(())
    }
}
