//! Health check endpoints and Prometheus metrics server
//!
//! Serves liveness, readiness, stats and Prometheus text output on a
//! separate port from the WebSocket gateway.

use crate::config::ServiceSettings;
use crate::metrics::collector::MetricsCollector;
use crate::service::app::AppState;
use crate::service::health::{HealthCheck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const SERVICE_NAME: &str = "duet-room";

/// Bind address of the monitoring endpoints
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub host: String,
    pub port: u16,
}

impl From<&ServiceSettings> for HealthServerConfig {
    fn from(settings: &ServiceSettings) -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: settings.health_port,
        }
    }
}

#[derive(Clone)]
struct MonitorState {
    metrics_collector: Arc<MetricsCollector>,
    app_state: Option<Arc<AppState>>,
}

/// Serves probes and the Prometheus scrape endpoint on the health port
pub struct HealthServer {
    config: HealthServerConfig,
    state: MonitorState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: MonitorState {
                metrics_collector,
                app_state: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the application state used by the health probes
    pub fn with_app_state(mut self, app_state: Arc<AppState>) -> Self {
        self.state.app_state = Some(app_state);
        self
    }

    /// Bind and serve until `stop` is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .with_context(|| format!("Bad monitoring address {}:{}", self.config.host, self.config.port))?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind monitoring endpoints on {}", addr))?;
        info!("Monitoring endpoints on http://{}", addr);

        let mut stop_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, self.create_router())
            .with_graceful_shutdown(async move {
                let _ = stop_rx.recv().await;
            })
            .await?;

        info!("Monitoring endpoints stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone())
    }

    pub async fn stop(&self) -> Result<()> {
        if self.shutdown_tx.send(()).is_err() {
            warn!("Monitoring endpoints were not serving");
        }
        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/ready", "/alive", "/metrics", "/stats"]
    }))
}

/// Aggregate status; 503 only when unhealthy
async fn health_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": SERVICE_NAME,
                "version": env!("CARGO_PKG_VERSION"),
                "error": "Service not initialized"
            })),
        );
    };

    match HealthCheck::check(app_state.clone()).await {
        Ok(health) => {
            let code = match health.status {
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::OK,
            };
            (
                code,
                Json(json!({
                    "status": health.status,
                    "service": health.service,
                    "version": health.version,
                    "degraded": app_state.gateway().is_degraded()
                })),
            )
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": SERVICE_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
    }
}

/// Readiness: a degraded gateway is still live but no longer accepts searches
async fn ready_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (StatusCode::SERVICE_UNAVAILABLE, "starting");
    };

    match HealthCheck::readiness_check(app_state.clone()).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "ready"),
        Ok(HealthStatus::Degraded) => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "not ready"),
        Err(e) => {
            error!("Readiness probe failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "not ready")
        }
    }
}

async fn alive_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let alive = match &state.app_state {
        Some(app_state) => matches!(
            HealthCheck::liveness_check(app_state.clone()).await,
            Ok(HealthStatus::Healthy)
        ),
        None => false,
    };

    if alive {
        (StatusCode::OK, "alive")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not alive")
    }
}

async fn metrics_handler(State(state): State<MonitorState>) -> Response {
    match encode_metrics(&state.metrics_collector) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

/// Render every registered metric family in Prometheus text format
pub fn encode_metrics(metrics_collector: &MetricsCollector) -> Result<String> {
    let metric_families = metrics_collector.registry().gather();
    debug!("Encoding {} metric families", metric_families.len());

    TextEncoder::new()
        .encode_to_string(&metric_families)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
}

/// Queue, room and connection counts for operators
async fn stats_handler(State(state): State<MonitorState>) -> impl IntoResponse {
    let Some(app_state) = &state.app_state else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "service": { "name": SERVICE_NAME, "status": "error" },
                "error": "Service not initialized",
                "timestamp": chrono::Utc::now()
            })),
        );
    };

    match HealthCheck::check(app_state.clone()).await {
        Ok(health) => (
            StatusCode::OK,
            Json(json!({
                "service": {
                    "name": health.service,
                    "version": health.version,
                    "status": health.status,
                    "uptimeSeconds": health.stats.uptime_seconds
                },
                "queue": { "waiting": health.stats.users_waiting },
                "rooms": { "active": health.stats.active_rooms },
                "connections": { "active": health.stats.active_connections },
                "components": health.checks,
                "timestamp": health.timestamp
            })),
        ),
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "service": { "name": SERVICE_NAME, "status": "error" },
                    "error": "Failed to get service stats",
                    "timestamp": chrono::Utc::now()
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn local_config() -> HealthServerConfig {
        HealthServerConfig::from(&AppConfig::default().service)
    }

    fn server() -> HealthServer {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        HealthServer::new(local_config(), collector)
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        assert_eq!(get_status(server().create_router(), "/").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        collector.record_room_created();
        collector.update_health_status(2);

        let app = HealthServer::new(local_config(), collector).create_router();
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));
    }

    #[tokio::test]
    async fn test_endpoints_without_app_state() {
        let app = server().create_router();

        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(
                get_status(app.clone(), uri).await,
                StatusCode::SERVICE_UNAVAILABLE,
                "{} should be unavailable",
                uri
            );
        }
    }

    #[tokio::test]
    async fn test_endpoints_with_stopped_app_state() {
        let app_state = Arc::new(AppState::new(AppConfig::default()).unwrap());
        let app = HealthServer::new(local_config(), app_state.metrics_collector())
            .with_app_state(app_state)
            .create_router();

        assert_eq!(
            get_status(app.clone(), "/alive").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(get_status(app, "/stats").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_404_handling() {
        assert_eq!(
            get_status(server().create_router(), "/nonexistent").await,
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_encode_metrics_uses_service_prefix() {
        let collector = MetricsCollector::new().expect("Failed to create collector");
        collector.record_room_created();

        let text = encode_metrics(&collector).unwrap();
        assert!(text.contains("duet_room_rooms_created_total"));
    }
}
