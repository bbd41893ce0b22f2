//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the queue store,
//! gateway, HTTP servers and background tasks together.

use crate::config::AppConfig;
use crate::gateway::{self, ConnectionRegistry, Gateway, GatewayConfig};
use crate::matching::InMemoryQueueStore;
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::rooms::RoomRegistry;
use crate::service::health::HealthCheck;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Server bind error on {addr}: {message}")]
    Bind { addr: String, message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Connection gateway owning the queue store and room registry
    gateway: Arc<Gateway>,

    /// Shared metrics collector
    metrics_collector: Arc<MetricsCollector>,

    /// Health and metrics HTTP server, once started
    health_server: Mutex<Option<Arc<HealthServer>>>,

    /// Background task handles
    background_tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Signals the gateway server to stop accepting connections
    shutdown_tx: broadcast::Sender<()>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    started_at: Instant,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing duet-room matchmaking service");
        info!(
            "Configuration: service={}, http_port={}, health_port={}, next_policy={:?}",
            config.service.name,
            config.service.http_port,
            config.service.health_port,
            config.matchmaking.next_policy
        );

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let connections = Arc::new(ConnectionRegistry::new());
        let registry = Arc::new(RoomRegistry::new(
            connections.clone(),
            metrics_collector.clone(),
        ));
        let gateway = Arc::new(Gateway::new(
            Arc::new(InMemoryQueueStore::new()),
            registry,
            connections,
            GatewayConfig::from(&config.matchmaking),
            metrics_collector.clone(),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config,
            gateway,
            metrics_collector,
            health_server: Mutex::new(None),
            background_tasks: Mutex::new(Vec::new()),
            shutdown_tx,
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start the HTTP servers and background tasks
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting duet-room matchmaking service");

        *self.is_running.write().await = true;

        self.start_health_server().await?;
        self.start_gateway_server().await?;
        self.start_background_tasks().await;

        info!("✅ Duet-room matchmaking service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of duet-room service");

        *self.is_running.write().await = false;

        // Stop accepting new connections
        if self.shutdown_tx.send(()).is_err() {
            debug!("Gateway server was not running");
        }

        if let Some(health_server) = self.health_server.lock().await.take() {
            if let Err(e) = health_server.stop().await {
                warn!("Failed to stop health server: {}", e);
            } else {
                info!("✅ Health server stopped");
            }
        }

        self.stop_background_tasks().await;

        match self.gateway.stats() {
            Ok(stats) => info!("Final service statistics: {:?}", stats),
            Err(e) => {
                return Err(ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })
            }
        }

        info!("✅ Duet-room service shutdown completed");
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Start the health and metrics endpoints
    async fn start_health_server(self: &Arc<Self>) -> Result<(), ServiceError> {
        let health_config = HealthServerConfig::from(&self.config.service);
        info!("Starting metrics and health endpoints on port {}", health_config.port);

        let health_server = Arc::new(
            HealthServer::new(health_config, self.metrics_collector.clone())
                .with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(health_server.clone());

        let handle = tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server failed: {}", e);
            } else {
                info!("Health server task completed");
            }
        });
        self.background_tasks.lock().await.push(handle);
        Ok(())
    }

    /// Bind the WebSocket gateway and serve it until shutdown
    async fn start_gateway_server(&self) -> Result<(), ServiceError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.service.http_port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::Bind {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        let app = gateway::router(
            self.gateway.clone(),
            self.config.matchmaking.max_message_bytes,
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Gateway listening on ws://{}/ws", addr);
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                    info!("Gateway shutdown signal received");
                })
                .await;
            if let Err(e) = result {
                error!("Gateway server failed: {}", e);
            }
            info!("Gateway server stopped");
        });
        self.background_tasks.lock().await.push(handle);
        Ok(())
    }

    /// Start background maintenance tasks
    async fn start_background_tasks(self: &Arc<Self>) {
        let interval_duration = self.config.metrics_interval();
        info!(
            "Starting metrics refresh task ({}s interval)...",
            interval_duration.as_secs()
        );

        let app_state = self.clone();
        let metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            info!("Metrics refresh task started");

            while app_state.is_running().await {
                interval.tick().await;
                app_state.refresh_metrics().await;
            }

            info!("Metrics refresh task stopped");
        });

        self.background_tasks.lock().await.push(metrics_task);
    }

    /// Push current gauges and health into the metrics collector
    pub async fn refresh_metrics(self: &Arc<Self>) {
        let collector = &self.metrics_collector;
        collector
            .service()
            .uptime_seconds
            .set(self.uptime().as_secs() as i64);

        match self.gateway.stats() {
            Ok(stats) => {
                debug!(
                    "Updating metrics - waiting: {}, rooms: {}, connections: {}",
                    stats.users_waiting, stats.active_rooms, stats.active_connections
                );
                collector.update_from_stats(&stats);
            }
            Err(e) => warn!("Failed to get gateway stats for metrics update: {}", e),
        }

        match HealthCheck::check(self.clone()).await {
            Ok(health) => {
                collector.update_health_status(health.status.as_gauge());
                for check in &health.checks {
                    collector.update_component_health(
                        &check.name,
                        check.status == crate::service::health::HealthStatus::Healthy,
                    );
                }
            }
            Err(e) => warn!("Health check failed during metrics update: {}", e),
        }
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            info!("No background tasks to stop");
            return;
        }

        // Give the servers a moment to finish their graceful shutdown
        tokio::time::sleep(Duration::from_millis(200)).await;

        info!("Stopping {} background tasks...", task_count);
        for (i, task) in tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        info!("✅ All {} background tasks stopped", task_count);
    }
}
