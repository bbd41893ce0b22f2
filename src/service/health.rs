//! Health checks and monitoring
//!
//! This module provides health check functionality for the duet-room
//! service, including readiness and liveness probes.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric value exported as the health gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// Combine with another status, keeping the worse of the two
    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Why the component is not healthy
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl ComponentCheck {
    fn finish(
        name: &str,
        started: std::time::Instant,
        (status, message): (HealthStatus, Option<String>),
    ) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Counts reported alongside `/health` and `/stats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Users currently waiting for a partner
    pub users_waiting: usize,
    /// Open rooms
    pub active_rooms: usize,
    /// Live client connections
    pub active_connections: usize,
    /// Seconds since the service started
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Run every component probe and fold them into one status
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_queue_store(&app_state),
            Self::check_room_registry(&app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(&check.status));

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats: Self::gather_service_stats(&app_state),
        })
    }

    /// Alive means started and not yet shut down
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can accept new searches
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_queue_store(&app_state)
            .status
            .worst(&Self::check_room_registry(&app_state).status))
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let started = std::time::Instant::now();
        let outcome = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (HealthStatus::Unhealthy, Some("Not started or shutting down".to_string()))
        };
        ComponentCheck::finish("service_running", started, outcome)
    }

    /// A degraded gateway still relays but refuses enqueues
    fn check_queue_store(app_state: &AppState) -> ComponentCheck {
        let started = std::time::Instant::now();
        let gateway = app_state.gateway();

        let outcome = match gateway.store().len() {
            Ok(_) if gateway.is_degraded() => (
                HealthStatus::Degraded,
                Some("Queue store failed earlier; enqueues are refused".to_string()),
            ),
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Queue store probe failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };
        ComponentCheck::finish("queue_store", started, outcome)
    }

    fn check_room_registry(app_state: &AppState) -> ComponentCheck {
        let started = std::time::Instant::now();
        let outcome = match app_state.gateway().registry().stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Room registry probe failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()))
            }
        };
        ComponentCheck::finish("room_registry", started, outcome)
    }

    fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let uptime_seconds = app_state.uptime().as_secs();
        match app_state.gateway().stats() {
            Ok(stats) => ServiceStats {
                users_waiting: stats.users_waiting,
                active_rooms: stats.active_rooms,
                active_connections: stats.active_connections,
                uptime_seconds,
            },
            Err(e) => {
                debug!("Failed to get gateway stats for health check: {}", e);
                ServiceStats {
                    uptime_seconds,
                    ..ServiceStats::default()
                }
            }
        }
    }
}
