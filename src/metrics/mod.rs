//! Metrics and monitoring for the duet-room matchmaking service
//!
//! This module provides Prometheus metrics collection and the HTTP server
//! exposing health probes and the metrics scrape endpoint.

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsTimer, PerformanceMetrics, QueueMetrics, RoomMetrics, ServiceMetrics,
};
pub use health::{encode_metrics, HealthServer, HealthServerConfig};
