//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the duet-room matchmaking and
//! signaling service using Prometheus metrics.

use crate::error::ErrorClass;
use crate::gateway::GatewayStats;
use crate::types::{CloseReason, SignalKind, Tier};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Waiting queue and matcher metrics
    queue_metrics: QueueMetrics,

    /// Room and relay metrics
    room_metrics: RoomMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Live client connections
    pub active_connections: IntGauge,

    /// Connections replaced by a newer connection for the same identity
    pub connections_replaced_total: IntCounter,

    /// Inbound client events handled
    pub client_events_total: IntCounterVec,

    /// Failures by error class
    pub errors_total: IntCounterVec,
}

/// Waiting queue and matcher metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Total enqueue requests by tier
    pub enqueues_total: IntCounterVec,

    /// Users currently waiting
    pub users_waiting: IntGauge,

    /// Total pairs produced by the matcher
    pub matches_total: IntCounter,

    /// Enqueues that finished without a partner
    pub no_match_total: IntCounter,

    /// Candidates lost to a concurrent matcher pass between scan and claim
    pub claim_conflicts_total: IntCounter,

    /// Time a user waited before being matched
    pub wait_time_seconds: Histogram,
}

/// Room and relay metrics
#[derive(Clone)]
pub struct RoomMetrics {
    /// Open rooms
    pub active_rooms: IntGauge,

    /// Total rooms created
    pub rooms_created_total: IntCounter,

    /// Total rooms closed by reason
    pub rooms_closed_total: IntCounterVec,

    /// Signaling messages delivered by kind
    pub signals_relayed_total: IntCounterVec,

    /// Signaling messages dropped by reason
    pub signals_dropped_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Matcher pass duration
    pub match_duration: Histogram,

    /// Client event handling duration
    pub event_processing_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let room_metrics = RoomMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            room_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get queue metrics
    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    /// Get room metrics
    pub fn rooms(&self) -> &RoomMetrics {
        &self.room_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from a gateway snapshot
    pub fn update_from_stats(&self, stats: &GatewayStats) {
        self.queue_metrics.users_waiting.set(stats.users_waiting as i64);
        self.room_metrics.active_rooms.set(stats.active_rooms as i64);
        self.service_metrics
            .active_connections
            .set(stats.active_connections as i64);
    }

    /// Record an enqueue request
    pub fn record_enqueue(&self, tier: Tier) {
        self.queue_metrics
            .enqueues_total
            .with_label_values(&[tier.as_str()])
            .inc();
    }

    /// Record a successful matcher pass
    pub fn record_match(&self, waited: &[f64], duration: Duration) {
        self.queue_metrics.matches_total.inc();
        for seconds in waited {
            self.queue_metrics.wait_time_seconds.observe(*seconds);
        }
        self.performance_metrics
            .match_duration
            .observe(duration.as_secs_f64());
    }

    /// Record a matcher pass that left the user waiting
    pub fn record_no_match(&self, duration: Duration) {
        self.queue_metrics.no_match_total.inc();
        self.performance_metrics
            .match_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_claim_conflict(&self) {
        self.queue_metrics.claim_conflicts_total.inc();
    }

    pub fn record_room_created(&self) {
        self.room_metrics.rooms_created_total.inc();
        self.room_metrics.active_rooms.inc();
    }

    pub fn record_room_closed(&self, reason: CloseReason) {
        self.room_metrics
            .rooms_closed_total
            .with_label_values(&[reason.as_str()])
            .inc();
        self.room_metrics.active_rooms.dec();
    }

    pub fn record_signal_relayed(&self, kind: SignalKind) {
        self.room_metrics
            .signals_relayed_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    pub fn record_signal_dropped(&self, reason: &str) {
        self.room_metrics
            .signals_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_connection_opened(&self) {
        self.service_metrics.active_connections.inc();
    }

    pub fn record_connection_closed(&self) {
        self.service_metrics.active_connections.dec();
    }

    pub fn record_connection_replaced(&self) {
        self.service_metrics.connections_replaced_total.inc();
    }

    /// Record a handled client event
    pub fn record_client_event(&self, event: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .client_events_total
            .with_label_values(&[event, status])
            .inc();

        self.performance_metrics
            .event_processing_duration
            .with_label_values(&[event])
            .observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, class: ErrorClass) {
        self.service_metrics
            .errors_total
            .with_label_values(&[class.as_str()])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("duet_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "duet_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("duet_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let active_connections =
            IntGauge::new("duet_room_active_connections", "Live client connections")?;
        registry.register(Box::new(active_connections.clone()))?;

        let connections_replaced_total = IntCounter::new(
            "duet_room_connections_replaced_total",
            "Connections replaced by a newer connection for the same user",
        )?;
        registry.register(Box::new(connections_replaced_total.clone()))?;

        let client_events_total = IntCounterVec::new(
            Opts::new(
                "duet_room_client_events_total",
                "Total client events handled",
            ),
            &["event", "status"],
        )?;
        registry.register(Box::new(client_events_total.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("duet_room_errors_total", "Total errors by class"),
            &["class"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            active_connections,
            connections_replaced_total,
            client_events_total,
            errors_total,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let enqueues_total = IntCounterVec::new(
            Opts::new("duet_room_enqueues_total", "Total enqueue requests"),
            &["tier"],
        )?;
        registry.register(Box::new(enqueues_total.clone()))?;

        let users_waiting =
            IntGauge::new("duet_room_users_waiting", "Users currently waiting")?;
        registry.register(Box::new(users_waiting.clone()))?;

        let matches_total = IntCounter::new("duet_room_matches_total", "Total pairs matched")?;
        registry.register(Box::new(matches_total.clone()))?;

        let no_match_total = IntCounter::new(
            "duet_room_no_match_total",
            "Enqueues that finished without a partner",
        )?;
        registry.register(Box::new(no_match_total.clone()))?;

        let claim_conflicts_total = IntCounter::new(
            "duet_room_claim_conflicts_total",
            "Candidates lost to a concurrent match",
        )?;
        registry.register(Box::new(claim_conflicts_total.clone()))?;

        let wait_time_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "duet_room_wait_time_seconds",
                "Time waited before being matched",
            )
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0]),
        )?;
        registry.register(Box::new(wait_time_seconds.clone()))?;

        Ok(Self {
            enqueues_total,
            users_waiting,
            matches_total,
            no_match_total,
            claim_conflicts_total,
            wait_time_seconds,
        })
    }
}

impl RoomMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_rooms = IntGauge::new("duet_room_active_rooms", "Open rooms")?;
        registry.register(Box::new(active_rooms.clone()))?;

        let rooms_created_total =
            IntCounter::new("duet_room_rooms_created_total", "Total rooms created")?;
        registry.register(Box::new(rooms_created_total.clone()))?;

        let rooms_closed_total = IntCounterVec::new(
            Opts::new("duet_room_rooms_closed_total", "Total rooms closed"),
            &["reason"],
        )?;
        registry.register(Box::new(rooms_closed_total.clone()))?;

        let signals_relayed_total = IntCounterVec::new(
            Opts::new(
                "duet_room_signals_relayed_total",
                "Signaling messages delivered",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(signals_relayed_total.clone()))?;

        let signals_dropped_total = IntCounterVec::new(
            Opts::new(
                "duet_room_signals_dropped_total",
                "Signaling messages dropped",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(signals_dropped_total.clone()))?;

        Ok(Self {
            active_rooms,
            rooms_created_total,
            rooms_closed_total,
            signals_relayed_total,
            signals_dropped_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_duration = Histogram::with_opts(
            HistogramOpts::new(
                "duet_room_match_duration_seconds",
                "Matcher pass duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(match_duration.clone()))?;

        let event_processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "duet_room_event_processing_duration_seconds",
                "Client event processing time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
            &["event"],
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        Ok(Self {
            match_duration,
            event_processing_duration,
        })
    }
}
