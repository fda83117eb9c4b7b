//! Prometheus metrics.
//!
//! Every observable event in the agent lands in one of the collectors here.
//! Metric names, types and labels are part of the external interface; changing
//! any of them is a breaking change for dashboards and alerts.

mod http_server;

pub use http_server::serve_metrics;

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter,
    IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus registry and collectors for the gateway route manager.
pub struct Metrics {
    registry: Registry,

    // Gateway health
    pub health_check_total: IntCounterVec,
    pub health_check_duration_seconds: HistogramVec,
    pub active_gateway_count: Gauge,
    pub total_gateway_count: Gauge,

    // Route management
    pub route_updates_total: IntCounterVec,
    pub route_update_duration_seconds: Histogram,
    pub default_route_gateways: Gauge,

    // HTTP client
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // Application
    pub check_cycles_total: IntCounter,
    pub check_cycle_duration_seconds: Histogram,
    pub application_uptime_seconds: Gauge,

    // Errors
    pub errors_total: IntCounterVec,
    pub consecutive_failures: GaugeVec,

    // Public IP service
    pub public_ip_fetch_total: IntCounterVec,
    pub public_ip_fetch_duration_seconds: HistogramVec,

    // DDNS
    pub ddns_updates_total: IntCounterVec,
    pub ddns_updates_skipped_total: CounterVec,
    pub ddns_update_duration_seconds: HistogramVec,
    pub public_ip_changes_total: IntCounter,
    pub unique_public_ips: Gauge,
}

impl Metrics {
    /// Create a metrics instance with all collectors registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let health_check_total = IntCounterVec::new(
            Opts::new(
                "gateway_health_check_total",
                "Total number of health checks performed",
            ),
            &["gateway_ip", "status"],
        )?;
        let health_check_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "gateway_health_check_duration_seconds",
                "Duration of health checks",
            ),
            &["gateway_ip"],
        )?;
        let active_gateway_count = Gauge::new(
            "gateway_active_count",
            "Current number of active/healthy gateways",
        )?;
        let total_gateway_count = Gauge::new(
            "gateway_total_count",
            "Total number of configured gateways",
        )?;

        let route_updates_total = IntCounterVec::new(
            Opts::new("route_updates_total", "Total number of route update attempts"),
            &["operation", "status"],
        )?;
        let route_update_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "route_update_duration_seconds",
            "Time taken to update routes",
        ))?;
        let default_route_gateways = Gauge::new(
            "default_route_gateways_count",
            "Current number of gateways in the managed routes",
        )?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests made to gateways"),
            &["gateway_ip", "status_code", "method"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new("http_request_duration_seconds", "HTTP request duration"),
            &["gateway_ip"],
        )?;

        let check_cycles_total = IntCounter::new(
            "check_cycles_total",
            "Total number of gateway check cycles completed",
        )?;
        let check_cycle_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "check_cycle_duration_seconds",
            "Duration of complete check cycles",
        ))?;
        let application_uptime_seconds = Gauge::new(
            "application_uptime_seconds",
            "Application uptime in seconds",
        )?;

        let errors_total = IntCounterVec::new(
            Opts::new("errors_total", "Total errors encountered"),
            &["type"],
        )?;
        let consecutive_failures = GaugeVec::new(
            Opts::new(
                "consecutive_failures_count",
                "Current consecutive failures per gateway",
            ),
            &["gateway_ip"],
        )?;

        let public_ip_fetch_total = IntCounterVec::new(
            Opts::new(
                "public_ip_fetch_total",
                "Total public IP fetch attempts per gateway",
            ),
            &["gateway_ip", "status"],
        )?;
        let public_ip_fetch_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "public_ip_fetch_duration_seconds",
                "Duration of public IP fetches",
            ),
            &["gateway_ip"],
        )?;

        let ddns_updates_total = IntCounterVec::new(
            Opts::new("ddns_updates_total", "Total DDNS update attempts"),
            &["provider", "status"],
        )?;
        let ddns_updates_skipped_total = CounterVec::new(
            Opts::new("ddns_updates_skipped_total", "Total skipped DDNS updates"),
            &["provider", "reason"],
        )?;
        let ddns_update_duration_seconds = HistogramVec::new(
            HistogramOpts::new("ddns_update_duration_seconds", "Duration of DDNS updates"),
            &["provider"],
        )?;
        let public_ip_changes_total = IntCounter::new(
            "public_ip_changes_total",
            "Times the set of gateway public IPs changed",
        )?;
        let unique_public_ips = Gauge::new(
            "unique_public_ips",
            "Number of unique public IPs across active gateways",
        )?;

        registry.register(Box::new(health_check_total.clone()))?;
        registry.register(Box::new(health_check_duration_seconds.clone()))?;
        registry.register(Box::new(active_gateway_count.clone()))?;
        registry.register(Box::new(total_gateway_count.clone()))?;
        registry.register(Box::new(route_updates_total.clone()))?;
        registry.register(Box::new(route_update_duration_seconds.clone()))?;
        registry.register(Box::new(default_route_gateways.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(check_cycles_total.clone()))?;
        registry.register(Box::new(check_cycle_duration_seconds.clone()))?;
        registry.register(Box::new(application_uptime_seconds.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(consecutive_failures.clone()))?;
        registry.register(Box::new(public_ip_fetch_total.clone()))?;
        registry.register(Box::new(public_ip_fetch_duration_seconds.clone()))?;
        registry.register(Box::new(ddns_updates_total.clone()))?;
        registry.register(Box::new(ddns_updates_skipped_total.clone()))?;
        registry.register(Box::new(ddns_update_duration_seconds.clone()))?;
        registry.register(Box::new(public_ip_changes_total.clone()))?;
        registry.register(Box::new(unique_public_ips.clone()))?;

        Ok(Self {
            registry,
            health_check_total,
            health_check_duration_seconds,
            active_gateway_count,
            total_gateway_count,
            route_updates_total,
            route_update_duration_seconds,
            default_route_gateways,
            http_requests_total,
            http_request_duration_seconds,
            check_cycles_total,
            check_cycle_duration_seconds,
            application_uptime_seconds,
            errors_total,
            consecutive_failures,
            public_ip_fetch_total,
            public_ip_fetch_duration_seconds,
            ddns_updates_total,
            ddns_updates_skipped_total,
            ddns_update_duration_seconds,
            public_ip_changes_total,
            unique_public_ips,
        })
    }

    /// Encode all metrics to the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }

    /// Record an error by type.
    pub fn record_error(&self, error_type: &str) {
        self.errors_total.with_label_values(&[error_type]).inc();
    }
}
