//! Concurrent HTTP health checking.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::debug;

use super::Gateway;
use crate::error::{Error, Result};
use crate::metrics::Metrics;

/// Probes every gateway's health URL once per cycle.
pub struct Prober {
    client: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl Prober {
    /// Build a prober whose requests time out after `timeout`.
    pub fn new(timeout: Duration, metrics: Arc<Metrics>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, metrics })
    }

    /// Probe all gateways concurrently and apply the results.
    ///
    /// The gateway set is only mutated after every probe has completed, so
    /// downstream steps of a cycle always see a consistent snapshot.
    pub async fn probe_all(&self, gateways: &mut [Gateway]) {
        debug!(count = gateways.len(), "Checking gateways");

        let results = join_all(
            gateways
                .iter()
                .map(|g| self.probe(g.ip, g.url.clone())),
        )
        .await;

        for (gateway, is_active) in gateways.iter_mut().zip(results) {
            gateway.is_active = is_active;
            if is_active {
                gateway.consecutive_failures = 0;
            } else {
                gateway.consecutive_failures += 1;
            }
            self.metrics
                .consecutive_failures
                .with_label_values(&[&gateway.ip.to_string()])
                .set(gateway.consecutive_failures as f64);
        }

        let active_count = gateways.iter().filter(|g| g.is_active).count();
        self.metrics.active_gateway_count.set(active_count as f64);

        debug!(
            active_count,
            total_count = gateways.len(),
            "Gateway check complete"
        );
    }

    /// One health check: any 2xx response means healthy. The body is ignored.
    async fn probe(&self, ip: Ipv4Addr, url: String) -> bool {
        let gateway_ip = ip.to_string();
        let start = Instant::now();

        let result = self.client.get(&url).send().await;
        let duration = start.elapsed().as_secs_f64();

        self.metrics
            .health_check_duration_seconds
            .with_label_values(&[&gateway_ip])
            .observe(duration);
        self.metrics
            .http_request_duration_seconds
            .with_label_values(&[&gateway_ip])
            .observe(duration);

        match result {
            Err(err) => {
                let error_type = if err.is_timeout() {
                    "timeout"
                } else {
                    "network_error"
                };
                self.metrics.record_error(error_type);
                self.metrics
                    .health_check_total
                    .with_label_values(&[&gateway_ip, "failure"])
                    .inc();
                debug!(gateway = %ip, error = %err, "Health check failed");
                false
            }
            Ok(response) => {
                let status = response.status();
                self.metrics
                    .http_requests_total
                    .with_label_values(&[&gateway_ip, status.as_str(), "GET"])
                    .inc();

                if status.is_success() {
                    self.metrics
                        .health_check_total
                        .with_label_values(&[&gateway_ip, "success"])
                        .inc();
                    debug!(gateway = %ip, status = %status, "Gateway is healthy");
                    true
                } else {
                    self.metrics
                        .health_check_total
                        .with_label_values(&[&gateway_ip, "failure"])
                        .inc();
                    self.metrics.record_error("invalid_response");
                    debug!(gateway = %ip, status = %status, "Gateway returned unhealthy status");
                    false
                }
            }
        }
    }
}
