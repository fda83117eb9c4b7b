//! Public IP lookup through a gateway.
//!
//! Each active gateway exposes (or proxies to) a "what is my IP" service; the
//! externally-observed address is what ends up published via DDNS.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::ACCEPT;
use tracing::debug;

use super::Gateway;
use crate::config::PublicIpServiceConfig;
use crate::error::{Error, PublicIpError, Result};
use crate::metrics::Metrics;

/// JSON keys accepted for the address, in order of preference.
const IP_ADDRESS_KEYS: [&str; 4] = ["public_ip", "ip_address", "ip_addr", "ip"];

/// Client for the per-gateway public IP service.
pub struct PublicIpClient {
    client: reqwest::Client,
    cfg: PublicIpServiceConfig,
    metrics: Arc<Metrics>,
}

impl PublicIpClient {
    pub fn new(
        cfg: PublicIpServiceConfig,
        timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            cfg,
            metrics,
        })
    }

    /// Fetch the public IPv4 address observed through `gateway`.
    ///
    /// Accepts either a plain-text IPv4 body (surrounding whitespace is
    /// trimmed) or a JSON object carrying one of the well-known address keys.
    pub async fn fetch(&self, gateway: &Gateway) -> std::result::Result<Ipv4Addr, PublicIpError> {
        let gateway_ip = gateway.ip.to_string();
        let record_failure = || {
            self.metrics
                .public_ip_fetch_total
                .with_label_values(&[&gateway_ip, "failure"])
                .inc();
        };

        if !gateway.is_active {
            record_failure();
            return Err(PublicIpError::NotActive(gateway.ip));
        }

        // Query the gateway itself unless a dedicated hostname is configured.
        let host = if self.cfg.hostname.is_empty() {
            gateway.ip.to_string()
        } else {
            self.cfg.hostname.clone()
        };
        let url = format!(
            "{}://{}:{}{}",
            self.cfg.scheme, host, self.cfg.port, self.cfg.path
        );

        let mut request = self.client.get(&url).header(ACCEPT, "application/json");
        if !self.cfg.username.is_empty() && !self.cfg.password.is_empty() {
            request = request.basic_auth(&self.cfg.username, Some(&self.cfg.password));
        }

        let start = Instant::now();
        let result = request.send().await;
        self.metrics
            .public_ip_fetch_duration_seconds
            .with_label_values(&[&gateway_ip])
            .observe(start.elapsed().as_secs_f64());

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                record_failure();
                return Err(PublicIpError::Request(err.to_string()));
            }
        };

        let status = response.status();
        // Read the body even on a failure status so the error is actionable.
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                record_failure();
                return Err(PublicIpError::Request(format!(
                    "failed to read response body: {err}"
                )));
            }
        };

        if !status.is_success() {
            record_failure();
            return Err(PublicIpError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let public_ip = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(serde_json::Value::Object(fields)) => {
                let found = IP_ADDRESS_KEYS.iter().find_map(|key| {
                    fields
                        .get(*key)
                        .and_then(serde_json::Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_owned)
                });
                match found {
                    Some(ip) => ip,
                    None => {
                        record_failure();
                        return Err(PublicIpError::NoIpField(body));
                    }
                }
            }
            // Anything that is not a JSON object is treated as plain text.
            _ => body,
        };

        let trimmed = public_ip.trim();
        let parsed: IpAddr = match trimmed.parse() {
            Ok(ip) => ip,
            Err(_) => {
                record_failure();
                return Err(PublicIpError::InvalidIp(trimmed.to_string()));
            }
        };
        let IpAddr::V4(v4) = parsed else {
            record_failure();
            return Err(PublicIpError::NotIpv4(trimmed.to_string()));
        };

        self.metrics
            .public_ip_fetch_total
            .with_label_values(&[&gateway_ip, "success"])
            .inc();
        debug!(gateway = %gateway.ip, public_ip = %v4, "Fetched public IP");
        Ok(v4)
    }
}
