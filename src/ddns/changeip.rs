//! ChangeIP provider.
//!
//! Classic username/password DDNS endpoint: a single GET with the full IP
//! list replaces whatever the hostname resolved to before.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::provider::Provider;
use crate::error::{DdnsError, Error, Result};

const CHANGEIP_BASE_URL: &str = "https://nic.changeip.com/nic/update";
const PROVIDER_NAME: &str = "changeip";

pub struct ChangeIpProvider {
    username: String,
    password: String,
    hostname: String,
    base_url: String,
    client: reqwest::Client,
}

impl ChangeIpProvider {
    pub fn new(
        username: String,
        password: String,
        hostname: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            username,
            password,
            hostname,
            base_url: CHANGEIP_BASE_URL.to_string(),
            client,
        })
    }

    /// Point the provider at a different API endpoint. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn provider_err(message: String) -> DdnsError {
        DdnsError::Provider {
            provider: PROVIDER_NAME,
            message,
        }
    }
}

#[async_trait]
impl Provider for ChangeIpProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn update_records(&self, ips: &[String]) -> std::result::Result<(), DdnsError> {
        // The endpoint cannot express "no records". Park the hostname on a
        // non-routable sentinel so clients fail in a diagnosable way.
        let ips = if ips.is_empty() {
            warn!(hostname = %self.hostname, "No IPs provided for DDNS update; setting to 0.0.0.0");
            vec!["0.0.0.0".to_string()]
        } else {
            ips.to_vec()
        };

        debug!(hostname = %self.hostname, ips = ?ips, "Sending DDNS update request");

        let response = self
            .client
            .get(&self.base_url)
            // The myip parameter takes a comma-joined list, not repeats.
            .query(&[("hostname", self.hostname.as_str()), ("myip", &ips.join(","))])
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(|e| Self::provider_err(format!("failed to send update request: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::provider_err(format!("failed to read response: {e}")))?;
        let body = body.trim();

        if !status.is_success() {
            return Err(Self::provider_err(format!(
                "update failed with status {}: {body}",
                status.as_u16()
            )));
        }

        info!(hostname = %self.hostname, response = body, "DDNS update successful");
        Ok(())
    }
}
