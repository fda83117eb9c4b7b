//! DynuDNS provider.
//!
//! API-key REST provider. Domain identity (root domain id and node label) is
//! fetched lazily on the first update because it needs network access that may
//! not exist at startup, then cached for the process lifetime.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{join_all, BoxFuture};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::provider::Provider;
use crate::error::{DdnsError, Error, Result};

const DYNUDNS_BASE_URL: &str = "https://api.dynu.com/v2";
const PROVIDER_NAME: &str = "dynudns";

pub struct DynuDnsProvider {
    api_key: String,
    hostname: String,
    record_ttl: Duration,
    base_url: String,
    client: reqwest::Client,
    domain: OnceCell<DomainInfo>,
}

#[derive(Debug, Clone)]
struct DomainInfo {
    root_domain_id: i64,
    node_name: String,
}

/// Response from `/dns/getroot/{hostname}`.
#[derive(Deserialize)]
struct RootResponse {
    id: i64,
    #[serde(default)]
    node: String,
}

/// Response from `/dns/{id}/record`.
#[derive(Deserialize)]
struct RecordsResponse {
    #[serde(rename = "dnsRecords", default)]
    dns_records: Vec<DnsRecord>,
}

#[derive(Deserialize, Debug, Clone)]
struct DnsRecord {
    id: i64,
    #[serde(rename = "nodeName", default)]
    node_name: String,
    #[serde(rename = "recordType", default)]
    record_type: String,
    #[serde(rename = "ipv4Address", default)]
    ipv4_address: String,
}

#[derive(Serialize)]
struct RecordRequest<'a> {
    #[serde(rename = "nodeName")]
    node_name: &'a str,
    #[serde(rename = "recordType")]
    record_type: &'static str,
    ttl: u64,
    state: bool,
    #[serde(rename = "ipv4Address")]
    ipv4_address: &'a str,
}

/// Error envelope the API returns alongside failure status codes.
#[derive(Deserialize)]
struct ExceptionResponse {
    exception: Option<ApiException>,
}

#[derive(Deserialize)]
struct ApiException {
    #[serde(default)]
    message: String,
}

impl DynuDnsProvider {
    pub fn new(
        api_key: String,
        hostname: String,
        timeout: Duration,
        record_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key,
            hostname,
            record_ttl,
            base_url: DYNUDNS_BASE_URL.to_string(),
            client,
            domain: OnceCell::new(),
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

    /// Issue a request with the common headers and API error handling.
    /// Returns the raw body on success.
    async fn api_call(
        &self,
        method: Method,
        url: String,
        body: Option<serde_json::Value>,
    ) -> std::result::Result<Vec<u8>, DdnsError> {
        let mut request = self
            .client
            .request(method, &url)
            .header("API-Key", &self.api_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::provider_err(format!("request failed: {e}")))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::provider_err(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            if let Ok(envelope) = serde_json::from_slice::<ExceptionResponse>(&bytes) {
                if let Some(exception) = envelope.exception {
                    return Err(Self::provider_err(format!(
                        "API error: {} ({})",
                        exception.message,
                        status.as_u16()
                    )));
                }
            }
            return Err(Self::provider_err(format!(
                "API returned status {}: {}",
                status.as_u16(),
                String::from_utf8_lossy(&bytes)
            )));
        }

        Ok(bytes.to_vec())
    }

    /// Root domain id and node label for the configured hostname, fetched
    /// once and cached.
    async fn domain_info(&self) -> std::result::Result<&DomainInfo, DdnsError> {
        self.domain
            .get_or_try_init(|| async {
                let url = format!("{}/dns/getroot/{}", self.base_url, self.hostname);
                let bytes = self.api_call(Method::GET, url, None).await?;
                let root: RootResponse = serde_json::from_slice(&bytes)
                    .map_err(|e| Self::provider_err(format!("failed to parse getroot response: {e}")))?;

                info!(
                    root_domain_id = root.id,
                    node_name = %root.node,
                    "Initialized DynuDNS domain info"
                );
                Ok(DomainInfo {
                    root_domain_id: root.id,
                    node_name: root.node,
                })
            })
            .await
    }

    /// Existing A records for our node.
    async fn existing_records(
        &self,
        domain: &DomainInfo,
    ) -> std::result::Result<Vec<DnsRecord>, DdnsError> {
        let url = format!("{}/dns/{}/record", self.base_url, domain.root_domain_id);
        let bytes = self.api_call(Method::GET, url, None).await?;
        let response: RecordsResponse = serde_json::from_slice(&bytes)
            .map_err(|e| Self::provider_err(format!("failed to parse records response: {e}")))?;

        Ok(response
            .dns_records
            .into_iter()
            .filter(|r| r.node_name == domain.node_name && r.record_type == "A")
            .collect())
    }

    async fn create_record(
        &self,
        domain: &DomainInfo,
        ip: &str,
    ) -> std::result::Result<(), DdnsError> {
        let url = format!("{}/dns/{}/record", self.base_url, domain.root_domain_id);
        let request = RecordRequest {
            node_name: &domain.node_name,
            record_type: "A",
            ttl: self.record_ttl.as_secs(),
            state: true,
            ipv4_address: ip,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| Self::provider_err(format!("failed to serialize record: {e}")))?;
        self.api_call(Method::POST, url, Some(body)).await?;
        Ok(())
    }

    async fn delete_record(
        &self,
        domain: &DomainInfo,
        record_id: i64,
    ) -> std::result::Result<(), DdnsError> {
        let url = format!(
            "{}/dns/{}/record/{}",
            self.base_url, domain.root_domain_id, record_id
        );
        self.api_call(Method::DELETE, url, None).await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for DynuDnsProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn update_records(&self, ips: &[String]) -> std::result::Result<(), DdnsError> {
        let domain = self.domain_info().await?.clone();

        let existing = self.existing_records(&domain).await?;
        let existing_ips: HashSet<&str> =
            existing.iter().map(|r| r.ipv4_address.as_str()).collect();

        let records_to_delete: Vec<&DnsRecord> = existing
            .iter()
            .filter(|r| !ips.contains(&r.ipv4_address))
            .collect();
        let ips_to_add: Vec<&String> = ips
            .iter()
            .filter(|ip| !existing_ips.contains(ip.as_str()))
            .collect();

        info!(
            records_to_delete = records_to_delete.len(),
            ips_to_add = ips_to_add.len(),
            hostname = %self.hostname,
            "Calculated DNS record changes"
        );

        // Deletions and creations are independent; issue them together and
        // aggregate every failure rather than stopping at the first.
        let mut operations: Vec<BoxFuture<'_, std::result::Result<(), DdnsError>>> = Vec::new();
        for record in &records_to_delete {
            let domain = &domain;
            operations.push(Box::pin(async move {
                self.delete_record(domain, record.id).await.map_err(|e| {
                    Self::provider_err(format!(
                        "failed to delete record {} (IP: {}): {e}",
                        record.id, record.ipv4_address
                    ))
                })?;
                debug!(record_id = record.id, ip = %record.ipv4_address, "Deleted DNS record");
                Ok(())
            }));
        }
        for ip in &ips_to_add {
            let domain = &domain;
            operations.push(Box::pin(async move {
                self.create_record(domain, ip)
                    .await
                    .map_err(|e| Self::provider_err(format!("failed to create record for IP {ip}: {e}")))?;
                debug!(ip = %ip, "Created DNS record");
                Ok(())
            }));
        }

        let failures: Vec<String> = join_all(operations)
            .await
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();
        if !failures.is_empty() {
            return Err(Self::provider_err(format!(
                "DNS record update failed: {}",
                failures.join("; ")
            )));
        }

        info!(hostname = %self.hostname, "Successfully updated DNS records");
        Ok(())
    }
}
