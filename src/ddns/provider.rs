//! DDNS provider contract and dispatch.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DdnsConfig;
use crate::error::{DdnsError, Result};

use super::changeip::ChangeIpProvider;
use super::dynudns::DynuDnsProvider;

/// A dynamic DNS provider.
///
/// `update_records` must leave the provider in a state where the set of
/// A records for the configured hostname equals exactly `ips` — no more, no
/// fewer — and must be safe to re-invoke with the same list.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Reconcile the hostname's A records with `ips` (sorted, deduplicated).
    async fn update_records(&self, ips: &[String]) -> std::result::Result<(), DdnsError>;
}

/// Create the configured provider.
pub fn new_provider(cfg: &DdnsConfig) -> Result<Arc<dyn Provider>> {
    match cfg.provider.as_str() {
        "dynudns" => Ok(Arc::new(DynuDnsProvider::new(
            cfg.password.clone(),
            cfg.hostname.clone(),
            cfg.timeout,
            cfg.record_ttl,
        )?)),
        "changeip" => Ok(Arc::new(ChangeIpProvider::new(
            cfg.username.clone(),
            cfg.password.clone(),
            cfg.hostname.clone(),
            cfg.timeout,
        )?)),
        other => Err(DdnsError::UnsupportedProvider(other.to_string()).into()),
    }
}
