//! Debounced DDNS updating.
//!
//! The controller loop calls [`DdnsUpdater::schedule`] after every cycle; the
//! updater's own task picks up the latest gateway snapshot, collects the
//! public IPs observed through the active gateways, and reconciles the
//! provider's A records when the set actually changed.

mod changeip;
mod dynudns;
pub mod provider;

pub use changeip::ChangeIpProvider;
pub use dynudns::DynuDnsProvider;
pub use provider::{new_provider, Provider};

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, PublicIpServiceConfig};
use crate::error::{DdnsError, Result};
use crate::gateway::{Gateway, PublicIpClient};
use crate::iputil;
use crate::metrics::Metrics;

/// Serialized, change-driven DDNS updater.
pub struct DdnsUpdater {
    provider: Option<Arc<dyn Provider>>,
    public_ip: PublicIpClient,
    require_ip_address: Option<Ipv4Addr>,
    ddns_timeout: Duration,
    metrics: Arc<Metrics>,

    /// Snapshot the next run should publish. Written by `schedule`.
    next_active: Mutex<Vec<Gateway>>,
    /// IPs from the last successful (or no-change) publish.
    last_published: Mutex<Vec<String>>,

    /// Capacity-1 wakeup channel: at most one update is ever queued, and a
    /// newer snapshot simply supersedes whatever the queued wakeup finds.
    signal_tx: mpsc::Sender<()>,
    signal_rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl DdnsUpdater {
    pub fn new(cfg: &Config, metrics: Arc<Metrics>) -> Result<Self> {
        let provider = if cfg.is_ddns_enabled() {
            Some(new_provider(&cfg.ddns)?)
        } else {
            None
        };
        Self::with_provider(
            provider,
            cfg.public_ip_service.clone(),
            cfg.ddns.require_ip_address,
            cfg.timeout,
            cfg.ddns.timeout,
            metrics,
        )
    }

    /// Construct with an explicit provider; this is what tests use.
    pub fn with_provider(
        provider: Option<Arc<dyn Provider>>,
        public_ip_service: PublicIpServiceConfig,
        require_ip_address: Option<Ipv4Addr>,
        fetch_timeout: Duration,
        ddns_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let public_ip = PublicIpClient::new(public_ip_service, fetch_timeout, metrics.clone())?;
        let (signal_tx, signal_rx) = mpsc::channel(1);
        Ok(Self {
            provider,
            public_ip,
            require_ip_address,
            ddns_timeout,
            metrics,
            next_active: Mutex::new(Vec::new()),
            last_published: Mutex::new(Vec::new()),
            signal_tx,
            signal_rx: tokio::sync::Mutex::new(signal_rx),
        })
    }

    /// Hand the updater a new active-gateway snapshot.
    ///
    /// A snapshot whose IP set matches the previously scheduled one is a
    /// no-op, so repeated cycles with a stable fleet never wake the task.
    /// Never blocks.
    pub fn schedule(&self, active_gateways: &[Gateway]) {
        if self.provider.is_none() {
            return;
        }

        let mut next_ips: Vec<String> =
            active_gateways.iter().map(|g| g.ip.to_string()).collect();
        next_ips.sort();

        let mut scheduled = self.next_active.lock();
        let mut scheduled_ips: Vec<String> =
            scheduled.iter().map(|g| g.ip.to_string()).collect();
        scheduled_ips.sort();

        if next_ips == scheduled_ips {
            return;
        }

        *scheduled = active_gateways.to_vec();
        drop(scheduled);

        // Full channel means a wakeup is already pending; it will observe
        // the snapshot we just stored.
        let _ = self.signal_tx.try_send(());
    }

    /// Number of queued wakeups (0 or 1). Used by tests.
    pub fn pending_signals(&self) -> usize {
        self.signal_tx.max_capacity() - self.signal_tx.capacity()
    }

    /// Run the update loop until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut signal_rx = self.signal_rx.lock().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                received = signal_rx.recv() => {
                    if received.is_none() {
                        return;
                    }
                    // A cancelled run exits without touching last_published.
                    tokio::select! {
                        () = cancel.cancelled() => return,
                        result = tokio::time::timeout(self.ddns_timeout, self.update()) => {
                            match result {
                                Err(_) => error!("DDNS update timed out"),
                                Ok(Err(err)) => error!(error = %err, "DDNS update failed"),
                                Ok(Ok(())) => {}
                            }
                        }
                    }
                }
            }
        }
    }

    /// One update pass over the most recent snapshot.
    async fn update(&self) -> Result<()> {
        let Some(provider) = self.provider.as_deref() else {
            return Ok(());
        };

        let mut snapshot: Vec<Gateway> = self.next_active.lock().clone();

        if let Some(required_ip) = self.require_ip_address {
            let present = iputil::has_interface_with_ip(required_ip)
                .await
                .map_err(|e| DdnsError::RequiredIpCheck {
                    ip: required_ip,
                    reason: e.to_string(),
                })?;
            if !present {
                self.metrics
                    .ddns_updates_skipped_total
                    .with_label_values(&[provider.name(), "required_ip_not_found"])
                    .inc();
                debug!(
                    required_ip = %required_ip,
                    "Skipping DDNS update: required IP address not found on any interface"
                );
                return Ok(());
            }
        }

        // Fan out public IP lookups; a failing gateway is logged and skipped.
        let fetched = join_all(snapshot.iter().map(|gateway| async move {
            match self.public_ip.fetch(gateway).await {
                Ok(ip) => Some(ip),
                Err(err) => {
                    warn!(gateway = %gateway.ip, error = %err, "Failed to fetch public IP from gateway");
                    None
                }
            }
        }))
        .await;
        for (gateway, public_ip) in snapshot.iter_mut().zip(&fetched) {
            if public_ip.is_some() {
                gateway.public_ip = *public_ip;
            }
        }

        // Unique, sorted list of public IPs.
        let unique: BTreeSet<String> = snapshot
            .iter()
            .filter_map(|g| g.public_ip)
            .map(|ip| ip.to_string())
            .collect();
        let public_ips: Vec<String> = unique.into_iter().collect();
        self.metrics.unique_public_ips.set(public_ips.len() as f64);

        let last_published = self.last_published.lock().clone();
        if public_ips == last_published {
            self.metrics
                .ddns_updates_skipped_total
                .with_label_values(&[provider.name(), "no_change"])
                .inc();
            debug!(ips = ?public_ips, "Public IPs unchanged, skipping DDNS update");
            return Ok(());
        }

        self.metrics.public_ip_changes_total.inc();
        info!(ips = ?public_ips, "Public IPs changed, updating DDNS");

        let start = Instant::now();
        let result = provider.update_records(&public_ips).await;
        self.metrics
            .ddns_update_duration_seconds
            .with_label_values(&[provider.name()])
            .observe(start.elapsed().as_secs_f64());

        match result {
            Err(err) => {
                self.metrics
                    .ddns_updates_total
                    .with_label_values(&[provider.name(), "failure"])
                    .inc();
                Err(err.into())
            }
            Ok(()) => {
                self.metrics
                    .ddns_updates_total
                    .with_label_values(&[provider.name(), "success"])
                    .inc();
                *self.last_published.lock() = public_ips;
                Ok(())
            }
        }
    }
}
