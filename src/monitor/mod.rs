//! Controller loop.
//!
//! Single owner of the gateway set. Each cycle probes every gateway, asks the
//! route plane to reconcile the managed destinations with the active set, and
//! only then hands the active snapshot to the DDNS updater — a provider
//! lookup that depends on routing through a gateway must find the routes
//! already installed.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ipnet::Ipv4Net;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::ddns::DdnsUpdater;
use crate::error::Result;
use crate::gateway::{generate_gateways, Gateway, Prober};
use crate::metrics::Metrics;
use crate::routes::RoutePlane;

/// Drives the probe → route update → DDNS schedule cycle.
pub struct Monitor {
    check_period: Duration,
    managed_routes: Vec<Ipv4Net>,
    gateways: Vec<Gateway>,
    prober: Prober,
    route_plane: RoutePlane,
    ddns: Arc<DdnsUpdater>,
    metrics: Arc<Metrics>,
}

impl Monitor {
    pub fn new(
        cfg: &Config,
        metrics: Arc<Metrics>,
        route_plane: RoutePlane,
        ddns: Arc<DdnsUpdater>,
    ) -> Result<Self> {
        let gateways = generate_gateways(
            cfg.start_ip,
            cfg.end_ip,
            cfg.port,
            &cfg.url_path,
            &cfg.scheme,
        );
        metrics.total_gateway_count.set(gateways.len() as f64);

        let prober = Prober::new(cfg.timeout, metrics.clone())?;

        Ok(Self {
            check_period: cfg.check_period,
            managed_routes: cfg.routes.clone(),
            gateways,
            prober,
            route_plane,
            ddns,
            metrics,
        })
    }

    /// Run cycles at the configured cadence until cancelled.
    ///
    /// The first cycle runs immediately; a fatal route update error
    /// propagates out. Cycles never overlap: a slow cycle delays the next
    /// tick instead of running concurrently with it. Cancellation takes
    /// effect even mid-cycle: the in-flight cycle is dropped, aborting its
    /// outstanding HTTP probes with it.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Gateway monitor stopped");
                return Ok(());
            }
            result = self.run_cycle() => result?,
        }

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.check_period,
            self.check_period,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Gateway monitor stopped");
                    return Ok(());
                }
                result = async {
                    ticker.tick().await;
                    self.run_cycle().await
                } => result?,
            }
        }
    }

    /// One probe/update/schedule cycle.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let start = Instant::now();

        self.prober.probe_all(&mut self.gateways).await;

        let active: Vec<Gateway> = self
            .gateways
            .iter()
            .filter(|g| g.is_active)
            .cloned()
            .collect();

        self.update_routes(&active).await?;

        // Strictly after the route update, so the DDNS pass can reach the
        // provider through the gateways it is about to publish.
        self.ddns.schedule(&active);

        self.metrics
            .check_cycle_duration_seconds
            .observe(start.elapsed().as_secs_f64());
        self.metrics.check_cycles_total.inc();
        Ok(())
    }

    async fn update_routes(&self, active: &[Gateway]) -> Result<()> {
        let start = Instant::now();
        let active_ips: Vec<Ipv4Addr> = active.iter().map(|g| g.ip).collect();

        let result = self
            .route_plane
            .update(&self.managed_routes, &active_ips)
            .await;
        self.metrics
            .route_update_duration_seconds
            .observe(start.elapsed().as_secs_f64());

        match result {
            Err(err) => {
                self.metrics.record_error("route_error");
                self.metrics
                    .route_updates_total
                    .with_label_values(&["update", "failure"])
                    .inc();
                Err(err.into())
            }
            Ok(()) => {
                self.metrics
                    .route_updates_total
                    .with_label_values(&["update", "success"])
                    .inc();
                self.metrics
                    .default_route_gateways
                    .set(active_ips.len() as f64);
                Ok(())
            }
        }
    }

    /// Tear down the route plane. Called from shutdown after `run` returns.
    pub async fn close(&self) -> Result<()> {
        self.route_plane.close().await?;
        Ok(())
    }

    /// Current gateway set. Exposed for tests.
    pub fn gateways(&self) -> &[Gateway] {
        &self.gateways
    }
}
