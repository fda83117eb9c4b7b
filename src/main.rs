//! Gatewatch daemon entry point.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gatewatch::cli::Cli;
use gatewatch::config::{self, Config};
use gatewatch::ddns::DdnsUpdater;
use gatewatch::error::{Error, Result};
use gatewatch::metrics::{serve_metrics, Metrics};
use gatewatch::monitor::Monitor;
use gatewatch::netlink::NetlinkOps;
use gatewatch::routes::RoutePlane;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("gatewatch: {err}");
            ExitCode::FAILURE
        }
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_cli(cli)?;
    config::init_logging(&cfg.log_level)?;

    let metrics = Arc::new(
        Metrics::new().map_err(|e| Error::Config(format!("failed to create metrics: {e}")))?,
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // Bind before spawning so a bad metrics port fails startup synchronously.
    let listener = TcpListener::bind(("0.0.0.0", cfg.metrics_port))
        .await
        .map_err(|e| {
            Error::Config(format!(
                "failed to bind metrics port {}: {e}",
                cfg.metrics_port
            ))
        })?;
    {
        let metrics = metrics.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_metrics(listener, metrics, cancel.clone()).await {
                error!(error = %err, "Metrics server failed");
            }
            // The agent is headless without its metrics endpoint.
            cancel.cancel();
        });
    }

    let ddns = Arc::new(DdnsUpdater::new(&cfg, metrics.clone())?);
    {
        let ddns = ddns.clone();
        let cancel = cancel.clone();
        info!(timeout = ?cfg.ddns.timeout, "Starting DDNS updater");
        tokio::spawn(async move { ddns.run(cancel).await });
    }

    let ops = Arc::new(
        NetlinkOps::new()
            .map_err(|e| Error::Config(format!("failed to open netlink connection: {e}")))?,
    );
    let route_plane = RoutePlane::new(
        ops,
        cfg.exclude_cidrs.clone(),
        cfg.first_routing_table_id,
        cfg.first_rule_preference,
    )
    .await?;

    let mut monitor = Monitor::new(&cfg, metrics.clone(), route_plane, ddns)?;

    info!(
        gateways = monitor.gateways().len(),
        check_period = ?cfg.check_period,
        timeout = ?cfg.timeout,
        "Starting gateway monitor"
    );

    let run_result = monitor.run(cancel.clone()).await;

    // Stop the DDNS task and metrics server, then tear the route plane down.
    cancel.cancel();
    let close_result = monitor.close().await;

    match (run_result, close_result) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(run_err), Ok(())) => Err(run_err),
        (Ok(()), Err(close_err)) => {
            Err(anyhow::anyhow!("failed to close gateway monitor: {close_err}").into())
        }
        (Err(run_err), Err(close_err)) => Err(anyhow::anyhow!(
            "{run_err}; additionally failed to close gateway monitor: {close_err}"
        )
        .into()),
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for interrupt signal");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for terminate signal");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
