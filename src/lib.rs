//! # Gatewatch
//!
//! Linux control-plane agent that health-checks a range of candidate IPv4
//! gateways over HTTP and keeps a kernel ECMP routing configuration in sync
//! with the set of gateways that are currently reachable.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Controller Loop                         │
//! │   probe gateways → reconcile routes → schedule DDNS         │
//! ├──────────────┬──────────────────────┬───────────────────────┤
//! │ Health       │ Route Plane          │ DDNS Updater          │
//! │ Prober       │ (rules + ECMP route) │ (public IPs → A recs) │
//! ├──────────────┴──────────────────────┴───────────────────────┤
//! │              Kernel Routing Adapter (rtnetlink)             │
//! └─────────────────────────────────────────────────────────────┘
//!
//! Traffic to managed destinations is attracted into a private routing table
//! through a small band of policy rules; excluded destinations jump over that
//! table via a deliberately empty fallthrough table, so they keep resolving
//! through the system's ordinary routing.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)] // Gauge values derived from counters
#![allow(clippy::cast_possible_truncation)] // Rule band arithmetic stays within u32
#![allow(clippy::doc_markdown)] // ASCII diagrams in docs

pub mod cli;
pub mod config;
pub mod ddns;
pub mod error;
pub mod gateway;
pub mod iputil;
pub mod metrics;
pub mod monitor;
pub mod netlink;
pub mod routes;

pub use config::Config;
pub use error::{Error, Result};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
