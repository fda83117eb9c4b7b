//! Route plane: policy rules and the ECMP gateway table.
//!
//! Destinations are excluded from gateway routing with rules that jump over
//! the gateway table lookup. Excluded traffic lands in a deliberately empty
//! fallthrough table, falls through, and resolves via the system's ordinary
//! tables (main, default). Everything else is looked up in the gateway table,
//! which holds one ECMP route per managed destination.
//!
//! The rule list looks like this (ascending priority, system rules elided):
//!
//! ```text
//! 0:                      from all lookup local
//! base+0 .. base+N-1:     to <exclude[i]> goto fallthrough rule
//! base+N:                 from all lookup <gateway table>
//! base+N+1:               from all lookup <fallthrough table>   (empty)
//! 32766:                  from all lookup main
//! 32767:                  from all lookup default
//! ```
//!
//! Install order matters so that traffic flowing before startup is never
//! interrupted: the fallthrough rule goes in first, then the exclude rules
//! (nothing is impacted yet), and only then the gateway rule, at which point
//! traffic starts being attracted into the managed table. Teardown runs in
//! reverse.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnet::Ipv4Net;
use tracing::{debug, error, info};

use crate::error::RoutingError;
use crate::iputil::reduce_networks;
use crate::netlink::{RouteEntry, RouteOps, RuleEntry};

/// Highest usable routing table id. 254 and 255 are the kernel's main and
/// local tables; the plane needs two consecutive ids.
const MAX_FIRST_TABLE_ID: u32 = 252;

/// Highest usable rule preference; 32766 and 32767 are the system rules.
const MAX_RULE_PREFERENCE: u32 = 32766;

/// Owns the two private routing tables and the contiguous rule band.
#[derive(Debug)]
pub struct RoutePlane {
    ops: Arc<dyn RouteOps>,

    gateway_table: u32,
    fallthrough_table: u32,

    first_exclude_pref: u32,
    gateway_rule_pref: u32,
    fallthrough_rule_pref: u32,

    exclude_nets: Vec<Ipv4Net>,
}

impl RoutePlane {
    /// Validate the table/preference layout and install the rule band.
    ///
    /// On rule installation failure, whatever was installed is torn down
    /// best-effort and the original error is returned.
    pub async fn new(
        ops: Arc<dyn RouteOps>,
        nets_to_exclude: Vec<Ipv4Net>,
        first_table_id: u32,
        first_rule_preference: u32,
    ) -> Result<Self, RoutingError> {
        if first_table_id < 1 || first_table_id > MAX_FIRST_TABLE_ID {
            return Err(RoutingError::InvalidTableId {
                id: first_table_id,
                max: MAX_FIRST_TABLE_ID,
            });
        }

        let exclude_nets = reduce_networks(nets_to_exclude);

        // The band needs N exclude rules plus the gateway and fallthrough
        // rules, all below the system rules at 32766.
        let required = exclude_nets.len() as u32 + 2;
        let max_pref = MAX_RULE_PREFERENCE - required + 1;
        if first_rule_preference < 1 || first_rule_preference > max_pref {
            return Err(RoutingError::InvalidRulePreference {
                pref: first_rule_preference,
                max: max_pref,
            });
        }

        let gateway_rule_pref = first_rule_preference + exclude_nets.len() as u32;
        let plane = Self {
            ops,
            gateway_table: first_table_id,
            fallthrough_table: first_table_id + 1,
            first_exclude_pref: first_rule_preference,
            gateway_rule_pref,
            fallthrough_rule_pref: gateway_rule_pref + 1,
            exclude_nets,
        };

        if let Err(err) = plane.install_rules().await {
            if let Err(cleanup_err) = plane.remove_rules().await {
                error!(error = %cleanup_err, "Failed to clean up rules after install failure");
            }
            return Err(err);
        }

        info!(
            gateway_table = plane.gateway_table,
            fallthrough_table = plane.fallthrough_table,
            first_rule_preference = plane.first_exclude_pref,
            excluded_networks = plane.exclude_nets.len(),
            "Configured route plane"
        );
        Ok(plane)
    }

    /// Reconcile the gateway table with the current set of active gateways.
    ///
    /// With no active gateways the table is purged; traffic to managed
    /// destinations then falls through to the system's pre-existing routing.
    /// Otherwise every managed destination gets an ECMP route whose next-hops
    /// are the active gateways, and stale routes for destinations that are no
    /// longer managed are dropped afterwards.
    pub async fn update(
        &self,
        managed: &[Ipv4Net],
        active_gateways: &[Ipv4Addr],
    ) -> Result<(), RoutingError> {
        if active_gateways.is_empty() {
            self.purge_routes().await?;
            debug!("No active gateways, gateway table purged");
            return Ok(());
        }

        // Sort lexicographically by string form for consistent ordering.
        let mut nexthops = active_gateways.to_vec();
        nexthops.sort_by_key(std::string::ToString::to_string);

        for destination in managed {
            let route = RouteEntry {
                destination: destination.trunc(),
                table: self.gateway_table,
                nexthops: nexthops.clone(),
            };
            self.ops
                .route_replace(&route)
                .await
                .map_err(|e| route_err("replace", route.destination, e))?;
        }

        // Replace first, delete stale second, so between two successful
        // updates every managed destination sees either the old or the new
        // next-hop set, never a mix.
        let existing = self.ops.route_list(self.gateway_table).await?;
        for route in existing {
            if managed.iter().any(|d| d.trunc() == route.destination) {
                continue;
            }
            self.ops
                .route_del(&route)
                .await
                .map_err(|e| route_err("delete", route.destination, e))?;
            debug!(destination = %route.destination, "Removed stale route");
        }

        debug!(gateways = ?nexthops, "Updated ECMP routes");
        Ok(())
    }

    /// Tear down routes and rules, in strict reverse order of installation.
    ///
    /// Every failure is collected and surfaced together; later steps still
    /// run. Calling this twice is harmless.
    pub async fn close(&self) -> Result<(), RoutingError> {
        let mut failures = Vec::new();

        // Routes go first so traffic stops being attracted into the table.
        if let Err(e) = self.purge_routes().await {
            failures.push(format!("failed to remove routes during close: {e}"));
        }

        if let Err(e) = self.remove_rules().await {
            failures.push(format!("failed to remove rules during close: {e}"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(RoutingError::Teardown(failures.join("; ")))
        }
    }

    pub fn gateway_table(&self) -> u32 {
        self.gateway_table
    }

    pub fn fallthrough_table(&self) -> u32 {
        self.fallthrough_table
    }

    pub fn gateway_rule_preference(&self) -> u32 {
        self.gateway_rule_pref
    }

    pub fn fallthrough_rule_preference(&self) -> u32 {
        self.fallthrough_rule_pref
    }

    pub fn exclude_networks(&self) -> &[Ipv4Net] {
        &self.exclude_nets
    }

    async fn install_rules(&self) -> Result<(), RoutingError> {
        // Rules support no replace operation, only add and delete. Remove any
        // leftovers at our priorities from a previous run first.
        self.remove_rules().await?;

        let fallthrough = RuleEntry {
            priority: self.fallthrough_rule_pref,
            destination: None,
            table: Some(self.fallthrough_table),
            goto_priority: None,
        };
        self.ops
            .rule_add(&fallthrough)
            .await
            .map_err(|e| rule_err("add", self.fallthrough_rule_pref, e))?;
        debug!(
            table = self.fallthrough_table,
            preference = self.fallthrough_rule_pref,
            "Added fallthrough table rule"
        );

        for (i, exclude_net) in self.exclude_nets.iter().enumerate() {
            let pref = self.first_exclude_pref + i as u32;
            let rule = RuleEntry {
                priority: pref,
                destination: Some(*exclude_net),
                table: None,
                // Jump over the gateway table rule.
                goto_priority: Some(self.fallthrough_rule_pref),
            };
            self.ops
                .rule_add(&rule)
                .await
                .map_err(|e| rule_err("add", pref, e))?;
            debug!(network = %exclude_net, preference = pref, "Added exclude rule");
        }

        // Only after this rule exists does traffic start flowing through the
        // managed routes.
        let gateway = RuleEntry {
            priority: self.gateway_rule_pref,
            destination: None,
            table: Some(self.gateway_table),
            goto_priority: None,
        };
        self.ops
            .rule_add(&gateway)
            .await
            .map_err(|e| rule_err("add", self.gateway_rule_pref, e))?;
        debug!(
            table = self.gateway_table,
            preference = self.gateway_rule_pref,
            "Added gateway table rule"
        );

        Ok(())
    }

    /// Remove the rule band in reverse install order, skipping rules that are
    /// already absent.
    async fn remove_rules(&self) -> Result<(), RoutingError> {
        let rules = self.ops.rule_list().await?;
        let by_pref: HashMap<u32, RuleEntry> =
            rules.into_iter().map(|r| (r.priority, r)).collect();

        if let Some(rule) = by_pref.get(&self.gateway_rule_pref) {
            self.ops
                .rule_del(rule)
                .await
                .map_err(|e| rule_err("delete", rule.priority, e))?;
            debug!(preference = self.gateway_rule_pref, "Removed gateway table rule");
        } else {
            debug!(
                preference = self.gateway_rule_pref,
                "Gateway table rule not found, skipping removal"
            );
        }

        for i in 0..self.exclude_nets.len() as u32 {
            let pref = self.first_exclude_pref + i;
            if let Some(rule) = by_pref.get(&pref) {
                self.ops
                    .rule_del(rule)
                    .await
                    .map_err(|e| rule_err("delete", pref, e))?;
                debug!(preference = pref, "Removed exclude rule");
            } else {
                debug!(preference = pref, "Exclude rule not found, skipping removal");
            }
        }

        if let Some(rule) = by_pref.get(&self.fallthrough_rule_pref) {
            self.ops
                .rule_del(rule)
                .await
                .map_err(|e| rule_err("delete", rule.priority, e))?;
            debug!(
                preference = self.fallthrough_rule_pref,
                "Removed fallthrough table rule"
            );
        } else {
            debug!(
                preference = self.fallthrough_rule_pref,
                "Fallthrough table rule not found, skipping removal"
            );
        }

        Ok(())
    }

    /// Delete every route in the gateway table; the first failure is fatal.
    async fn purge_routes(&self) -> Result<(), RoutingError> {
        let routes = self.ops.route_list(self.gateway_table).await?;
        for route in routes {
            self.ops
                .route_del(&route)
                .await
                .map_err(|e| route_err("delete", route.destination, e))?;
            debug!(destination = %route.destination, "Removed gateway table route");
        }
        Ok(())
    }
}

fn rule_err(action: &'static str, pref: u32, source: RoutingError) -> RoutingError {
    RoutingError::Rule {
        action,
        pref,
        source: Box::new(source),
    }
}

fn route_err(action: &'static str, destination: Ipv4Net, source: RoutingError) -> RoutingError {
    RoutingError::Route {
        action,
        destination,
        source: Box::new(source),
    }
}
