//! Shared test fixtures: an in-memory kernel routing fake and HTTP helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use gatewatch::error::RoutingError;
use gatewatch::netlink::{RouteEntry, RouteOps, RuleEntry};

/// Snapshot of the fake kernel's routing state.
#[derive(Debug, Default, Clone)]
pub struct KernelState {
    pub routes: Vec<RouteEntry>,
    pub rules: Vec<RuleEntry>,
}

/// In-memory routing adapter with the kernel's observable semantics:
/// replace is an upsert keyed on (destination, table), rules are add/delete
/// only, deletes of absent entries fail.
#[derive(Debug, Default)]
pub struct FakeRouteOps {
    state: Mutex<KernelState>,
    /// Rule priority at which `rule_add` starts failing, if set.
    pub fail_rule_add_at: Option<u32>,
    /// Make every `route_replace` fail, if set.
    pub fail_route_replace: bool,
}

impl FakeRouteOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<RuleEntry>) -> Self {
        Self {
            state: Mutex::new(KernelState {
                routes: Vec::new(),
                rules,
            }),
            ..Self::default()
        }
    }

    /// Fake that refuses to add a rule at the given preference.
    pub fn failing_rule_add_at(pref: u32) -> Self {
        Self {
            fail_rule_add_at: Some(pref),
            ..Self::default()
        }
    }

    /// Fake whose `route_replace` always fails.
    pub fn failing_route_replace() -> Self {
        Self {
            fail_route_replace: true,
            ..Self::default()
        }
    }

    pub fn state(&self) -> KernelState {
        self.state.lock().unwrap().clone()
    }

    pub fn rules_sorted(&self) -> Vec<RuleEntry> {
        let mut rules = self.state().rules;
        rules.sort_by_key(|r| r.priority);
        rules
    }
}

#[async_trait]
impl RouteOps for FakeRouteOps {
    async fn route_list(&self, table: u32) -> Result<Vec<RouteEntry>, RoutingError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .routes
            .iter()
            .filter(|r| r.table == table)
            .cloned()
            .collect())
    }

    async fn route_replace(&self, route: &RouteEntry) -> Result<(), RoutingError> {
        if self.fail_route_replace {
            return Err(RoutingError::Adapter("route replace refused".into()));
        }
        let mut state = self.state.lock().unwrap();
        state
            .routes
            .retain(|r| !(r.destination == route.destination && r.table == route.table));
        state.routes.push(route.clone());
        Ok(())
    }

    async fn route_del(&self, route: &RouteEntry) -> Result<(), RoutingError> {
        let mut state = self.state.lock().unwrap();
        let before = state.routes.len();
        state
            .routes
            .retain(|r| !(r.destination == route.destination && r.table == route.table));
        if state.routes.len() == before {
            return Err(RoutingError::Adapter(format!(
                "no route to {} in table {}",
                route.destination, route.table
            )));
        }
        Ok(())
    }

    async fn rule_list(&self) -> Result<Vec<RuleEntry>, RoutingError> {
        Ok(self.state.lock().unwrap().rules.clone())
    }

    async fn rule_add(&self, rule: &RuleEntry) -> Result<(), RoutingError> {
        if let Some(failing_pref) = self.fail_rule_add_at {
            if rule.priority == failing_pref {
                return Err(RoutingError::Adapter("rule add refused".into()));
            }
        }
        self.state.lock().unwrap().rules.push(rule.clone());
        Ok(())
    }

    async fn rule_del(&self, rule: &RuleEntry) -> Result<(), RoutingError> {
        let mut state = self.state.lock().unwrap();
        let before = state.rules.len();
        state.rules.retain(|r| r.priority != rule.priority);
        if state.rules.len() == before {
            return Err(RoutingError::Adapter(format!(
                "no rule at preference {}",
                rule.priority
            )));
        }
        Ok(())
    }
}

/// Serve an axum router on an ephemeral local port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
