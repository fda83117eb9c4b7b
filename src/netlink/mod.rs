//! Kernel routing adapter.
//!
//! A narrow capability surface over the host's policy-routing facility: list,
//! replace and delete routes by table; list, add and delete rules. The rest of
//! the crate only sees [`RouteOps`] so tests can substitute an in-memory fake.

use std::net::{IpAddr, Ipv4Addr};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use ipnet::Ipv4Net;
use netlink_packet_route::route::{
    RouteAddress, RouteAttribute, RouteHeader, RouteMessage, RouteNextHop, RouteProtocol,
};
use netlink_packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use netlink_packet_route::AddressFamily;
use rtnetlink::{Handle, IpVersion, RouteMessageBuilder};

use crate::error::RoutingError;

/// A route as this crate models it: a destination prefix in a table with a
/// set of gateway next-hops (ECMP when more than one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Net,
    pub table: u32,
    pub nexthops: Vec<Ipv4Addr>,
}

/// A policy rule: evaluated in ascending priority; either performs a table
/// lookup or jumps forward to another priority, optionally constrained to a
/// destination prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub priority: u32,
    pub destination: Option<Ipv4Net>,
    pub table: Option<u32>,
    pub goto_priority: Option<u32>,
}

/// Capability interface over the kernel's IPv4 route/rule facility.
///
/// A 1:1 mapping of the operations the route plane needs, so the production
/// netlink implementation and the test fake stay interchangeable.
#[async_trait]
pub trait RouteOps: Send + Sync + std::fmt::Debug {
    async fn route_list(&self, table: u32) -> Result<Vec<RouteEntry>, RoutingError>;
    async fn route_replace(&self, route: &RouteEntry) -> Result<(), RoutingError>;
    async fn route_del(&self, route: &RouteEntry) -> Result<(), RoutingError>;

    async fn rule_list(&self) -> Result<Vec<RuleEntry>, RoutingError>;
    async fn rule_add(&self, rule: &RuleEntry) -> Result<(), RoutingError>;
    async fn rule_del(&self, rule: &RuleEntry) -> Result<(), RoutingError>;
}

/// Production adapter backed by an rtnetlink connection.
#[derive(Debug, Clone)]
pub struct NetlinkOps {
    handle: Handle,
}

impl NetlinkOps {
    /// Open a netlink connection and spawn its IO task onto the runtime.
    pub fn new() -> std::io::Result<Self> {
        let (conn, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(conn);
        Ok(Self { handle })
    }

    /// Wrap an existing rtnetlink handle.
    pub fn from_handle(handle: Handle) -> Self {
        Self { handle }
    }

    fn route_message(route: &RouteEntry) -> RouteMessage {
        let mut msg = RouteMessageBuilder::<Ipv4Addr>::new()
            .table_id(route.table)
            .destination_prefix(route.destination.addr(), route.destination.prefix_len())
            .build();

        if !route.nexthops.is_empty() {
            let nexthops = route
                .nexthops
                .iter()
                .map(|gw| {
                    let mut hop = RouteNextHop::default();
                    hop.attributes
                        .push(RouteAttribute::Gateway(RouteAddress::Inet(*gw)));
                    hop
                })
                .collect();
            msg.attributes.push(RouteAttribute::MultiPath(nexthops));
        }

        msg
    }

    fn rule_message(rule: &RuleEntry) -> RuleMessage {
        let mut msg = RuleMessage::default();
        msg.header.family = AddressFamily::Inet;
        msg.header.action = RuleAction::Unspec;
        msg.attributes.push(RuleAttribute::Priority(rule.priority));

        if let Some(table) = rule.table {
            msg.header.action = RuleAction::ToTable;
            msg.header.table = u8::try_from(table).unwrap_or(RouteHeader::RT_TABLE_UNSPEC);
            msg.attributes.push(RuleAttribute::Table(table));
        }

        if let Some(goto) = rule.goto_priority {
            msg.header.action = RuleAction::Goto;
            msg.attributes.push(RuleAttribute::Goto(goto));
        }

        if let Some(dst) = rule.destination {
            msg.header.dst_len = dst.prefix_len();
            msg.attributes
                .push(RuleAttribute::Destination(IpAddr::V4(dst.addr())));
        }

        msg
    }
}

#[async_trait]
impl RouteOps for NetlinkOps {
    async fn route_list(&self, table: u32) -> Result<Vec<RouteEntry>, RoutingError> {
        let filter = RouteMessageBuilder::<Ipv4Addr>::new().build();
        let mut stream = self.handle.route().get(filter).execute();

        let mut routes = Vec::new();
        while let Some(msg) = stream.try_next().await? {
            if route_table_id(&msg) != table {
                continue;
            }
            if let Some(entry) = parse_route(&msg) {
                routes.push(entry);
            }
        }
        Ok(routes)
    }

    async fn route_replace(&self, route: &RouteEntry) -> Result<(), RoutingError> {
        let msg = Self::route_message(route);
        self.handle.route().add(msg).replace().execute().await?;
        Ok(())
    }

    async fn route_del(&self, route: &RouteEntry) -> Result<(), RoutingError> {
        let mut msg = Self::route_message(route);
        // Unspec protocol so deletion matches regardless of who installed it.
        msg.header.protocol = RouteProtocol::Unspec;
        self.handle.route().del(msg).execute().await?;
        Ok(())
    }

    async fn rule_list(&self) -> Result<Vec<RuleEntry>, RoutingError> {
        let mut stream = self.handle.rule().get(IpVersion::V4).execute();

        let mut rules = Vec::new();
        while let Some(msg) = stream.try_next().await? {
            rules.push(parse_rule(&msg));
        }
        Ok(rules)
    }

    async fn rule_add(&self, rule: &RuleEntry) -> Result<(), RoutingError> {
        let mut req = self.handle.rule().add();
        *req.message_mut() = Self::rule_message(rule);
        req.execute().await?;
        Ok(())
    }

    async fn rule_del(&self, rule: &RuleEntry) -> Result<(), RoutingError> {
        let msg = Self::rule_message(rule);
        self.handle.rule().del(msg).execute().await?;
        Ok(())
    }
}

fn route_table_id(msg: &RouteMessage) -> u32 {
    msg.attributes
        .iter()
        .find_map(|attr| {
            if let RouteAttribute::Table(table) = attr {
                Some(*table)
            } else {
                None
            }
        })
        .unwrap_or_else(|| u32::from(msg.header.table))
}

fn parse_route(msg: &RouteMessage) -> Option<RouteEntry> {
    let destination_addr = msg
        .attributes
        .iter()
        .find_map(|attr| {
            if let RouteAttribute::Destination(RouteAddress::Inet(v4)) = attr {
                Some(*v4)
            } else {
                None
            }
        })
        .unwrap_or(Ipv4Addr::UNSPECIFIED);
    let destination =
        Ipv4Net::new(destination_addr, msg.header.destination_prefix_length).ok()?;

    let mut nexthops = Vec::new();
    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Gateway(RouteAddress::Inet(v4)) => nexthops.push(*v4),
            RouteAttribute::MultiPath(hops) => {
                for hop in hops {
                    for hop_attr in &hop.attributes {
                        if let RouteAttribute::Gateway(RouteAddress::Inet(v4)) = hop_attr {
                            nexthops.push(*v4);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    Some(RouteEntry {
        destination,
        table: route_table_id(msg),
        nexthops,
    })
}

fn parse_rule(msg: &RuleMessage) -> RuleEntry {
    let priority = msg
        .attributes
        .iter()
        .find_map(|attr| {
            if let RuleAttribute::Priority(p) = attr {
                Some(*p)
            } else {
                None
            }
        })
        .unwrap_or(0);

    let table = msg
        .attributes
        .iter()
        .find_map(|attr| {
            if let RuleAttribute::Table(t) = attr {
                Some(*t)
            } else {
                None
            }
        })
        .or_else(|| {
            let t = u32::from(msg.header.table);
            (t != 0).then_some(t)
        })
        .filter(|_| msg.header.action == RuleAction::ToTable);

    let goto_priority = msg.attributes.iter().find_map(|attr| {
        if let RuleAttribute::Goto(g) = attr {
            Some(*g)
        } else {
            None
        }
    });

    let destination = msg
        .attributes
        .iter()
        .find_map(|attr| {
            if let RuleAttribute::Destination(IpAddr::V4(v4)) = attr {
                Some(*v4)
            } else {
                None
            }
        })
        .and_then(|addr| Ipv4Net::new(addr, msg.header.dst_len).ok());

    RuleEntry {
        priority,
        destination,
        table,
        goto_priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_message_carries_multipath_nexthops() {
        let entry = RouteEntry {
            destination: "0.0.0.0/0".parse().unwrap(),
            table: 100,
            nexthops: vec!["192.168.1.1".parse().unwrap(), "192.168.1.3".parse().unwrap()],
        };
        let msg = NetlinkOps::route_message(&entry);

        let parsed = parse_route(&msg).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn rule_message_round_trips_goto_rules() {
        let entry = RuleEntry {
            priority: 1000,
            destination: Some("10.0.0.0/8".parse().unwrap()),
            table: None,
            goto_priority: Some(1002),
        };
        let msg = NetlinkOps::rule_message(&entry);
        assert_eq!(msg.header.action, RuleAction::Goto);
        assert_eq!(parse_rule(&msg), entry);
    }

    #[test]
    fn rule_message_round_trips_lookup_rules() {
        let entry = RuleEntry {
            priority: 1001,
            destination: None,
            table: Some(100),
            goto_priority: None,
        };
        let msg = NetlinkOps::rule_message(&entry);
        assert_eq!(msg.header.action, RuleAction::ToTable);
        assert_eq!(parse_rule(&msg), entry);
    }
}
