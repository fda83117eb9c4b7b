//! IPv4 address and prefix utilities.
//!
//! Covers the small amount of address arithmetic the agent needs: ordered
//! comparison and increment for walking the configured gateway range, prefix
//! set reduction for the exclude list, and an interface address lookup used to
//! gate DDNS updates.

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use futures_util::TryStreamExt;
use ipnet::Ipv4Net;
use netlink_packet_route::address::AddressAttribute;
use netlink_packet_route::AddressFamily;

use crate::error::{IpError, Result, RoutingError};

/// Compare two IPv4 addresses by their canonical 4-byte form.
pub fn compare_ips(a: Ipv4Addr, b: Ipv4Addr) -> Ordering {
    a.octets().cmp(&b.octets())
}

/// Increment the given IPv4 address by 1, in place.
///
/// Fails on `255.255.255.255`, which has no successor.
pub fn increment_ip(ip: &mut Ipv4Addr) -> std::result::Result<(), IpError> {
    let value = u32::from(*ip);
    if value == u32::MAX {
        return Err(IpError::Overflow);
    }
    *ip = Ipv4Addr::from(value + 1);
    Ok(())
}

/// Reduce a set of IPv4 prefixes to the smallest equivalent set.
///
/// Removes duplicates, removes prefixes contained by another prefix in the
/// set, and repeatedly merges sibling halves of a common parent prefix until
/// a fixed point is reached. The reduced set covers exactly the same
/// addresses as the input.
pub fn reduce_networks(networks: Vec<Ipv4Net>) -> Vec<Ipv4Net> {
    let mut result: Vec<Ipv4Net> = networks.into_iter().map(|n| n.trunc()).collect();
    if result.len() <= 1 {
        return result;
    }

    sort_networks(&mut result);
    result.dedup();
    result = remove_contained_networks(&result);

    // Merging two siblings produces a parent that may itself be mergeable,
    // so scan until a pass makes no progress.
    loop {
        let merged = merge_sibling_networks(&result);
        if merged.len() == result.len() {
            break;
        }
        result = merged;
        sort_networks(&mut result);
    }

    result
}

/// Sort by address first, then by prefix length with longer prefixes first.
fn sort_networks(networks: &mut [Ipv4Net]) {
    networks.sort_by(|a, b| {
        a.addr()
            .cmp(&b.addr())
            .then_with(|| b.prefix_len().cmp(&a.prefix_len()))
    });
}

/// Drop every prefix that is strictly contained by another prefix in the set.
fn remove_contained_networks(networks: &[Ipv4Net]) -> Vec<Ipv4Net> {
    networks
        .iter()
        .filter(|net| {
            !networks
                .iter()
                .any(|other| other != *net && other.contains(*net))
        })
        .copied()
        .collect()
}

/// One pass of merging sibling halves into their parent prefix.
fn merge_sibling_networks(networks: &[Ipv4Net]) -> Vec<Ipv4Net> {
    let mut result = Vec::with_capacity(networks.len());
    let mut used = vec![false; networks.len()];

    for i in 0..networks.len() {
        if used[i] {
            continue;
        }
        used[i] = true;

        let mut merged = None;
        for j in (i + 1)..networks.len() {
            if used[j] {
                continue;
            }
            if let Some(parent) = try_merge(networks[i], networks[j]) {
                used[j] = true;
                merged = Some(parent);
                break;
            }
        }

        result.push(merged.unwrap_or(networks[i]));
    }

    result
}

/// Merge two prefixes into their parent if they are the two halves of it.
fn try_merge(a: Ipv4Net, b: Ipv4Net) -> Option<Ipv4Net> {
    let len = a.prefix_len();
    if len != b.prefix_len() || len == 0 {
        return None;
    }

    let parent_a = Ipv4Net::new(a.addr(), len - 1).ok()?.trunc();
    let parent_b = Ipv4Net::new(b.addr(), len - 1).ok()?.trunc();
    if parent_a != parent_b {
        return None;
    }

    // Siblings differ in exactly the last bit of their own prefix.
    let sibling_bit = |net: Ipv4Net| (u32::from(net.addr()) >> (32 - len)) & 1;
    if sibling_bit(a) == sibling_bit(b) {
        return None;
    }

    Some(parent_a)
}

/// Check whether any network interface on this host has `target` assigned.
///
/// Dumps the kernel's IPv4 interface addresses over netlink and returns true
/// on the first match.
pub async fn has_interface_with_ip(target: Ipv4Addr) -> Result<bool> {
    let (conn, handle, _) = rtnetlink::new_connection()?;
    tokio::spawn(conn);

    let mut addresses = handle.address().get().execute();
    while let Some(msg) = addresses
        .try_next()
        .await
        .map_err(RoutingError::Netlink)?
    {
        if msg.header.family != AddressFamily::Inet {
            continue;
        }

        // IFA_ADDRESS is the peer address on point-to-point links; the
        // interface's own address is IFA_LOCAL when both are present.
        let mut local = None;
        let mut address = None;
        for attr in &msg.attributes {
            match attr {
                AddressAttribute::Local(std::net::IpAddr::V4(v4)) => local = Some(*v4),
                AddressAttribute::Address(std::net::IpAddr::V4(v4)) => address = Some(*v4),
                _ => {}
            }
        }

        if local.or(address) == Some(target) {
            return Ok(true);
        }
    }

    Ok(false)
}
