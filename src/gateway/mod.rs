//! Gateway records and the per-gateway HTTP interactions.

mod prober;
mod public_ip;

pub use prober::Prober;
pub use public_ip::PublicIpClient;

use std::net::Ipv4Addr;

use crate::iputil::{compare_ips, increment_ip};

/// A single candidate gateway with its observed health state.
#[derive(Debug, Clone)]
pub struct Gateway {
    /// Identity within the configured range.
    pub ip: Ipv4Addr,
    /// Fully-qualified health check URL.
    pub url: String,
    /// Result of the most recent health check.
    pub is_active: bool,
    /// Failed checks since the last success.
    pub consecutive_failures: u64,
    /// Public IP last observed through this gateway.
    pub public_ip: Option<Ipv4Addr>,
}

impl Gateway {
    fn new(ip: Ipv4Addr, url: String) -> Self {
        Self {
            ip,
            url,
            is_active: false,
            consecutive_failures: 0,
            public_ip: None,
        }
    }
}

/// Build one gateway per address in `[start, end]` inclusive.
///
/// Walks the range in order and stops early if the address space ends.
pub fn generate_gateways(
    start: Ipv4Addr,
    end: Ipv4Addr,
    port: u16,
    path: &str,
    scheme: &str,
) -> Vec<Gateway> {
    let mut gateways = Vec::new();
    let mut current = start;

    loop {
        let url = format!("{scheme}://{current}:{port}{path}");
        gateways.push(Gateway::new(current, url));

        if current == end {
            break;
        }
        if increment_ip(&mut current).is_err() {
            break;
        }
        if compare_ips(current, end) == std::cmp::Ordering::Greater {
            break;
        }
    }

    gateways
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_the_inclusive_range_with_urls() {
        let gateways = generate_gateways(
            "192.168.1.1".parse().unwrap(),
            "192.168.1.3".parse().unwrap(),
            80,
            "/",
            "http",
        );

        let ips: Vec<String> = gateways.iter().map(|g| g.ip.to_string()).collect();
        assert_eq!(ips, ["192.168.1.1", "192.168.1.2", "192.168.1.3"]);

        let urls: Vec<&str> = gateways.iter().map(|g| g.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "http://192.168.1.1:80/",
                "http://192.168.1.2:80/",
                "http://192.168.1.3:80/",
            ]
        );

        assert!(gateways.iter().all(|g| !g.is_active));
        assert!(gateways.iter().all(|g| g.consecutive_failures == 0));
    }

    #[test]
    fn single_address_range_yields_one_gateway() {
        let gateways = generate_gateways(
            "10.0.0.1".parse().unwrap(),
            "10.0.0.1".parse().unwrap(),
            9999,
            "/healthz",
            "https",
        );
        assert_eq!(gateways.len(), 1);
        assert_eq!(gateways[0].url, "https://10.0.0.1:9999/healthz");
    }

    #[test]
    fn range_ending_at_broadcast_stops_cleanly() {
        let gateways = generate_gateways(
            "255.255.255.254".parse().unwrap(),
            "255.255.255.255".parse().unwrap(),
            80,
            "/",
            "http",
        );
        assert_eq!(gateways.len(), 2);
    }
}
