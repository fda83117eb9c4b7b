//! Error types for Gatewatch.

use std::io;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Result type alias for Gatewatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Gatewatch.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IPv4 arithmetic errors
    #[error("IP error: {0}")]
    Ip(#[from] IpError),

    // Routing plane errors
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    // Public IP fetch errors
    #[error("public IP fetch error: {0}")]
    PublicIp(#[from] PublicIpError),

    // DDNS errors
    #[error("DDNS error: {0}")]
    Ddns(#[from] DdnsError),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// IPv4 address arithmetic errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IpError {
    #[error("IP address overflow: maximum IPv4 address reached")]
    Overflow,
}

/// Kernel routing plane errors.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("invalid first table id: {id} (must be between 1 and {max})")]
    InvalidTableId { id: u32, max: u32 },

    #[error("invalid first rule preference: {pref} (must be between 1 and {max})")]
    InvalidRulePreference { pref: u32, max: u32 },

    #[error("netlink operation failed: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("routing adapter error: {0}")]
    Adapter(String),

    #[error("failed to {action} rule at preference {pref}: {source}")]
    Rule {
        action: &'static str,
        pref: u32,
        #[source]
        source: Box<RoutingError>,
    },

    #[error("failed to {action} route to {destination}: {source}")]
    Route {
        action: &'static str,
        destination: ipnet::Ipv4Net,
        #[source]
        source: Box<RoutingError>,
    },

    #[error("route plane teardown failed: {0}")]
    Teardown(String),
}

/// Public IP service errors. Always per-gateway, never fatal.
#[derive(Error, Debug)]
pub enum PublicIpError {
    #[error("gateway {0} is not active")]
    NotActive(Ipv4Addr),

    #[error("request to public IP service failed: {0}")]
    Request(String),

    #[error("public IP service returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("valid JSON response but no recognized IP address field: {0}")]
    NoIpField(String),

    #[error("received invalid public IP {0:?}")]
    InvalidIp(String),

    #[error("received non-IPv4 public IP {0:?}")]
    NotIpv4(String),
}

/// DDNS provider and updater errors.
#[derive(Error, Debug)]
pub enum DdnsError {
    #[error("unsupported DDNS provider: {0}")]
    UnsupportedProvider(String),

    #[error("{provider} provider error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
    },

    #[error("failed to check for required IP address {ip}: {reason}")]
    RequiredIpCheck { ip: Ipv4Addr, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_error_messages_carry_context() {
        let err = RoutingError::Rule {
            action: "add",
            pref: 1000,
            source: Box::new(RoutingError::Adapter("permission denied".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("add"));
        assert!(msg.contains("1000"));
    }

    #[test]
    fn public_ip_errors_are_descriptive() {
        let err = PublicIpError::UpstreamStatus {
            status: 503,
            body: "busy".into(),
        };
        assert!(err.to_string().contains("503"));
    }
}
