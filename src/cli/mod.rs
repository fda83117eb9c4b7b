//! Command line interface.

use std::time::Duration;

use clap::Parser;

/// Gatewatch - ECMP gateway health monitor and route manager
#[derive(Parser, Debug)]
#[command(
    name = "gatewatch",
    author,
    version,
    about = "Health-checks a range of IPv4 gateways and load-balances traffic across \
             the healthy ones with ECMP routes",
    long_about = r"
Gatewatch continuously probes every address in [start-ip, end-ip] over HTTP
and installs a kernel routing configuration that spreads the managed
destinations across the currently-healthy gateways using equal-cost
multi-path routes. Optionally it publishes the gateways' public IPv4
addresses to a dynamic DNS provider.

Excluded destinations (reserved ranges by default) keep routing through the
system tables, so health checks, the metrics endpoint and the DDNS provider
API stay reachable even while the default route points at the gateways.
"
)]
pub struct Cli {
    /// Starting IP address for the gateway range
    #[arg(long, value_name = "IP")]
    pub start_ip: String,

    /// Ending IP address for the gateway range
    #[arg(long, value_name = "IP")]
    pub end_ip: String,

    /// Timeout for health checks
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub timeout: Duration,

    /// How often to check gateways
    #[arg(long, value_parser = humantime::parse_duration, default_value = "3s")]
    pub check_period: Duration,

    /// Port to target for health checks
    #[arg(long, default_value_t = 9999)]
    pub port: u16,

    /// URL path for health checks
    #[arg(long, default_value = "/")]
    pub path: String,

    /// Scheme to use for health checks (http or https)
    #[arg(long, default_value = "http")]
    pub scheme: String,

    /// Log level (debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Port for the Prometheus metrics endpoint
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// First routing table ID to use for gateway route logic
    #[arg(long, default_value_t = 180)]
    pub first_routing_table_id: u32,

    /// First rule preference to use for gateway route logic
    #[arg(long, default_value_t = 10888)]
    pub first_rule_preference: u32,

    /// Destination to manage in CIDR notation, or "default" (repeatable)
    #[arg(long = "route", value_name = "CIDR")]
    pub routes: Vec<String>,

    /// CIDR to exclude from gateway routing (repeatable)
    #[arg(long = "exclude-cidr", value_name = "CIDR")]
    pub exclude_cidrs: Vec<String>,

    /// Exclude reserved IPv4 destinations (private networks, loopback,
    /// multicast, etc.) from gateway routing
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub exclude_reserved_cidrs: bool,

    /// DDNS provider (dynudns, changeip)
    #[arg(long, default_value = "")]
    pub ddns_provider: String,

    /// DDNS username (required for providers that do not use API keys)
    #[arg(long, default_value = "")]
    pub ddns_username: String,

    /// DDNS password or API key
    #[arg(long, env = "DDNS_PASSWORD", hide_env_values = true, default_value = "")]
    pub ddns_password: String,

    /// DDNS hostname to update
    #[arg(long, default_value = "")]
    pub ddns_hostname: String,

    /// IPv4 address that must be assigned to an interface for DDNS updates
    /// to be performed
    #[arg(long, default_value = "")]
    pub ddns_require_ip_address: String,

    /// Timeout for DDNS updates
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub ddns_timeout: Duration,

    /// TTL for managed DDNS records
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub ddns_record_ttl: Duration,

    /// Hostname for the public IP service (if unset, queries each gateway)
    #[arg(long, default_value = "")]
    pub public_ip_service_hostname: String,

    /// Port for the gateway's public IP service
    #[arg(long, default_value_t = 443)]
    pub public_ip_service_port: u16,

    /// Scheme for the public IP service (http or https)
    #[arg(long, default_value = "https")]
    pub public_ip_service_scheme: String,

    /// URL path for the public IP service
    #[arg(long, default_value = "/")]
    pub public_ip_service_path: String,

    /// Username for public IP service HTTP basic auth
    #[arg(long, default_value = "")]
    pub public_ip_service_username: String,

    /// Password for public IP service HTTP basic auth
    #[arg(
        long,
        env = "PUBLIC_IP_SERVICE_PASSWORD",
        hide_env_values = true,
        default_value = ""
    )]
    pub public_ip_service_password: String,
}
