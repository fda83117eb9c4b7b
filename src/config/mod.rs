//! Configuration for the gateway route manager.

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnet::Ipv4Net;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::iputil::compare_ips;

/// Reserved IPv4 ranges, excluded from gateway routing by default.
/// See <https://en.wikipedia.org/wiki/Reserved_IP_addresses#IPv4>.
const RESERVED_CIDRS: [&str; 14] = [
    "0.0.0.0/8",       // "This" network
    "10.0.0.0/8",      // Private network
    "100.64.0.0/10",   // Carrier-grade NAT
    "127.0.0.0/8",     // Loopback
    "169.254.0.0/16",  // Link-local
    "172.16.0.0/12",   // Private network
    "192.0.0.0/24",    // IETF protocol assignments
    "192.0.2.0/24",    // TEST-NET-1
    "192.88.99.0/24",  // 6to4 relay anycast
    "192.168.0.0/16",  // Private network
    "198.18.0.0/15",   // Network benchmark tests
    "198.51.100.0/24", // TEST-NET-2
    "203.0.113.0/24",  // TEST-NET-3
    "224.0.0.0/3",     // Multicast, reserved, broadcast
];

/// Supported DDNS providers.
pub const DDNS_PROVIDERS: [&str; 2] = ["dynudns", "changeip"];

/// Providers that authenticate with an API key (password only, no username).
const API_KEY_PROVIDERS: [&str; 1] = ["dynudns"];

/// Configuration for the public IP service queried through each gateway.
#[derive(Debug, Clone)]
pub struct PublicIpServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub scheme: String,
    pub path: String,
    pub username: String,
    pub password: String,
}

/// DDNS configuration.
#[derive(Debug, Clone)]
pub struct DdnsConfig {
    pub provider: String,
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub require_ip_address: Option<Ipv4Addr>,
    pub timeout: Duration,
    pub record_ttl: Duration,
}

/// Validated runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub start_ip: Ipv4Addr,
    pub end_ip: Ipv4Addr,
    pub timeout: Duration,
    pub check_period: Duration,
    pub port: u16,
    pub url_path: String,
    pub scheme: String,
    pub log_level: String,
    pub metrics_port: u16,
    pub routes: Vec<Ipv4Net>,
    pub exclude_cidrs: Vec<Ipv4Net>,
    pub first_routing_table_id: u32,
    pub first_rule_preference: u32,
    pub ddns: DdnsConfig,
    pub public_ip_service: PublicIpServiceConfig,
}

impl Config {
    /// Build and validate a configuration from parsed CLI arguments.
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let start_ip = parse_ipv4(&cli.start_ip, "start-ip")?;
        let end_ip = parse_ipv4(&cli.end_ip, "end-ip")?;

        let mut routes = Vec::with_capacity(cli.routes.len());
        for route in &cli.routes {
            let spec = if route == "default" { "0.0.0.0/0" } else { route };
            let net: Ipv4Net = spec
                .parse()
                .map_err(|e| Error::Config(format!("invalid route {route:?}: {e}")))?;
            routes.push(net.trunc());
        }
        if routes.is_empty() {
            routes.push("0.0.0.0/0".parse().expect("default route"));
        }

        let mut exclude_cidrs = Vec::new();
        for cidr in &cli.exclude_cidrs {
            let net: Ipv4Net = cidr
                .parse()
                .map_err(|e| Error::Config(format!("invalid CIDR {cidr:?}: {e}")))?;
            exclude_cidrs.push(net.trunc());
        }
        if cli.exclude_reserved_cidrs {
            for cidr in RESERVED_CIDRS {
                exclude_cidrs.push(cidr.parse().expect("reserved CIDR table"));
            }
        }

        let require_ip_address = if cli.ddns_require_ip_address.is_empty() {
            None
        } else {
            Some(parse_ipv4(
                &cli.ddns_require_ip_address,
                "ddns-require-ip-address",
            )?)
        };

        let config = Self {
            start_ip,
            end_ip,
            timeout: cli.timeout,
            check_period: cli.check_period,
            port: cli.port,
            url_path: cli.path,
            scheme: cli.scheme,
            log_level: cli.log_level,
            metrics_port: cli.metrics_port,
            routes,
            exclude_cidrs,
            first_routing_table_id: cli.first_routing_table_id,
            first_rule_preference: cli.first_rule_preference,
            ddns: DdnsConfig {
                provider: cli.ddns_provider.to_lowercase(),
                username: cli.ddns_username,
                password: cli.ddns_password,
                hostname: cli.ddns_hostname,
                require_ip_address,
                timeout: cli.ddns_timeout,
                record_ttl: cli.ddns_record_ttl,
            },
            public_ip_service: PublicIpServiceConfig {
                hostname: cli.public_ip_service_hostname,
                port: cli.public_ip_service_port,
                scheme: cli.public_ip_service_scheme,
                path: cli.public_ip_service_path,
                username: cli.public_ip_service_username,
                password: cli.public_ip_service_password,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration; every violation here is fatal.
    pub fn validate(&self) -> Result<()> {
        if compare_ips(self.start_ip, self.end_ip) == std::cmp::Ordering::Greater {
            return Err(Error::InvalidConfig(format!(
                "start-ip ({}) must be less than or equal to end-ip ({})",
                self.start_ip, self.end_ip
            )));
        }

        if self.check_period < self.timeout {
            return Err(Error::InvalidConfig(format!(
                "check-period ({}) must be at least as long as timeout ({})",
                humantime::format_duration(self.check_period),
                humantime::format_duration(self.timeout),
            )));
        }

        if self.scheme != "http" && self.scheme != "https" {
            return Err(Error::InvalidConfig(
                "scheme must be 'http' or 'https'".into(),
            ));
        }

        if self.metrics_port == 0 {
            return Err(Error::InvalidConfig(
                "metrics port must be between 1 and 65535".into(),
            ));
        }

        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(Error::InvalidConfig(format!(
                "log level must be one of: {}",
                valid_levels.join(", ")
            )));
        }

        if self.is_ddns_enabled() {
            if !DDNS_PROVIDERS.contains(&self.ddns.provider.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "ddns-provider must be one of: {}",
                    DDNS_PROVIDERS.join(", ")
                )));
            }

            // API-key providers authenticate with the password alone.
            if !API_KEY_PROVIDERS.contains(&self.ddns.provider.as_str())
                && self.ddns.username.is_empty()
            {
                return Err(Error::InvalidConfig("ddns-username is required".into()));
            }

            if self.ddns.password.is_empty() {
                return Err(Error::InvalidConfig(
                    "ddns-password is required when ddns-provider is specified \
                     (can be provided via DDNS_PASSWORD)"
                        .into(),
                ));
            }

            if self.ddns.hostname.is_empty() {
                return Err(Error::InvalidConfig(
                    "ddns-hostname is required when ddns-provider is specified".into(),
                ));
            }

            if self.ddns.timeout.is_zero() {
                return Err(Error::InvalidConfig(
                    "ddns-timeout must be greater than zero".into(),
                ));
            }

            if self.ddns.record_ttl.is_zero() {
                return Err(Error::InvalidConfig(
                    "ddns-record-ttl must be greater than zero".into(),
                ));
            }
        }

        if self.public_ip_service.port == 0 {
            return Err(Error::InvalidConfig(
                "public-ip-service-port must be between 1 and 65535".into(),
            ));
        }

        if self.public_ip_service.scheme != "http" && self.public_ip_service.scheme != "https" {
            return Err(Error::InvalidConfig(
                "public-ip-service-scheme must be 'http' or 'https'".into(),
            ));
        }

        if self.public_ip_service.username.is_empty() != self.public_ip_service.password.is_empty()
        {
            return Err(Error::InvalidConfig(
                "public-ip-service-username and public-ip-service-password must be \
                 specified together or not at all"
                    .into(),
            ));
        }

        Ok(())
    }

    /// True when a DDNS provider is configured.
    pub fn is_ddns_enabled(&self) -> bool {
        !self.ddns.provider.is_empty()
    }
}

fn parse_ipv4(value: &str, flag: &str) -> Result<Ipv4Addr> {
    value
        .parse::<Ipv4Addr>()
        .map_err(|_| Error::Config(format!("invalid {flag}: {value}")))
}

/// Initialize logging with the configured level.
///
/// `RUST_LOG` wins over the flag when set, so operators can scope levels per
/// module without restarting with different arguments.
pub fn init_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| Error::Config(format!("failed to init logging: {e}")))?;

    Ok(())
}
