//! Host discovery - find live, named hosts in a network range
//!
//! A host counts as up when any probe port accepts a TCP connection or
//! actively refuses it. Live hosts are then reverse-resolved; by default
//! only those with a DNS name are offered to the operator.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use vulnwatch_common::config::DiscoveryConfig;
use vulnwatch_core::{Error, Result};

/// One host offered for selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredHost {
    /// Reverse DNS name, if any
    pub hostname: Option<String>,
    /// Address the host answered on
    pub address: IpAddr,
}

impl DiscoveredHost {
    pub fn new(address: IpAddr, hostname: Option<String>) -> Self {
        Self { hostname, address }
    }

    /// Label shown in host pickers: `name (address)` or just the address
    pub fn label(&self) -> String {
        match &self.hostname {
            Some(name) => format!("{} ({})", name, self.address),
            None => self.address.to_string(),
        }
    }
}

/// Resolve a network range to concrete hosts
#[async_trait::async_trait]
pub trait HostDiscoverer: Send + Sync {
    async fn discover(&self, network_range: &str) -> Result<Vec<DiscoveredHost>>;
}

/// Reverse lookup function; returns `None` when the address has no name
pub type ReverseResolver = fn(IpAddr) -> Option<String>;

/// Reverse DNS through the system resolver
pub fn system_reverse_lookup(ip: IpAddr) -> Option<String> {
    match dns_lookup::lookup_addr(&ip) {
        // Some resolvers echo the numeric address back instead of failing
        Ok(name) if name.parse::<IpAddr>().is_err() && !name.is_empty() => Some(name),
        Ok(_) => None,
        Err(e) => {
            trace!("No reverse DNS for {}: {}", ip, e);
            None
        }
    }
}

/// TCP-connect host discovery
pub struct TcpHostDiscovery {
    timeout: Duration,
    tcp_ports: Vec<u16>,
    concurrency: usize,
    require_hostname: bool,
    resolver: ReverseResolver,
}

impl TcpHostDiscovery {
    pub fn new(config: &DiscoveryConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.probe_timeout_ms),
            tcp_ports: config.tcp_ports.clone(),
            concurrency: config.concurrency.max(1),
            require_hostname: config.require_hostname,
            resolver: system_reverse_lookup,
        }
    }

    /// Replace the reverse resolver
    pub fn with_resolver(mut self, resolver: ReverseResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Check if a single host is up
    pub async fn is_host_up(&self, ip: IpAddr) -> bool {
        for &port in &self.tcp_ports {
            let addr = SocketAddr::new(ip, port);
            trace!("TCP connect probe to {}", addr);

            match timeout(self.timeout, TcpStream::connect(addr)).await {
                Ok(Ok(_stream)) => {
                    debug!("Host {} is up (TCP connect to port {})", ip, port);
                    return true;
                }
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    // Refused means the host answered; only the port is closed
                    debug!("Host {} is up (connection refused on port {})", ip, port);
                    return true;
                }
                Ok(Err(e)) => trace!("TCP connect to {} failed: {}", addr, e),
                Err(_) => trace!("TCP connect to {} timed out", addr),
            }
        }
        false
    }

    async fn probe(&self, ip: IpAddr) -> Option<DiscoveredHost> {
        if !self.is_host_up(ip).await {
            return None;
        }

        let resolver = self.resolver;
        let hostname = match tokio::task::spawn_blocking(move || resolver(ip)).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Reverse lookup for {} panicked: {}", ip, e);
                None
            }
        };

        if hostname.is_none() && self.require_hostname {
            debug!("Skipping {}: no reverse DNS name", ip);
            return None;
        }
        Some(DiscoveredHost::new(ip, hostname))
    }
}

#[async_trait::async_trait]
impl HostDiscoverer for TcpHostDiscovery {
    async fn discover(&self, network_range: &str) -> Result<Vec<DiscoveredHost>> {
        let ips = parse_network_range(network_range)?;
        if self.tcp_ports.is_empty() {
            return Err(Error::Discovery("no probe ports configured".into()));
        }
        info!(
            "Discovering hosts in {} ({} addresses)",
            network_range.trim(),
            ips.len()
        );

        let mut hosts: Vec<DiscoveredHost> = stream::iter(ips)
            .map(|ip| self.probe(ip))
            .buffer_unordered(self.concurrency)
            .filter_map(|host| async move { host })
            .collect()
            .await;

        hosts.sort_by_key(|h| h.address);
        info!("Discovery found {} host(s)", hosts.len());
        Ok(hosts)
    }
}

/// Expand a network range: single address, CIDR, or `start-end`
pub fn parse_network_range(range: &str) -> Result<Vec<IpAddr>> {
    let range = range.trim();
    if range.is_empty() {
        return Err(Error::InvalidTarget("empty network range".into()));
    }
    if range.contains('/') {
        parse_cidr(range)
    } else if range.contains('-') {
        parse_ip_range(range)
    } else {
        let ip: IpAddr = range
            .parse()
            .map_err(|_| Error::InvalidTarget(format!("Invalid address: {}", range)))?;
        Ok(vec![ip])
    }
}

/// Parse a CIDR notation into a list of IPs
pub fn parse_cidr(cidr: &str) -> Result<Vec<IpAddr>> {
    let parts: Vec<&str> = cidr.split('/').collect();
    if parts.len() != 2 {
        return Err(Error::InvalidTarget(format!("Invalid CIDR: {}", cidr)));
    }

    let ip: Ipv4Addr = parts[0]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTarget(format!("Invalid IP in CIDR: {}", parts[0])))?;

    let prefix: u8 = parts[1]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTarget(format!("Invalid prefix in CIDR: {}", parts[1])))?;

    if prefix > 32 {
        return Err(Error::InvalidTarget(format!(
            "Invalid prefix length: {}",
            prefix
        )));
    }

    if prefix < 16 {
        return Err(Error::InvalidTarget(
            "CIDR prefix too small (minimum /16)".to_string(),
        ));
    }

    let ip_u32 = u32::from(ip);
    let mask = !((1u64 << (32 - prefix)) - 1) as u32;
    let network = ip_u32 & mask;
    let broadcast = network | !mask;

    // Skip network and broadcast addresses below /31
    let (start, end) = if prefix < 31 {
        (network + 1, broadcast - 1)
    } else {
        (network, broadcast)
    };

    Ok((start..=end)
        .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
        .collect())
}

/// Parse an IP range (e.g., "192.168.1.1-192.168.1.254")
pub fn parse_ip_range(range: &str) -> Result<Vec<IpAddr>> {
    let parts: Vec<&str> = range.split('-').collect();
    if parts.len() != 2 {
        return Err(Error::InvalidTarget(format!("Invalid IP range: {}", range)));
    }

    let start: Ipv4Addr = parts[0]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTarget(format!("Invalid start IP: {}", parts[0])))?;

    let end: Ipv4Addr = parts[1]
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTarget(format!("Invalid end IP: {}", parts[1])))?;

    let start_u32 = u32::from(start);
    let end_u32 = u32::from(end);

    if start_u32 > end_u32 {
        return Err(Error::InvalidTarget(
            "Start IP must be less than end IP".to_string(),
        ));
    }

    if end_u32 - start_u32 > 65535 {
        return Err(Error::InvalidTarget(
            "IP range too large (maximum 65536 hosts)".to_string(),
        ));
    }

    Ok((start_u32..=end_u32)
        .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
        .collect())
}
