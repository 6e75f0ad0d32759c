//! vulnwatch Network - host discovery for scan provisioning
//!
//! Turns a network range into the live, named hosts an operator can pick
//! as scan targets.

pub mod discovery;

pub use discovery::{
    parse_cidr, parse_ip_range, parse_network_range, DiscoveredHost, HostDiscoverer,
    TcpHostDiscovery,
};
