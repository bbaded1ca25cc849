//! Subnet math and hostname resolution

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tracing::error;

use crate::errors::DevServerError;

/// An IPv4 subnet as written in configuration (`192.168.0.0/24`).
///
/// The configured address is kept as written so it can be reported back in
/// error messages and metric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subnet {
    ip: Ipv4Addr,
    net: Ipv4Net,
}

impl Subnet {
    pub fn new(ip: Ipv4Addr, mask_bits: u8) -> Result<Self, DevServerError> {
        let net = Ipv4Net::new(ip, mask_bits)
            .map_err(|e| DevServerError::Config(format!("Invalid subnet {}/{}: {}", ip, mask_bits, e)))?
            .trunc();
        Ok(Self { ip, net })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn mask_bits(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.mask_bits())
    }
}

impl FromStr for Subnet {
    type Err = DevServerError;

    /// Accepts `ip/bits` and the legacy `ip:bits` form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DevServerError::Config(format!("Invalid restricted subnet: {}", s));
        let (ip, bits) = s
            .split_once('/')
            .or_else(|| s.split_once(':'))
            .ok_or_else(invalid)?;
        let ip: Ipv4Addr = ip.trim().parse().map_err(|_| invalid())?;
        let bits: u8 = bits.trim().parse().map_err(|_| invalid())?;
        Subnet::new(ip, bits)
    }
}

/// Whether two addresses share the first `mask_bits` bits
pub fn is_in_same_subnet(a: Ipv4Addr, b: Ipv4Addr, mask_bits: u8) -> bool {
    match Subnet::new(a, mask_bits) {
        Ok(subnet) => subnet.contains(b),
        Err(_) => false,
    }
}

/// The first configured restricted subnet containing `ip`
pub fn restricted_subnet_for(ip: Ipv4Addr, subnets: &[Subnet]) -> Option<Subnet> {
    subnets.iter().copied().find(|s| s.contains(ip))
}

/// Hostname to IPv4 resolution
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `host` to an IPv4 address, `None` when it cannot be resolved
    async fn lookup(&self, host: &str) -> Option<Ipv4Addr>;
}

/// Resolves through the operating system
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl NameResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Option<Ipv4Addr> {
        if host.is_empty() {
            return None;
        }
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Some(ip);
        }
        match tokio::net::lookup_host((host, 0)).await {
            Ok(addrs) => {
                for addr in addrs {
                    if let IpAddr::V4(ip) = addr.ip() {
                        return Some(ip);
                    }
                }
                None
            }
            Err(e) => {
                error!("Failed to get IP address of {}, error: {}", host, e);
                None
            }
        }
    }
}

/// Fixed hostname table. IP literals resolve to themselves.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    table: HashMap<String, Ipv4Addr>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, host: &str, ip: Ipv4Addr) -> Self {
        self.table.insert(host.to_string(), ip);
        self
    }
}

#[async_trait]
impl NameResolver for StaticResolver {
    async fn lookup(&self, host: &str) -> Option<Ipv4Addr> {
        host.parse()
            .ok()
            .or_else(|| self.table.get(host).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_parsing() {
        let subnet: Subnet = "192.168.0.10/24".parse().unwrap();
        assert_eq!(subnet.to_string(), "192.168.0.10/24");
        assert!(subnet.contains(Ipv4Addr::new(192, 168, 0, 200)));
        assert!(!subnet.contains(Ipv4Addr::new(192, 168, 1, 1)));

        let legacy: Subnet = "10.0.0.0:8".parse().unwrap();
        assert_eq!(legacy.mask_bits(), 8);
        assert!(legacy.contains(Ipv4Addr::new(10, 200, 3, 4)));

        assert!("10.0.0.0".parse::<Subnet>().is_err());
        assert!("10.0.0.0/33".parse::<Subnet>().is_err());
    }

    #[test]
    fn test_same_subnet() {
        let a = Ipv4Addr::new(100, 115, 10, 1);
        let b = Ipv4Addr::new(100, 115, 31, 1);
        let c = Ipv4Addr::new(100, 115, 32, 1);
        assert!(is_in_same_subnet(a, b, 19));
        assert!(!is_in_same_subnet(a, c, 19));
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new().with("dut1", Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(resolver.lookup("dut1").await, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(resolver.lookup("10.1.1.1").await, Some(Ipv4Addr::new(10, 1, 1, 1)));
        assert_eq!(resolver.lookup("unknown").await, None);
    }
}
