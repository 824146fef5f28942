use std::net::{IpAddr, Ipv4Addr};

/// Name to IPv4 address resolution.
pub trait Resolve: Send + Sync {
    fn resolve(&self, destination: &str) -> Option<Ipv4Addr>;
}

/// Resolver backed by the system's `getaddrinfo`.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, destination: &str) -> Option<Ipv4Addr> {
        if let Ok(addr) = destination.parse::<Ipv4Addr>() {
            return Some(addr);
        }

        dns_lookup::lookup_host(destination)
            .ok()?
            .into_iter()
            .find_map(|addr| match addr {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
    }
}
