use std::net::{IpAddr, ToSocketAddrs};
use crate::transport::TunnelError;

/// Name lookup used before a tunnel endpoint is contacted.
pub trait DnsResolver: Send + Sync {
    fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, TunnelError>;
}

/// Resolver backed by the system's standard name resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDnsResolver;

impl DnsResolver for SystemDnsResolver {
    fn resolve(&self, hostname: &str) -> Result<Vec<IpAddr>, TunnelError> {
        let addrs: Vec<IpAddr> = (hostname, 0)
            .to_socket_addrs()
            .map_err(|e| TunnelError::Resolution {
                host: hostname.to_string(),
                source: Some(e),
            })?
            .map(|addr| addr.ip())
            .collect();

        if addrs.is_empty() {
            Err(TunnelError::Resolution {
                host: hostname.to_string(),
                source: None,
            })
        } else {
            Ok(addrs)
        }
    }
}
