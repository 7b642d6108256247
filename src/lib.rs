//! Reach a destination `host:port` through an SSH direct-tcpip channel while
//! handing the caller a plain local TCP port.
//!
//! [`start_tunnel`] binds an ephemeral listener and returns its port at once.
//! The first client that connects is relayed to the destination through a
//! freshly authenticated SSH session; when either side ends, the session and
//! both sockets are closed.

pub mod config;
pub mod direct_transport;
pub mod dns_resolver;
pub mod lifecycle;
pub mod listener;
pub mod logging;
pub mod relay;
pub mod session;
pub mod ssh_transport;
pub mod transport;
pub mod tunnel_stats;

#[cfg(test)]
mod test_transport;

use std::sync::Arc;

pub use config::{Credentials, ListenerMode, RelayOptions, SshEndpoint, TunnelConfig};
pub use lifecycle::SessionBuilder;
pub use listener::{TunnelHandle, TunnelListener};
pub use relay::{RelayReport, StopReason};
pub use session::TunnelSession;
pub use ssh_transport::SshProvider;
pub use transport::{SecureChannelProvider, SecureSession, TunnelChannel, TunnelError};

/// Starts a single-shot SSH tunnel to `destination_host:destination_port`
/// using credentials and endpoint from the environment, and returns the
/// local port to connect to.
pub fn start_tunnel(destination_host: &str, destination_port: u16) -> Result<u16, TunnelError> {
    let config = TunnelConfig::from_env()?;
    start_tunnel_with(config, destination_host, destination_port)
}

/// Like [`start_tunnel`], with an explicit configuration instead of the
/// environment. The tunnel follows `config.mode`.
pub fn start_tunnel_with(
    config: TunnelConfig,
    destination_host: &str,
    destination_port: u16,
) -> Result<u16, TunnelError> {
    let listener = TunnelListener::new(Arc::new(SshProvider::new()), config);
    let handle = listener.start(destination_host, destination_port)?;
    Ok(handle.into_port())
}
