use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use scopeguard::ScopeGuard;
use tracing::{debug, info, warn};
use crate::config::{Credentials, SshEndpoint};
use crate::dns_resolver::{DnsResolver, SystemDnsResolver};
use crate::session::TunnelSession;
use crate::transport::{SecureChannelProvider, SecureSession, TunnelError};

const ABORT_REASON: &str = "Client aborting tunnel setup";

/// Builds [`TunnelSession`]s: endpoint connection, handshake, password
/// authentication and the direct channel to the destination.
pub struct SessionBuilder<P: SecureChannelProvider> {
    provider: Arc<P>,
    credentials: Credentials,
    endpoint: SshEndpoint,
    resolver: Box<dyn DnsResolver>,
}

impl<P: SecureChannelProvider> SessionBuilder<P> {
    pub fn new(provider: Arc<P>, credentials: Credentials, endpoint: SshEndpoint) -> Self {
        Self {
            provider,
            credentials,
            endpoint,
            resolver: Box::new(SystemDnsResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: impl DnsResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn endpoint(&self) -> &SshEndpoint {
        &self.endpoint
    }

    /// Builds a session whose channel leads to `destination_host:destination_port`.
    ///
    /// Whatever was opened before a failing step is released before the
    /// error is returned: the endpoint socket is dropped, and an established
    /// secure session is disconnected first.
    pub fn build(
        &self,
        destination_host: &str,
        destination_port: u16,
    ) -> Result<TunnelSession<P::Session>, TunnelError> {
        self.provider.initialize();

        self.resolver.resolve(destination_host)?;

        let stream = self.connect_endpoint()?;
        let session = self.provider.open_session(stream)?;
        let mut session = scopeguard::guard(session, |mut session| {
            if let Err(e) = session.disconnect(ABORT_REASON) {
                debug!("disconnect after failed setup: {e}");
            }
        });

        let username = self.credentials.username();
        match session.auth_methods(username) {
            Ok(methods) => debug!("endpoint offers auth methods for {username}: {methods}"),
            Err(e) => debug!("cannot list auth methods for {username}: {e}"),
        }

        info!("authenticating {username}");
        session.authenticate(username, self.credentials.password())?;

        info!("opening tcp channel to {destination_host}:{destination_port}");
        let channel = session
            .open_direct_channel(destination_host, destination_port)
            .inspect_err(|_| {
                warn!("couldn't get the channel to {destination_host}:{destination_port}")
            })?;

        let session = ScopeGuard::into_inner(session);
        Ok(TunnelSession::new(
            session,
            channel,
            format!("{destination_host}:{destination_port}"),
        ))
    }

    fn connect_endpoint(&self) -> Result<TcpStream, TunnelError> {
        let endpoint = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        let connect_error = |source: io::Error| TunnelError::Connect {
            endpoint: endpoint.clone(),
            source,
        };

        let addrs: Vec<SocketAddr> = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(connect_error)?
            .collect();

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "endpoint has no addresses");
        for addr in addrs {
            let attempt = match self.endpoint.connect_timeout() {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    debug!("connected to tunnel endpoint {addr}");
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("tunnel endpoint {addr} unreachable: {e}");
                    last_error = e;
                }
            }
        }
        Err(connect_error(last_error))
    }
}
