use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};
use crate::config::{ListenerMode, RelayOptions, TunnelConfig};
use crate::lifecycle::SessionBuilder;
use crate::relay;
use crate::transport::{SecureChannelProvider, TunnelError};
use crate::tunnel_stats::TunnelStats;

pub const LISTEN_BACKLOG: i32 = 5;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(500);

/// Local entry point of a tunnel: an ephemeral loopback-reachable port whose
/// clients are relayed to one fixed destination.
pub struct TunnelListener<P: SecureChannelProvider> {
    builder: Arc<SessionBuilder<P>>,
    relay: RelayOptions,
    mode: ListenerMode,
    stats: Arc<TunnelStats>,
}

/// A started tunnel. Dropping the handle detaches the worker.
#[derive(Debug)]
pub struct TunnelHandle {
    local_addr: SocketAddr,
    worker: JoinHandle<()>,
}

impl TunnelHandle {
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the accept worker to exit.
    pub fn join(self) -> thread::Result<()> {
        self.worker.join()
    }

    /// Lets the worker run on unattended and returns the listening port.
    pub fn into_port(self) -> u16 {
        self.port()
    }
}

impl<P: SecureChannelProvider> TunnelListener<P> {
    pub fn new(provider: Arc<P>, config: TunnelConfig) -> Self {
        let builder = SessionBuilder::new(provider, config.credentials, config.endpoint);
        Self::from_builder(builder, config.relay, config.mode)
    }

    pub fn from_builder(builder: SessionBuilder<P>, relay: RelayOptions, mode: ListenerMode) -> Self {
        Self {
            builder: Arc::new(builder),
            relay,
            mode,
            stats: TunnelStats::new(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<TunnelStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &Arc<TunnelStats> {
        &self.stats
    }

    /// Binds an ephemeral port and returns as soon as it is listening. Clients
    /// are accepted and relayed on a dedicated worker thread.
    pub fn start(&self, destination_host: &str, destination_port: u16) -> Result<TunnelHandle, TunnelError> {
        let listener = bind_ephemeral()?;
        let local_addr = listener.local_addr().map_err(TunnelError::Bind)?;

        info!(
            "creating tunnel to {destination_host}:{destination_port} @ port {}",
            local_addr.port()
        );

        let client_worker = ClientWorker {
            builder: Arc::clone(&self.builder),
            destination_host: destination_host.to_string(),
            destination_port,
            relay: self.relay.clone(),
            stats: Arc::clone(&self.stats),
        };
        let mode = self.mode;

        let worker = thread::Builder::new()
            .name(format!("sshy-tunnel-{}", local_addr.port()))
            .spawn(move || match mode {
                ListenerMode::SingleShot => client_worker.accept_once(listener),
                ListenerMode::Sequential => client_worker.accept_forever(listener),
            })
            .map_err(TunnelError::Bind)?;

        Ok(TunnelHandle { local_addr, worker })
    }
}

fn bind_ephemeral() -> Result<TcpListener, TunnelError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(TunnelError::Bind)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    if let Err(e) = socket.bind(&addr.into()) {
        error!("cannot bind to ssh forward port: {e}");
        return Err(TunnelError::Bind(e));
    }
    socket.listen(LISTEN_BACKLOG).map_err(TunnelError::Bind)?;
    Ok(socket.into())
}

struct ClientWorker<P: SecureChannelProvider> {
    builder: Arc<SessionBuilder<P>>,
    destination_host: String,
    destination_port: u16,
    relay: RelayOptions,
    stats: Arc<TunnelStats>,
}

impl<P: SecureChannelProvider> ClientWorker<P> {
    fn accept_once(&self, listener: TcpListener) {
        debug!("about to accept on {:?}", listener.local_addr().ok());
        match listener.accept() {
            Ok((client, peer)) => {
                drop(listener);
                self.serve(client, peer);
            }
            Err(e) => error!("accept on tunnel listener failed: {e}"),
        }
    }

    fn accept_forever(&self, listener: TcpListener) {
        loop {
            match listener.accept() {
                Ok((client, peer)) => self.serve(client, peer),
                Err(e) => {
                    warn!("accept on tunnel listener failed: {e}");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
    }

    /// Builds a session for one client and relays it. The client socket is
    /// closed on every path; nothing is written to it on failure.
    fn serve(&self, mut client: TcpStream, peer: SocketAddr) {
        debug!("client {peer} connected");

        let mut session = match self.builder.build(&self.destination_host, self.destination_port) {
            Ok(session) => session,
            Err(e) => {
                self.stats.tunnel_failed();
                warn!(
                    "tunnel to {}:{} for {peer} not established: {e}",
                    self.destination_host, self.destination_port
                );
                close_client(client);
                return;
            }
        };

        self.stats.tunnel_started();
        let report = relay::run(&mut client, &mut session, &self.relay);
        session.teardown();
        self.stats
            .tunnel_closed(report.bytes_to_tunnel, report.bytes_to_client);

        info!(
            "client at {peer} finished ({:?}): {} bytes sent, {} bytes received",
            report.stop, report.bytes_to_tunnel, report.bytes_to_client
        );
        close_client(client);
    }
}

fn close_client(client: TcpStream) {
    if let Err(e) = client.shutdown(Shutdown::Both) {
        debug!("client shutdown: {e}");
    }
}
