use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use tracing::{debug, trace, warn};
use crate::config::RelayOptions;
use crate::session::TunnelSession;
use crate::transport::{SecureSession, TunnelError};

/// Why a relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The client closed its side of the connection.
    ClientClosed,
    ClientError,
    /// The readiness wait on the client socket failed.
    WaitFailed,
    /// The tunnel channel reached end of stream.
    TunnelClosed,
    TunnelError,
    ClientWriteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReport {
    pub bytes_to_tunnel: u64,
    pub bytes_to_client: u64,
    /// Client bytes the channel did not take during best-effort forwarding.
    pub bytes_dropped: u64,
    pub stop: StopReason,
}

#[derive(Debug, Default)]
struct Counters {
    to_tunnel: u64,
    to_client: u64,
    dropped: u64,
}

impl Counters {
    fn finish(self, stop: StopReason) -> RelayReport {
        RelayReport {
            bytes_to_tunnel: self.to_tunnel,
            bytes_to_client: self.to_client,
            bytes_dropped: self.dropped,
            stop,
        }
    }
}

/// Shuttles bytes between `client` and `session` until either side ends.
///
/// Each iteration waits a bounded time for the client to become readable,
/// forwards one buffer of client data to the tunnel, then drains whatever the
/// tunnel has ready back to the client. Forwarding to the tunnel is a single
/// best-effort write: bytes the channel does not accept are dropped and
/// counted in [`RelayReport::bytes_dropped`].
///
/// The client socket is left open; closing it belongs to the caller.
pub fn run<S: SecureSession>(
    client: &mut TcpStream,
    session: &mut TunnelSession<S>,
    options: &RelayOptions,
) -> RelayReport {
    let mut counters = Counters::default();
    let mut buf = vec![0u8; options.buffer_size()];

    session.set_blocking(false);
    if let Err(e) = client.set_read_timeout(Some(options.poll_interval())) {
        warn!("cannot arm client wait: {e}");
        return counters.finish(StopReason::WaitFailed);
    }

    let stop = loop {
        match wait_client_readable(client) {
            Err(e) => {
                debug!("client wait failed: {e}");
                break StopReason::WaitFailed;
            }
            Ok(true) => {
                if let Some(stop) = forward_to_tunnel(client, session, &mut buf, &mut counters) {
                    break stop;
                }
            }
            Ok(false) => {}
        }

        if let Some(stop) = drain_tunnel_to_client(client, session, &mut buf, &mut counters) {
            break stop;
        }
    };

    debug!(
        "relay to {} stopped ({stop:?}): {} bytes out, {} bytes back",
        session.destination(),
        counters.to_tunnel,
        counters.to_client
    );
    counters.finish(stop)
}

/// Bounded wait: `Ok(false)` when the poll interval elapsed without data.
/// A pending end-of-file also counts as readable.
fn wait_client_readable(client: &TcpStream) -> io::Result<bool> {
    let mut probe = [0u8; 1];
    match client.peek(&mut probe) {
        Ok(_) => Ok(true),
        Err(e) if is_timeout(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

fn forward_to_tunnel<S: SecureSession>(
    client: &mut TcpStream,
    session: &mut TunnelSession<S>,
    buf: &mut [u8],
    counters: &mut Counters,
) -> Option<StopReason> {
    let len = match client.read(buf) {
        Ok(0) => {
            debug!("client of {} disconnected", session.destination());
            return Some(StopReason::ClientClosed);
        }
        Ok(n) => n,
        Err(e) if is_timeout(&e) => return None,
        Err(e) => {
            debug!("client read failed: {e}");
            return Some(StopReason::ClientError);
        }
    };

    match session.write(&buf[..len]) {
        Ok(written) => {
            counters.to_tunnel += written as u64;
            if written < len {
                debug!("channel took {written} of {len} bytes; remainder dropped");
                counters.dropped += (len - written) as u64;
            }
        }
        Err(TunnelError::WouldBlock) => {
            debug!("channel not writable; dropped {len} bytes");
            counters.dropped += len as u64;
        }
        Err(e) => {
            warn!("channel write to {} failed: {e}", session.destination());
            counters.dropped += len as u64;
        }
    }
    None
}

fn drain_tunnel_to_client<S: SecureSession>(
    client: &mut TcpStream,
    session: &mut TunnelSession<S>,
    buf: &mut [u8],
    counters: &mut Counters,
) -> Option<StopReason> {
    loop {
        let len = match session.read(buf) {
            Ok(0) => return Some(StopReason::TunnelClosed),
            Ok(n) => n,
            Err(TunnelError::WouldBlock) => return None,
            Err(TunnelError::StreamEnd) => return Some(StopReason::TunnelClosed),
            Err(e) => {
                warn!("channel read from {} failed: {e}", session.destination());
                return Some(StopReason::TunnelError);
            }
        };

        trace!("relaying {len} bytes to client");
        if let Err(e) = client.write_all(&buf[..len]) {
            debug!("client write failed: {e}");
            return Some(StopReason::ClientWriteFailed);
        }
        counters.to_client += len as u64;
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}
