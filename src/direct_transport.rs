// NOTE:
// This provider carries no encryption and performs no authentication.
// It exists for diagnostics and for exercising the relay over loopback.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use tracing::debug;
use crate::transport::{SecureChannelProvider, SecureSession, TunnelChannel, TunnelError};

/// Provider whose channels are plain TCP connections made from this host.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectProvider;

impl SecureChannelProvider for DirectProvider {
    type Session = DirectSession;

    fn open_session(&self, stream: TcpStream) -> Result<DirectSession, TunnelError> {
        Ok(DirectSession { endpoint: stream })
    }
}

/// Holds the endpoint connection open for the lifetime of the tunnel.
pub struct DirectSession {
    endpoint: TcpStream,
}

impl SecureSession for DirectSession {
    type Channel = DirectChannel;

    fn auth_methods(&self, _username: &str) -> Result<String, TunnelError> {
        Ok("none".to_string())
    }

    fn authenticate(&mut self, username: &str, _password: &str) -> Result<(), TunnelError> {
        debug!("direct transport accepts {username} without credentials check");
        Ok(())
    }

    fn open_direct_channel(&mut self, host: &str, port: u16) -> Result<DirectChannel, TunnelError> {
        let stream = TcpStream::connect((host, port)).map_err(|e| TunnelError::ChannelOpen {
            destination: format!("{host}:{port}"),
            reason: e.to_string(),
        })?;
        Ok(DirectChannel { stream, eof: false })
    }

    fn disconnect(&mut self, _reason: &str) -> Result<(), TunnelError> {
        self.endpoint
            .shutdown(Shutdown::Both)
            .map_err(TunnelError::Transport)
    }
}

pub struct DirectChannel {
    stream: TcpStream,
    eof: bool,
}

impl Read for DirectChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        Ok(n)
    }
}

impl Write for DirectChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl TunnelChannel for DirectChannel {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.stream.set_nonblocking(!blocking)
    }

    fn eof(&self) -> bool {
        self.eof
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn channel_reports_eof_after_peer_shutdown() {
        let destination = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = destination.local_addr().unwrap().port();
        let endpoint = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint_stream = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();

        let mut session = DirectProvider.open_session(endpoint_stream).unwrap();
        let mut channel = session.open_direct_channel("127.0.0.1", port).unwrap();
        let (mut peer, _) = destination.accept().unwrap();

        peer.write_all(b"hi").unwrap();
        peer.shutdown(Shutdown::Write).unwrap();

        let mut received = Vec::new();
        channel.read_to_end(&mut received).unwrap();
        assert_eq!(received, b"hi");
        assert!(channel.eof());
    }

    #[test]
    fn non_blocking_read_would_block() {
        let destination = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = destination.local_addr().unwrap().port();
        let endpoint = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint_stream = TcpStream::connect(endpoint.local_addr().unwrap()).unwrap();

        let mut session = DirectProvider.open_session(endpoint_stream).unwrap();
        let mut channel = session.open_direct_channel("127.0.0.1", port).unwrap();
        let _peer = destination.accept().unwrap();

        channel.set_blocking(false).unwrap();
        let mut buf = [0u8; 8];
        let err = channel.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(!channel.eof());
    }
}
