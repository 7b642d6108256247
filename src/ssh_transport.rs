use lazy_static::lazy_static;
use ssh2::{Channel, DisconnectCode, Session};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use tracing::debug;
use crate::transport::{SecureChannelProvider, SecureSession, TunnelChannel, TunnelError};

lazy_static! {
    // libssh2 must be initialized once before the first session is created.
    static ref LIBSSH2_READY: () = {
        ssh2::init();
        debug!("libssh2 initialized");
    };
}

/// SSH-based secure channel provider backed by libssh2.
///
/// Host keys are not verified and only password authentication is used.
#[derive(Debug, Clone, Default)]
pub struct SshProvider {
    timeout: Option<Duration>,
}

impl SshProvider {
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Upper bound for blocking libssh2 calls (handshake, auth, channel open).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl SecureChannelProvider for SshProvider {
    type Session = SshSession;

    fn initialize(&self) {
        lazy_static::initialize(&LIBSSH2_READY);
    }

    fn open_session(&self, stream: TcpStream) -> Result<SshSession, TunnelError> {
        let mut session = Session::new().map_err(|e| TunnelError::Handshake(e.to_string()))?;
        session.set_tcp_stream(stream);
        if let Some(timeout) = self.timeout {
            session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
        }
        session
            .handshake()
            .map_err(|e| TunnelError::Handshake(e.to_string()))?;
        Ok(SshSession { session })
    }
}

pub struct SshSession {
    session: Session,
}

impl SecureSession for SshSession {
    type Channel = SshChannel;

    fn auth_methods(&self, username: &str) -> Result<String, TunnelError> {
        self.session
            .auth_methods(username)
            .map(str::to_owned)
            .map_err(|e| TunnelError::Authentication {
                username: username.to_string(),
                reason: e.to_string(),
            })
    }

    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TunnelError> {
        self.session
            .userauth_password(username, password)
            .map_err(|e| TunnelError::Authentication {
                username: username.to_string(),
                reason: e.to_string(),
            })?;
        if !self.session.authenticated() {
            return Err(TunnelError::Authentication {
                username: username.to_string(),
                reason: "server did not accept the password".to_string(),
            });
        }
        Ok(())
    }

    fn open_direct_channel(&mut self, host: &str, port: u16) -> Result<SshChannel, TunnelError> {
        let channel = self
            .session
            .channel_direct_tcpip(host, port, None)
            .map_err(|e| TunnelError::ChannelOpen {
                destination: format!("{host}:{port}"),
                reason: e.to_string(),
            })?;
        Ok(SshChannel {
            channel,
            session: self.session.clone(),
        })
    }

    fn disconnect(&mut self, reason: &str) -> Result<(), TunnelError> {
        self.session
            .disconnect(Some(DisconnectCode::ByApplication), reason, None)
            .map_err(|e| TunnelError::Transport(e.into()))
    }
}

/// A direct-tcpip channel. libssh2 keeps the blocking flag on the session,
/// so the channel carries a session handle to propagate mode changes.
pub struct SshChannel {
    channel: Channel,
    session: Session,
}

impl Read for SshChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for SshChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.channel.flush()
    }
}

impl TunnelChannel for SshChannel {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.session.set_blocking(blocking);
        Ok(())
    }

    fn eof(&self) -> bool {
        self.channel.eof()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn initialize_is_repeatable() {
        let provider = SshProvider::new();
        provider.initialize();
        provider.initialize();
    }

    #[test]
    fn handshake_against_non_ssh_peer_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let stream = TcpStream::connect(addr).unwrap();
        let provider = SshProvider::new().with_timeout(Duration::from_secs(5));
        provider.initialize();
        let result = provider.open_session(stream);

        assert!(matches!(result, Err(TunnelError::Handshake(_))));
        peer.join().unwrap();
    }
}
