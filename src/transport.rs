use std::io::{self, Read, Write};
use std::net::TcpStream;

/// Secure channel provider abstraction.
///
/// A provider turns a connected TCP stream to the tunnel endpoint into an
/// authenticated-capable [`SecureSession`]. The session in turn opens the
/// single logical [`TunnelChannel`] used for one tunneled connection.
pub trait SecureChannelProvider: Send + Sync + 'static {
    type Session: SecureSession;

    /// Process-wide one-time setup. Called before every build; implementations
    /// must make repeated calls cheap and side-effect free.
    fn initialize(&self) {}

    /// Starts a session over `stream`. The session owns the stream from here on.
    fn open_session(&self, stream: TcpStream) -> Result<Self::Session, TunnelError>;
}

pub trait SecureSession: Send {
    type Channel: TunnelChannel;

    /// Authentication methods offered by the endpoint for `username`.
    fn auth_methods(&self, username: &str) -> Result<String, TunnelError>;

    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TunnelError>;

    /// Opens a "direct" channel bound to `host:port` on the far side.
    fn open_direct_channel(&mut self, host: &str, port: u16) -> Result<Self::Channel, TunnelError>;

    /// Best-effort disconnect. Releasing the handle happens on drop.
    fn disconnect(&mut self, reason: &str) -> Result<(), TunnelError>;
}

/// Duplex byte channel carried inside a secure session.
///
/// Reads and writes follow `std::io` conventions: in non-blocking mode the
/// channel reports `ErrorKind::WouldBlock` when it has no data or capacity.
pub trait TunnelChannel: Read + Write + Send {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;

    /// True once the remote side has signalled end-of-stream.
    fn eof(&self) -> bool;
}

#[derive(Debug)]
pub enum TunnelError {
    Configuration(String),
    Resolution { host: String, source: Option<io::Error> },
    Connect { endpoint: String, source: io::Error },
    Handshake(String),
    Authentication { username: String, reason: String },
    ChannelOpen { destination: String, reason: String },
    Bind(io::Error),
    WouldBlock,
    StreamEnd,
    Transport(io::Error),
}

impl TunnelError {
    /// Errors raised while building a session, before any relaying happens.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            TunnelError::Configuration(_)
                | TunnelError::Resolution { .. }
                | TunnelError::Connect { .. }
                | TunnelError::Handshake(_)
                | TunnelError::Authentication { .. }
                | TunnelError::ChannelOpen { .. }
        )
    }
}

impl std::fmt::Display for TunnelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelError::Configuration(detail) => write!(f, "Configuration error: {detail}"),
            TunnelError::Resolution { host, .. } => write!(f, "No such host as {host}"),
            TunnelError::Connect { endpoint, source } => {
                write!(f, "Cannot connect to tunnel endpoint {endpoint}: {source}")
            }
            TunnelError::Handshake(detail) => write!(f, "Secure session handshake failed: {detail}"),
            TunnelError::Authentication { username, reason } => {
                write!(f, "Authentication failed for {username}: {reason}")
            }
            TunnelError::ChannelOpen { destination, reason } => {
                write!(f, "Could not open tunnel channel to {destination}: {reason}")
            }
            TunnelError::Bind(source) => write!(f, "Cannot bind tunnel listener: {source}"),
            TunnelError::WouldBlock => write!(f, "Operation would block"),
            TunnelError::StreamEnd => write!(f, "End of stream"),
            TunnelError::Transport(source) => write!(f, "Transport I/O failure: {source}"),
        }
    }
}

impl std::error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TunnelError::Resolution { source: Some(source), .. } => Some(source),
            TunnelError::Connect { source, .. } => Some(source),
            TunnelError::Bind(source) | TunnelError::Transport(source) => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn construction_errors_are_classified() {
        assert!(TunnelError::Handshake("kex".into()).is_construction_error());
        assert!(TunnelError::ChannelOpen {
            destination: "db:5432".into(),
            reason: "refused".into()
        }
        .is_construction_error());
        assert!(!TunnelError::WouldBlock.is_construction_error());
        assert!(!TunnelError::StreamEnd.is_construction_error());
        assert!(!TunnelError::Transport(io::ErrorKind::BrokenPipe.into()).is_construction_error());
    }

    #[test]
    fn io_failures_are_exposed_as_source() {
        let err = TunnelError::Connect {
            endpoint: "gw:22".into(),
            source: io::ErrorKind::ConnectionRefused.into(),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("gw:22"));
        assert!(TunnelError::Handshake("x".into()).source().is_none());
    }
}
