use std::io::{self, ErrorKind, Read, Write};
use tracing::{debug, trace, warn};
use crate::transport::{SecureSession, TunnelChannel, TunnelError};

pub const DISCONNECT_REASON: &str = "Client disconnecting normally";

/// One tunneled connection: a secure session, the logical channel opened
/// over it, the current blocking mode and a one-byte look-ahead buffer.
///
/// A byte held in `peeked` has not been handed to any reader yet. It is
/// always returned by the next [`TunnelSession::read`] before the channel is
/// read again, so peeking never reorders or drops stream data.
pub struct TunnelSession<S: SecureSession> {
    session: Option<S>,
    channel: Option<S::Channel>,
    destination: String,
    blocking: bool,
    peeked: Option<u8>,
}

impl<S: SecureSession> TunnelSession<S> {
    pub fn new(session: S, channel: S::Channel, destination: String) -> Self {
        Self {
            session: Some(session),
            channel: Some(channel),
            destination,
            blocking: true,
            peeked: None,
        }
    }

    /// `host:port` the channel is bound to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    pub fn has_peeked(&self) -> bool {
        self.peeked.is_some()
    }

    /// Writes to the channel. A full channel in non-blocking mode yields
    /// [`TunnelError::WouldBlock`]; the caller decides whether to retry.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, TunnelError> {
        if data.is_empty() {
            return Ok(0);
        }
        let channel = self.channel.as_mut().ok_or(TunnelError::StreamEnd)?;
        match channel.write(data) {
            Ok(0) => Err(TunnelError::Transport(io::Error::new(
                ErrorKind::WriteZero,
                "channel accepted no data",
            ))),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TunnelError::WouldBlock),
            Err(e) => Err(TunnelError::Transport(e)),
        }
    }

    /// Reads from the channel, delivering a previously peeked byte first.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TunnelError> {
        if let Some(byte) = self.peeked {
            let Some(first) = buf.first_mut() else {
                return Ok(0);
            };
            *first = byte;
            self.peeked = None;
            return Ok(1);
        }

        let channel = self.channel.as_mut().ok_or(TunnelError::StreamEnd)?;
        match channel.read(buf) {
            Ok(n) if n > 0 || buf.is_empty() => Ok(n),
            Ok(_) => {
                if channel.eof() {
                    debug!("channel to {} reached end of stream", self.destination);
                    Err(TunnelError::StreamEnd)
                } else {
                    Err(TunnelError::Transport(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "channel returned no data without end of stream",
                    )))
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Err(TunnelError::WouldBlock),
            Err(e) => {
                if channel.eof() {
                    debug!("channel to {} closed: {e}", self.destination);
                    Err(TunnelError::StreamEnd)
                } else {
                    Err(TunnelError::Transport(e))
                }
            }
        }
    }

    /// Returns the next stream byte without consuming it.
    pub fn peek(&mut self) -> Option<u8> {
        if self.peeked.is_none() {
            let mut byte = [0u8; 1];
            if let Ok(1) = self.read_probe(&mut byte) {
                self.peeked = Some(byte[0]);
            }
        }
        self.peeked
    }

    /// Checks for pending data with a non-blocking single-byte probe, then
    /// leaves the channel in `blocking` mode. Any byte obtained is kept for
    /// the next read. A clean zero-length probe also counts as readable so
    /// that callers go on to observe the end of stream through `read`.
    pub fn poll(&mut self, blocking: bool) -> bool {
        if self.peeked.is_some() {
            return true;
        }
        if self.channel.is_none() {
            return false;
        }

        self.apply_blocking(false);
        let mut byte = [0u8; 1];
        let probe = self.read_probe(&mut byte);
        self.set_blocking(blocking);

        trace!("poll probe on {}: {probe:?}", self.destination);
        match probe {
            Ok(1) => {
                self.peeked = Some(byte[0]);
                true
            }
            Ok(_) => true,
            Err(_) => false,
        }
    }

    pub fn set_blocking(&mut self, blocking: bool) {
        self.blocking = blocking;
        self.apply_blocking(blocking);
    }

    /// Releases the channel, disconnects and releases the secure session.
    /// The endpoint socket is owned by the session and closes with it.
    /// Calling this more than once is harmless.
    pub fn teardown(&mut self) {
        // libssh2 defers closing a channel freed in non-blocking mode.
        self.apply_blocking(true);
        if let Some(channel) = self.channel.take() {
            drop(channel);
        }
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.disconnect(DISCONNECT_REASON) {
                debug!("disconnect from tunnel endpoint failed: {e}");
            }
            drop(session);
            debug!("tunnel session to {} released", self.destination);
        }
    }

    fn read_probe(&mut self, byte: &mut [u8; 1]) -> io::Result<usize> {
        match self.channel.as_mut() {
            Some(channel) => channel.read(byte),
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    fn apply_blocking(&mut self, blocking: bool) {
        if let Some(channel) = self.channel.as_mut() {
            if let Err(e) = channel.set_blocking(blocking) {
                warn!("cannot switch channel to {} mode: {e}", mode_name(blocking));
            }
        }
    }
}

impl<S: SecureSession> Drop for TunnelSession<S> {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn mode_name(blocking: bool) -> &'static str {
    if blocking {
        "blocking"
    } else {
        "non blocking"
    }
}
