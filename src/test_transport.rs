use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use crate::transport::{SecureChannelProvider, SecureSession, TunnelChannel, TunnelError};

/// Shared, inspectable state behind a scripted channel.
#[derive(Debug, Default)]
pub struct ChannelScript {
    /// Bytes the far side will deliver, in order.
    pub inbound: VecDeque<u8>,
    /// Signal end-of-stream once `inbound` is drained.
    pub eof: bool,
    /// Fail every channel read with this error kind.
    pub read_error: Option<io::ErrorKind>,
    /// Return zero bytes without signalling end-of-stream once drained.
    pub zero_read_without_eof: bool,
    /// Everything the channel accepted.
    pub written: Vec<u8>,
    pub channel_reads: usize,
    pub channel_writes: usize,
    /// Accept at most this many bytes per write.
    pub write_limit: Option<usize>,
    pub write_would_block: bool,
    pub refuse_channel: bool,
    pub blocking: bool,
    /// Once `written` equals `request`, queue `response` and signal EOF.
    pub request: Option<Vec<u8>>,
    pub response: Vec<u8>,
    /// Release/disconnect events in the order they happened.
    pub events: Vec<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub struct SharedScript(Arc<Mutex<ChannelScript>>);

impl SharedScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inbound(data: &[u8], eof: bool) -> Self {
        let script = Self::new();
        {
            let mut state = script.lock();
            state.inbound.extend(data.iter().copied());
            state.eof = eof;
        }
        script
    }

    pub fn lock(&self) -> MutexGuard<'_, ChannelScript> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct ScriptedChannel {
    script: SharedScript,
}

impl Read for ScriptedChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.script.lock();
        state.channel_reads += 1;
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(kind) = state.read_error {
            return Err(kind.into());
        }
        if !state.inbound.is_empty() {
            let n = buf.len().min(state.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = state.inbound.pop_front().unwrap_or_default();
            }
            return Ok(n);
        }
        if state.eof || state.zero_read_without_eof {
            return Ok(0);
        }
        Err(io::ErrorKind::WouldBlock.into())
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.script.lock();
        state.channel_writes += 1;
        if state.write_would_block {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = state.write_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        state.written.extend_from_slice(&buf[..n]);
        if state.request.as_deref() == Some(state.written.as_slice()) {
            let response = std::mem::take(&mut state.response);
            state.inbound.extend(response);
            state.eof = true;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TunnelChannel for ScriptedChannel {
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.script.lock().blocking = blocking;
        Ok(())
    }

    fn eof(&self) -> bool {
        let state = self.script.lock();
        state.eof && state.inbound.is_empty()
    }
}

impl Drop for ScriptedChannel {
    fn drop(&mut self) {
        self.script.lock().events.push("channel_free");
    }
}

pub struct ScriptedSession {
    script: SharedScript,
    password: String,
    _endpoint: Option<TcpStream>,
}

impl ScriptedSession {
    pub fn new(script: SharedScript, password: &str) -> Self {
        Self {
            script,
            password: password.to_string(),
            _endpoint: None,
        }
    }
}

impl SecureSession for ScriptedSession {
    type Channel = ScriptedChannel;

    fn auth_methods(&self, _username: &str) -> Result<String, TunnelError> {
        Ok("password,publickey".to_string())
    }

    fn authenticate(&mut self, username: &str, password: &str) -> Result<(), TunnelError> {
        if password == self.password {
            Ok(())
        } else {
            Err(TunnelError::Authentication {
                username: username.to_string(),
                reason: "password rejected".to_string(),
            })
        }
    }

    fn open_direct_channel(&mut self, host: &str, port: u16) -> Result<ScriptedChannel, TunnelError> {
        let mut state = self.script.lock();
        if state.refuse_channel {
            return Err(TunnelError::ChannelOpen {
                destination: format!("{host}:{port}"),
                reason: "administratively prohibited".to_string(),
            });
        }
        state.blocking = true;
        Ok(ScriptedChannel {
            script: self.script.clone(),
        })
    }

    fn disconnect(&mut self, _reason: &str) -> Result<(), TunnelError> {
        self.script.lock().events.push("disconnect");
        Ok(())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.script.lock().events.push("session_free");
    }
}

/// Provider handing out sessions that share one script.
pub struct ScriptedProvider {
    pub script: SharedScript,
    pub password: String,
    pub fail_handshake: bool,
    pub sessions_opened: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: SharedScript, password: &str) -> Self {
        Self {
            script,
            password: password.to_string(),
            fail_handshake: false,
            sessions_opened: AtomicUsize::new(0),
        }
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }
}

impl SecureChannelProvider for ScriptedProvider {
    type Session = ScriptedSession;

    fn open_session(&self, stream: TcpStream) -> Result<ScriptedSession, TunnelError> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_handshake {
            return Err(TunnelError::Handshake("unexpected banner".to_string()));
        }
        let mut session = ScriptedSession::new(self.script.clone(), &self.password);
        session._endpoint = Some(stream);
        Ok(session)
    }
}

/// Opens a session and channel directly, skipping the lifecycle manager.
pub fn scripted_pair(script: &SharedScript) -> (ScriptedSession, ScriptedChannel) {
    let mut session = ScriptedSession::new(script.clone(), "secret");
    let channel = session
        .open_direct_channel("db.internal", 5432)
        .expect("scripted channel");
    (session, channel)
}

/// A stand-in tunnel endpoint that accepts and holds connections until the
/// peer hangs up. Returns the bound port.
pub fn spawn_endpoint() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind endpoint");
    let port = listener.local_addr().expect("endpoint addr").port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            thread::spawn(move || {
                let mut sink = [0u8; 256];
                while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
            });
        }
    });
    port
}

/// Returns both ends of a connected loopback TCP pair.
pub fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind pair");
    let client = TcpStream::connect(listener.local_addr().expect("pair addr")).expect("connect pair");
    let (server, _) = listener.accept().expect("accept pair");
    (client, server)
}
