use std::fmt;
use std::time::Duration;
use serde::Deserialize;
use crate::transport::TunnelError;

pub const ENV_USER: &str = "SSHY_USER";
pub const ENV_PASS: &str = "SSHY_PASS";
pub const ENV_HOST: &str = "SSHY_HOST";
pub const ENV_PORT: &str = "SSHY_PORT";
pub const ENV_LOG: &str = "SSHY_LOG";

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const MAX_CREDENTIAL_LEN: usize = 255;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_RELAY_BUFFER: usize = 16 * 1024;

/// Username/password pair used for password authentication.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawCredentials")]
pub struct Credentials {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct RawCredentials {
    username: String,
    password: String,
}

impl TryFrom<RawCredentials> for Credentials {
    type Error = TunnelError;

    fn try_from(raw: RawCredentials) -> Result<Self, Self::Error> {
        Credentials::new(raw.username, raw.password)
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, TunnelError> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() {
            return Err(TunnelError::Configuration("username must not be empty".to_string()));
        }
        if username.len() > MAX_CREDENTIAL_LEN || password.len() > MAX_CREDENTIAL_LEN {
            return Err(TunnelError::Configuration(format!(
                "credentials longer than {MAX_CREDENTIAL_LEN} bytes"
            )));
        }
        Ok(Self { username, password })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SSH endpoint the tunnel is carried through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SshEndpoint {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
}

impl SshEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            connect_timeout_ms: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Relay loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RelayOptions {
    /// Bounded wait for client readability, per iteration.
    pub poll_interval_ms: u64,
    pub buffer_size: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            buffer_size: DEFAULT_RELAY_BUFFER,
        }
    }
}

impl RelayOptions {
    pub fn poll_interval(&self) -> Duration {
        // A zero read timeout is rejected by the socket layer.
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.max(1)
    }
}

/// How many clients a listener serves before its worker exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerMode {
    /// Accept one client, relay it, then exit.
    #[default]
    SingleShot,
    /// Relay clients one after another until the process exits.
    Sequential,
}

/// Top-level tunnel configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TunnelConfig {
    pub credentials: Credentials,
    pub endpoint: SshEndpoint,
    #[serde(default)]
    pub relay: RelayOptions,
    #[serde(default)]
    pub mode: ListenerMode,
}

impl TunnelConfig {
    pub fn new(credentials: Credentials, endpoint: SshEndpoint) -> Self {
        Self {
            credentials,
            endpoint,
            relay: RelayOptions::default(),
            mode: ListenerMode::default(),
        }
    }

    /// Reads `SSHY_USER`, `SSHY_PASS`, `SSHY_HOST` and optionally `SSHY_PORT`.
    pub fn from_env() -> Result<Self, TunnelError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, TunnelError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| TunnelError::Configuration(format!("{key} is not set")))
        };

        let credentials = Credentials::new(required(ENV_USER)?, required(ENV_PASS)?)?;
        let mut endpoint = SshEndpoint::new(required(ENV_HOST)?);
        if let Some(port) = lookup(ENV_PORT) {
            endpoint.port = port
                .parse()
                .map_err(|_| TunnelError::Configuration(format!("{ENV_PORT} is not a port: {port}")))?;
        }

        Ok(Self::new(credentials, endpoint))
    }
}
