// MIT License - Copyright (c) 2026 Peter Wright
// WattBox client configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_ENCRYPTED_PORT, DEFAULT_PASSWORD, DEFAULT_TELNET_PORT, DEFAULT_USERNAME,
    LOGIN_PROMPTS, PASSWORD_PROMPTS, REJECTION_MARKERS, SUCCESS_BANNERS,
};

/// Stream the integration protocol is carried over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Plain TCP with telnet option negotiation (default port 23)
    #[default]
    Telnet,
    /// TLS (default port 992)
    Encrypted,
}

impl TransportKind {
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Telnet => DEFAULT_TELNET_PORT,
            Self::Encrypted => DEFAULT_ENCRYPTED_PORT,
        }
    }
}

/// Login handshake settings.
///
/// Firmware revisions word their prompts differently, so all of the text
/// the handshake looks for can be overridden. Matching is a
/// case-insensitive substring test.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub login_prompts: Vec<String>,
    pub password_prompts: Vec<String>,
    /// Text that means the credentials were refused.
    pub rejection_markers: Vec<String>,
    /// Text that confirms a successful login.
    pub success_banners: Vec<String>,
    /// Rejections tolerated before giving up (default: 3)
    pub max_attempts: u32,
    /// How long to wait for each prompt (default: 10s)
    pub prompt_timeout: Duration,
    /// Quiet period after the password that counts as acceptance (default: 1s)
    pub success_grace: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_prompts: owned(LOGIN_PROMPTS),
            password_prompts: owned(PASSWORD_PROMPTS),
            rejection_markers: owned(REJECTION_MARKERS),
            success_banners: owned(SUCCESS_BANNERS),
            max_attempts: 3,
            prompt_timeout: Duration::from_secs(10),
            success_grace: Duration::from_secs(1),
        }
    }
}

/// TLS settings for [`TransportKind::Encrypted`].
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Name to verify the certificate against (default: the host)
    pub server_name: Option<String>,
    /// PEM file with extra trust anchors, e.g. the device's self-signed CA
    pub ca_cert: Option<PathBuf>,
    /// Skip certificate verification entirely
    pub accept_invalid_certs: bool,
}

/// Configuration for connecting to a WattBox.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device host name or IP address
    pub host: String,
    /// Device port (default: 23 for telnet, 992 for encrypted)
    pub port: Option<u16>,
    pub transport: TransportKind,
    /// Integration user (default: wattbox)
    pub username: String,
    /// Integration password (default: wattbox)
    pub password: String,
    /// Per-command response deadline (default: 10s)
    pub command_timeout: Duration,
    /// TCP/TLS connect deadline; also bounds `connect()` waiting for Ready (default: 10s)
    pub connect_timeout: Duration,
    /// Base delay for exponential reconnect backoff (default: 1s)
    pub reconnect_base_delay: Duration,
    /// Backoff cap (default: 60s)
    pub max_reconnect_backoff: Duration,
    /// Consecutive failed connection attempts before giving up (None = retry forever)
    pub max_connect_attempts: Option<u32>,
    pub auth: AuthConfig,
    pub tls: TlsConfig,
    /// Depth of the request queue
    pub queue_capacity: usize,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: None,
            transport: TransportKind::Telnet,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            command_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_backoff: Duration::from_secs(60),
            max_connect_attempts: None,
            auth: AuthConfig::default(),
            tls: TlsConfig::default(),
            queue_capacity: 64,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// The port to connect to, falling back to the transport's default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port())
    }
}

/// Builder for ClientConfig.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.config.transport = transport;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_base_delay = delay;
        self
    }

    pub fn max_reconnect_backoff(mut self, cap: Duration) -> Self {
        self.config.max_reconnect_backoff = cap;
        self
    }

    pub fn max_connect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_connect_attempts = Some(attempts);
        self
    }

    pub fn auth(mut self, auth: AuthConfig) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn max_auth_attempts(mut self, attempts: u32) -> Self {
        self.config.auth.max_attempts = attempts;
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.config.tls = tls;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity.max(1);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
