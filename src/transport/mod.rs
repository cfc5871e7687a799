// MIT License - Copyright (c) 2026 Peter Wright
// Byte-stream transports for the integration protocol

pub mod session;
pub mod tcp;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::{ClientConfig, TransportKind};
use crate::error::Result;

pub use session::Session;
pub use tcp::{TcpConnector, TlsConnector};

/// Any bidirectional async byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

pub type ConnectFuture<'a> = Pin<Box<dyn Future<Output = Result<BoxedStream>> + Send + 'a>>;

/// Opens a fresh stream to the device. Called once per connection attempt.
///
/// Implemented for plain TCP and TLS; tests plug in in-memory streams.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> ConnectFuture<'_>;

    /// Human-readable endpoint, used in logs and errors.
    fn describe(&self) -> String;
}

/// Build the connector matching `config.transport`.
pub fn connector_for(config: &ClientConfig) -> Result<Arc<dyn Connector>> {
    Ok(match config.transport {
        TransportKind::Telnet => Arc::new(TcpConnector::new(
            config.address(),
            config.connect_timeout,
        )),
        TransportKind::Encrypted => Arc::new(TlsConnector::new(
            &config.host,
            config.port(),
            &config.tls,
            config.connect_timeout,
        )?),
    })
}
