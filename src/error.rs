// MIT License - Copyright (c) 2026 Peter Wright
// WattBox integration protocol client

use crate::connection::ConnectionState;

/// All errors that can occur in the wattbox-client library.
#[derive(Debug, thiserror::Error)]
pub enum WattBoxError {
    /// The device could not be reached (refused, unreachable, connect timeout).
    #[error("Cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Credentials were rejected by the device. Not retried automatically.
    #[error("Authentication rejected after {attempts} attempt(s)")]
    Auth { attempts: u32 },

    /// No response arrived before the deadline.
    #[error("Timeout waiting for response to {command}")]
    Timeout { command: String },

    /// The device answered `#Error` for a command.
    #[error("Device rejected command: {command}")]
    Device { command: String },

    /// The peer closed the connection.
    #[error("Connection closed by device")]
    Closed,

    /// Writing to the socket failed (broken pipe, reset).
    #[error("Write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unexpected or malformed line arrived while a response was expected.
    #[error("Protocol error on {command}: {details}")]
    Protocol { command: String, details: String },

    /// The connection could not reach `Ready` in time, or has stopped.
    #[error("Connection not ready (state: {state})")]
    NotReady { state: ConnectionState },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("TLS error: {0}")]
    Tls(String),

    /// A response was well-formed on the wire but its payload could not be parsed.
    #[error("Invalid response: {details}")]
    InvalidResponse { details: String },
}

impl WattBoxError {
    /// Whether this error is transient and the connection should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WattBoxError::Connect { .. }
                | WattBoxError::Timeout { .. }
                | WattBoxError::Closed
                | WattBoxError::Write(_)
                | WattBoxError::Io(_)
        )
    }

    /// Whether this error means the wire can no longer be trusted and the
    /// session has to be torn down.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            WattBoxError::Closed | WattBoxError::Write(_) | WattBoxError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WattBoxError>;
