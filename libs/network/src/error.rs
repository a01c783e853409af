//! Transport Error Types
//!
//! Errors raised while binding listeners, accepting and tracking TCP
//! connections, and sending datagrams or stream writes to subscribers.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// Listener could not be bound
    #[error("Bind error: {endpoint}: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("Connection error: {message} (remote: {remote_addr:?})")]
    Connection {
        message: String,
        remote_addr: Option<SocketAddr>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Outgoing message could not be written
    #[error("Send error: {destination}: {source}")]
    Send {
        destination: String,
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("No TCP server registered on {addr}")]
    UnknownServer { addr: SocketAddr },

    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn bind(endpoint: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Bind {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub fn connection(message: impl Into<String>, remote_addr: Option<SocketAddr>) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: None,
        }
    }

    pub fn connection_with_source(
        message: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            remote_addr,
            source: Some(Box::new(source)),
        }
    }

    pub fn send(destination: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Send {
            destination: destination.to_string(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Short label for structured log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Connection { .. } => "connection",
            Self::Send { .. } => "send",
            Self::Configuration { .. } => "configuration",
            Self::UnknownServer { .. } => "unknown_server",
            Self::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            message: error.to_string(),
            source: error,
        }
    }
}
