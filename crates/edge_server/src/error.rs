//! Server error types

use std::net::SocketAddr;

use framing::FramingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("failed to bind {host}:{port}: {source}")]
    Bind {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Connection-level IO failure
    #[error("connection {peer}: {source}")]
    Connection {
        peer: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Unrecoverable protocol error, connection closed
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Accept loop task failed
    #[error("server task failed: {message}")]
    Join { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn connection(peer: SocketAddr, source: std::io::Error) -> Self {
        Self::Connection { peer, source }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
