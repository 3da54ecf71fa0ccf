//! The interface for identifying and connecting to Redis nodes.

use crate::backoff::Transient;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error("Timed out connecting to {0}")]
    Timeout(Backend),

    /// Any other failure of a [Connector] implemented outside this crate,
    /// such as loading credentials. Never retried.
    #[error(transparent)]
    Other(anyhow::Error),
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Io(err) => err.is_transient(),
            Error::Timeout(_) => true,
            Error::Redis(err) => err.is_transient(),
            Error::Other(_) => false,
        }
    }
}

/// A single Redis node, as reported by Sentinel.
#[derive(Clone, PartialEq, Eq, Debug, Hash, Ord, PartialOrd)]
pub struct Backend {
    pub host: Arc<str>,
    pub port: u16,
}

impl Backend {
    pub fn new(host: impl Into<Arc<str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<std::net::SocketAddr> for Backend {
    fn from(address: std::net::SocketAddr) -> Self {
        Self::new(address.ip().to_string(), address.port())
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Interface for raw connections.
pub trait Connection: Send + 'static {}

impl<T> Connection for T where T: Send + 'static {}

/// Describes how a connection to a Backend should be constructed.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Creates a connection to a backend.
    async fn connect(&self, backend: &Backend) -> Result<Self::Connection, Error>;
}

pub type SharedConnector<Conn> = Arc<dyn Connector<Connection = Conn>>;
