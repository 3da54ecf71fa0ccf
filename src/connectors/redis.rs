//! Implementation of [Connector] for Redis data-plane connections.

use crate::backend::{self, Backend, Error};
use crate::service;

use ::redis::aio::Connection;
use ::redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use async_trait::async_trait;
use std::time::Duration;

/// Connects to Redis nodes with a fixed database, password and connect
/// timeout.
#[derive(Clone, Debug)]
pub struct RedisConnector {
    db: i64,
    password: Option<String>,
    connect_timeout: Duration,
}

impl RedisConnector {
    pub fn new(db: i64, password: Option<String>, connect_timeout: Duration) -> Self {
        Self {
            db,
            password,
            connect_timeout,
        }
    }

    /// Builds a connector matching the data-plane settings of a service.
    pub fn for_service(descriptor: &service::Descriptor) -> Self {
        Self::new(
            descriptor.db,
            descriptor.password.clone(),
            descriptor.socket_timeout,
        )
    }

    fn connection_info(&self, backend: &Backend) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(backend.host.to_string(), backend.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: None,
                password: self.password.clone(),
            },
        }
    }
}

#[async_trait]
impl backend::Connector for RedisConnector {
    type Connection = Connection;

    async fn connect(&self, backend: &Backend) -> Result<Self::Connection, Error> {
        let client = Client::open(self.connection_info(backend))?;
        tokio::time::timeout(self.connect_timeout, client.get_async_connection())
            .await
            .map_err(|_| Error::Timeout(backend.clone()))?
            .map_err(|e| e.into())
    }
}
