//! A client which connects, runs one command, and disconnects.
//!
//! Sentinel traffic is infrequent: a sentinel is asked for the master
//! address once per pool. Keeping idle connections open to every sentinel
//! wastes file descriptors on both sides, and connections which sit idle
//! behind a firewall may be reaped without the server noticing, until the
//! server's connection limit is reached. [ShortLivedClient] never keeps a
//! connection beyond the command it was opened for.

use crate::command::{CommandArgs, CommandExecutor};
use crate::service::Endpoint;

use async_trait::async_trait;
use redis::aio::Connection;
use redis::{Client, Cmd, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisError, Value};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{event, Level};

/// A command-executing client bound to one endpoint, which releases its
/// connection after every command, successful or not.
pub struct ShortLivedClient {
    endpoint: Endpoint,
    info: ConnectionInfo,
    socket_timeout: Duration,

    // Holds a connection only while a command is executing.
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for ShortLivedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortLivedClient")
            .field("endpoint", &self.endpoint)
            .field("socket_timeout", &self.socket_timeout)
            .finish_non_exhaustive()
    }
}

// Drops the connection when the command completes, fails, or is cancelled.
struct Release<'a>(MutexGuard<'a, Option<Connection>>);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        *self.0 = None;
    }
}

fn timed_out() -> RedisError {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "socket timeout").into()
}

impl ShortLivedClient {
    /// Creates a client for `endpoint`.
    ///
    /// `socket_timeout` bounds both connecting and awaiting the reply.
    /// No connection is made until a command is executed.
    pub fn new(endpoint: Endpoint, socket_timeout: Duration) -> Self {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(endpoint.host.to_string(), endpoint.port),
            redis: RedisConnectionInfo {
                db: 0,
                username: None,
                password: None,
            },
        };
        Self {
            endpoint,
            info,
            socket_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns true while a command is holding a connection open.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    async fn execute_on(&self, slot: &mut Option<Connection>, cmd: &Cmd) -> Result<Value, RedisError> {
        let conn = match slot.take() {
            Some(conn) => conn,
            None => {
                let client = Client::open(self.info.clone())?;
                tokio::time::timeout(self.socket_timeout, client.get_async_connection())
                    .await
                    .map_err(|_| timed_out())??
            }
        };
        let conn = slot.insert(conn);
        tokio::time::timeout(self.socket_timeout, cmd.query_async(conn))
            .await
            .map_err(|_| timed_out())?
    }
}

#[async_trait]
impl CommandExecutor for ShortLivedClient {
    type Error = RedisError;

    async fn execute_command(&self, cmd: &Cmd) -> Result<Value, Self::Error> {
        let mut release = Release(self.conn.lock().await);
        let result = self.execute_on(&mut release.0, cmd).await;
        drop(release);

        if let Err(err) = &result {
            event!(
                Level::DEBUG,
                endpoint = %self.endpoint,
                cmd = ?CommandArgs(cmd),
                err = %err,
                "Short-lived command failed"
            );
        }
        result
    }
}
