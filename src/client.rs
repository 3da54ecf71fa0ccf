//! A command-executing client backed by a [Pool] of Redis connections.

use crate::backoff::Transient;
use crate::command::{CommandArgs, CommandExecutor};
use crate::connectors::redis::RedisConnector;
use crate::policy::Policy;
use crate::pool::{self, Pool};
use crate::resolvers::sentinel::SentinelResolver;
use crate::service::Descriptor;

use async_trait::async_trait;
use redis::aio::Connection;
use redis::{Cmd, RedisError, RedisResult, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{event, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] pool::Error),

    #[error(transparent)]
    Command(#[from] RedisError),
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Pool(err) => err.is_transient(),
            Error::Command(err) => err.is_transient(),
        }
    }
}

fn timed_out() -> RedisError {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "command timed out").into()
}

/// Executes commands on connections claimed from a pool.
///
/// Cloning a client is cheap, and clones share the pool.
#[derive(Clone, Debug)]
pub struct Client {
    pool: Arc<Pool<Connection>>,
}

impl Client {
    pub fn new(pool: Pool<Connection>) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &Pool<Connection> {
        &self.pool
    }

    /// Executes `cmd`, bounded by `timeout` rather than the pool policy's
    /// command timeout.
    ///
    /// Meant for blocking commands such as `BRPOP`, which legitimately wait
    /// longer than any socket timeout.
    pub async fn execute_with_timeout(
        &self,
        cmd: &Cmd,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let mut conn = self.pool.claim().await?;
        let result: RedisResult<Value> = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.query_async(&mut *conn))
                .await
                .unwrap_or_else(|_| Err(timed_out())),
            None => cmd.query_async(&mut *conn).await,
        };

        match result {
            Ok(value) => {
                conn.release();
                Ok(value)
            }
            // The reply was read in full; the connection is still usable.
            Err(err) if !err.is_transient() => {
                conn.release();
                Err(err.into())
            }
            Err(err) => {
                // Idle connections to the same node are most likely broken
                // too.
                event!(
                    Level::WARN,
                    backend = %conn.backend(),
                    cmd = ?CommandArgs(cmd),
                    err = %err,
                    "Closing connections after failed command"
                );
                conn.discard();
                self.pool.disconnect();
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl CommandExecutor for Client {
    type Error = Error;

    async fn execute_command(&self, cmd: &Cmd) -> Result<Value, Self::Error> {
        self.execute_with_timeout(cmd, self.pool.policy().command_timeout)
            .await
    }
}

/// Builds a client for the master of `descriptor`, found through its
/// sentinels.
///
/// With the default [Policy], the client's pool is sticky: it resolves the
/// master once, and reports connection errors rather than following a
/// failover.
pub fn client_via_sentinel(descriptor: &Descriptor, policy: Policy) -> Client {
    let resolver = Box::new(SentinelResolver::new(descriptor));
    let connector = Arc::new(RedisConnector::for_service(descriptor));
    let pool = Pool::new(
        format!("sentinel/{}", descriptor.name),
        resolver,
        connector,
        policy,
    )
    .unwrap_or_else(|err| {
        event!(Level::WARN, err = %err, "Continuing without probes");
        err.into_inner()
    });
    Client::new(pool)
}

#[cfg(test)]
mod test {
    use super::*;

    use crate::backoff::RetryPolicy;
    use crate::command::Ensured;
    use crate::policy::Failover;
    use crate::service::Endpoint;
    use crate::test_utils::{reply, setup_tracing_subscriber, FakeRedis};
    use std::net::SocketAddr;
    use std::sync::Mutex;

    fn descriptor(sentinel: &FakeRedis) -> Descriptor {
        Descriptor::new("mymaster", [Endpoint::from(sentinel.address())])
            .with_socket_timeout(Duration::from_secs(1))
    }

    fn master(addr: SocketAddr) -> Arc<Mutex<Option<SocketAddr>>> {
        Arc::new(Mutex::new(Some(addr)))
    }

    #[tokio::test]
    async fn commands_reuse_the_pooled_connection() {
        let node = FakeRedis::data_node().await;
        let sentinel = FakeRedis::sentinel(master(node.address())).await;
        let client = client_via_sentinel(&descriptor(&sentinel), Policy::default());

        for _ in 0..2 {
            let pong: String = client.query(&redis::cmd("PING")).await.unwrap();
            assert_eq!(pong, "PONG");
        }

        assert_eq!(node.connections_accepted(), 1);
        assert_eq!(node.count("PING"), 2);
        assert_eq!(sentinel.count("SENTINEL"), 1);
        assert_eq!(client.pool().idle_connections(), 1);
    }

    #[tokio::test]
    async fn command_errors_keep_the_connection() {
        let node = FakeRedis::start(|cmd| match cmd[0].as_str() {
            "INCR" => reply::error("WRONGTYPE Operation against a key holding the wrong kind of value"),
            _ => reply::simple("OK"),
        })
        .await;
        let sentinel = FakeRedis::sentinel(master(node.address())).await;
        let client = client_via_sentinel(&descriptor(&sentinel), Policy::default());

        let err = client
            .execute_command(redis::cmd("INCR").arg("key"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Command(_)), "Unexpected error: {err:?}");
        assert!(!err.is_transient());
        assert_eq!(client.pool().idle_connections(), 1);
    }

    #[tokio::test]
    async fn timed_out_connections_are_discarded() {
        // Never answers BLPOP.
        let node = FakeRedis::start(|cmd| match cmd[0].as_str() {
            "BLPOP" => vec![],
            _ => reply::simple("OK"),
        })
        .await;
        let sentinel = FakeRedis::sentinel(master(node.address())).await;
        let policy = Policy {
            command_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let client = client_via_sentinel(&descriptor(&sentinel), policy);

        let err = client
            .execute_command(redis::cmd("BLPOP").arg("queue").arg(0))
            .await
            .unwrap_err();

        let Error::Command(err) = err else {
            panic!("Unexpected error: {err:?}");
        };
        assert!(err.is_timeout());
        assert_eq!(client.pool().idle_connections(), 0);
    }

    #[tokio::test]
    async fn cancelled_commands_do_not_leak_their_reply() {
        let node = FakeRedis::start(|cmd| match cmd[0].as_str() {
            "SLOW" => reply::simple("FIRST"),
            "PING" => reply::simple("PONG"),
            _ => reply::simple("OK"),
        })
        .await;
        node.delay_replies_to("SLOW", Duration::from_millis(300));
        let sentinel = FakeRedis::sentinel(master(node.address())).await;
        let client = client_via_sentinel(&descriptor(&sentinel), Policy::default());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            client.execute_command(&redis::cmd("SLOW")),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(client.pool().idle_connections(), 0);

        let pong: String = client.query(&redis::cmd("PING")).await.unwrap();
        assert_eq!(pong, "PONG");
        assert_eq!(node.connections_accepted(), 2);
    }

    #[tokio::test]
    async fn following_client_drops_idle_connections_to_old_master() {
        setup_tracing_subscriber();

        let old_node = FakeRedis::data_node().await;
        let new_node = FakeRedis::data_node().await;
        let current = master(old_node.address());
        let sentinel = FakeRedis::sentinel(current.clone()).await;

        let policy = Policy {
            failover: Failover::Follow,
            ..Default::default()
        };
        let client = client_via_sentinel(&descriptor(&sentinel), policy);

        // Fill the idle list with connections to the old master.
        let mut handles = vec![];
        for _ in 0..6 {
            handles.push(client.pool().claim().await.unwrap());
        }
        for handle in handles {
            handle.release();
        }
        assert_eq!(client.pool().idle_connections(), 6);

        old_node.stop().await;
        *current.lock().unwrap() = Some(new_node.address());

        // One failure on a severed connection, then a fresh resolution.
        let client = Ensured::with_policy(
            client,
            RetryPolicy::new(1).with_unit(Duration::from_millis(10)),
        );
        let pong: String = client.query(&redis::cmd("PING")).await.unwrap();
        assert_eq!(pong, "PONG");
        assert_eq!(new_node.connections_accepted(), 1);
    }

    // The retry layer waits out a failover, but the sticky pool underneath
    // never moves to the new master.
    #[tokio::test]
    async fn retries_do_not_follow_failover() {
        setup_tracing_subscriber();

        let old_node = FakeRedis::data_node().await;
        let new_node = FakeRedis::data_node().await;
        let current = master(old_node.address());
        let sentinel = FakeRedis::sentinel(current.clone()).await;

        let client = Ensured::with_policy(
            client_via_sentinel(&descriptor(&sentinel), Policy::default()),
            RetryPolicy::new(2).with_unit(Duration::from_millis(10)),
        );
        let _: String = client.query(&redis::cmd("PING")).await.unwrap();

        old_node.stop().await;
        *current.lock().unwrap() = Some(new_node.address());

        let err = client
            .execute_command(&redis::cmd("PING"))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "Unexpected error: {err:?}");
        assert_eq!(sentinel.count("SENTINEL"), 1);
        assert_eq!(new_node.connections_accepted(), 0);
    }
}
