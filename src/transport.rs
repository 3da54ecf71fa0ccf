//! A thin adapter for task queue frameworks.
//!
//! A [Transport] is built once from configuration. The framework asks it for
//! a [Channel] per broker session; the channel owns its own sticky pool.
//! When a channel reports a connection error, the framework is expected to
//! drop it and ask the transport for a new one, which resolves the master
//! afresh.
//!
//! Results, unlike the broker's long-poll path, are read and written through
//! [Transport::result_client], which follows failovers and retries.

use crate::backend::Backend;
use crate::client::{self, client_via_sentinel, Client};
use crate::command::Ensured;
use crate::policy::{Failover, Policy};
use crate::pool;
use crate::service::{Descriptor, Endpoint};

use redis::Value;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{event, instrument, Level};

/// Transport options, as found in a framework's configuration.
///
/// ```
/// # #[cfg(feature = "serde")]
/// # {
/// use sticky_sentinel::transport::TransportOptions;
///
/// let options: TransportOptions = serde_json::from_str(r#"{
///     "sentinels": [["192.168.1.1", 26379], ["192.168.1.2", 26379]],
///     "service_name": "master",
///     "socket_timeout": 0.1
/// }"#).unwrap();
/// # }
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
pub struct TransportOptions {
    pub sentinels: Vec<Endpoint>,
    pub service_name: String,

    /// Written in (possibly fractional) seconds.
    #[cfg_attr(
        feature = "serde",
        serde(default = "default_socket_timeout", deserialize_with = "seconds")
    )]
    pub socket_timeout: Duration,

    #[cfg_attr(feature = "serde", serde(default))]
    pub db: i64,

    #[cfg_attr(feature = "serde", serde(default))]
    pub password: Option<String>,
}

#[cfg(feature = "serde")]
fn default_socket_timeout() -> Duration {
    crate::service::DEFAULT_SOCKET_TIMEOUT
}

#[cfg(feature = "serde")]
fn seconds<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    use serde::Deserialize;

    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
}

impl TransportOptions {
    pub fn into_descriptor(self) -> Descriptor {
        let descriptor = Descriptor::new(self.service_name, self.sentinels)
            .with_socket_timeout(self.socket_timeout)
            .with_db(self.db);
        match self.password {
            Some(password) => descriptor.with_password(password),
            None => descriptor,
        }
    }
}

/// Hands out channels and clients for one Sentinel-managed service.
#[derive(Clone, Debug)]
pub struct Transport {
    descriptor: Descriptor,
    policy: Policy,
}

impl Transport {
    pub fn new(descriptor: Descriptor, policy: Policy) -> Self {
        Self { descriptor, policy }
    }

    pub fn from_options(options: TransportOptions) -> Self {
        Self::new(options.into_descriptor(), Policy::default())
    }

    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Creates a new channel, with a new sticky pool.
    ///
    /// Nothing is resolved until the channel is first used.
    pub fn channel(&self) -> Channel {
        Channel {
            descriptor: self.descriptor.clone(),
            policy: Policy {
                failover: Failover::Sticky,
                ..self.policy.clone()
            },
            client: OnceCell::new(),
        }
    }

    /// Creates a client for storing and fetching task results.
    ///
    /// Its pool follows the master across failovers, and every command is
    /// retried according to the transport's retry policy.
    pub fn result_client(&self) -> Ensured<Client> {
        let policy = Policy {
            failover: Failover::Follow,
            ..self.policy.clone()
        };
        let retry = policy.retry.clone();
        Ensured::with_policy(client_via_sentinel(&self.descriptor, policy), retry)
    }
}

/// One broker session, pinned to the master it first connected to.
///
/// Commands on a channel are never retried: a failover must surface as an
/// error so that the owner of the channel replaces it.
#[derive(Debug)]
pub struct Channel {
    descriptor: Descriptor,
    policy: Policy,
    client: OnceCell<Client>,
}

impl Channel {
    /// Returns the channel's client, resolving the master on first use.
    pub async fn client(&self) -> Result<&Client, pool::Error> {
        self.client
            .get_or_try_init(|| async {
                let client = client_via_sentinel(&self.descriptor, self.policy.clone());
                let master = client.pool().master_address().await?;
                event!(
                    Level::INFO,
                    service = %self.descriptor.name,
                    master = %master,
                    "Connected to master"
                );
                Ok::<_, pool::Error>(client)
            })
            .await
    }

    /// The master this channel is pinned to, once it has been resolved.
    pub fn connected_to(&self) -> Option<&Backend> {
        self.client.get().and_then(|client| client.pool().cached_master())
    }

    /// Pushes `body` onto `queue`, returning the length of the queue.
    #[instrument(level = "debug", skip(self, body), err)]
    pub async fn put(&self, queue: &str, body: &[u8]) -> Result<i64, client::Error> {
        let client = self.client().await?;
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(queue).arg(body);
        let len = client
            .execute_with_timeout(&cmd, Some(self.descriptor.socket_timeout))
            .await?;
        Ok(redis::from_redis_value(&len)?)
    }

    /// Pops a message from the first non-empty queue of `queues`, waiting up
    /// to `timeout` (rounded up to a whole second) for one to arrive.
    ///
    /// Returns the queue name and the message body, or `None` if the wait
    /// elapsed.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn get_blocking(
        &self,
        queues: &[&str],
        timeout: Duration,
    ) -> Result<Option<(String, Vec<u8>)>, client::Error> {
        let client = self.client().await?;
        let secs = (timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)).max(1);
        let mut cmd = redis::cmd("BRPOP");
        for queue in queues {
            cmd.arg(*queue);
        }
        cmd.arg(secs);

        // The server answers after at most `secs`; allow for the round trip.
        let reply: Value = client
            .execute_with_timeout(
                &cmd,
                Some(Duration::from_secs(secs) + self.descriptor.socket_timeout),
            )
            .await?;
        Ok(redis::from_redis_value(&reply)?)
    }
}
