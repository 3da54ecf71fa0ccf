//! Configuration options which can alter the behavior of the pool.

use crate::backoff::RetryPolicy;

use std::time::Duration;

/// How a pool reacts when Sentinel promotes a different master.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Failover {
    /// Resolve the master once, and keep using that address for the lifetime
    /// of the pool.
    ///
    /// Once the old master stops accepting connections, every claim fails
    /// with a connection error. This is what a long-poll consumer needs: it
    /// can only notice the failover through such an error, after which it
    /// discards the pool and builds a new one.
    #[default]
    Sticky,

    /// Resolve the master again whenever a new connection is opened,
    /// transparently following failovers.
    Follow,
}

/// Policy which is applicable to a connection pool and its clients.
#[derive(Clone, Debug)]
pub struct Policy {
    /// Whether the pool follows the master across failovers.
    pub failover: Failover,

    /// Retries applied by [crate::command::Ensured] and
    /// [crate::task::EnsuredTask] wrappers built from this policy.
    pub retry: RetryPolicy,

    /// The maximum number of connections kept open while unclaimed.
    pub max_idle_connections: usize,

    /// Bounds each command executed by a [crate::client::Client], if set.
    ///
    /// Blocking reads should be given their own, longer, timeout.
    pub command_timeout: Option<Duration>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failover: Failover::Sticky,
            retry: RetryPolicy::default(),
            max_idle_connections: 8,
            command_timeout: None,
        }
    }
}
