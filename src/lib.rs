//! sticky-sentinel provides failover-aware connectivity to a Redis deployment
//! managed by Redis Sentinel.
//!
//! It is built for task queue clients which hold long-lived sockets for
//! blocking reads. Such a consumer must *notice* a master failover rather
//! than silently survive it, so the connection pool deliberately refuses to
//! follow a new master mid-session.
//!
//! It uses the following terminology:
//! * Services are named master/replica sets monitored by Sentinel.
//! * Backends are specific Redis nodes. For a service, the backend of
//!   interest is whichever node Sentinel currently reports as master.
//!
//! # Usage
//!
//! * The main interface for this crate is [client::Client], usually built
//!   with [client::client_via_sentinel].
//! * Wrap any [command::CommandExecutor] in [command::Ensured] to retry
//!   transient failures with exponential backoff.
//! * [transport] offers a thin adapter for task queue frameworks: each
//!   [transport::Channel] owns its own sticky pool, and recovering from a
//!   failover means creating a new channel.
//!
//! # Failover model
//!
//! A [pool::Pool] in [policy::Failover::Sticky] mode resolves the master
//! address once and keeps it for its entire lifetime. When that node stops
//! being master, connection attempts fail outright and the error is surfaced
//! to the caller. Re-resolution only happens in a brand-new pool.
//!
//! # DTrace probes
//!
//! The crate contains a number of DTrace USDT probes, which fire as the pool
//! resolves its master and hands out connections:
//!
//! - `resolve-start`: Fires before asking the sentinels for a master.
//! - `resolve-done`: Fires after a sentinel reported the master address.
//! - `resolve-failed`: Fires when no sentinel could report a master.
//! - `connect-start`: Fires before attempting a connection to a backend.
//! - `connect-done`: Fires after successfully connecting to a backend.
//! - `connect-failed`: Fires after failing to connect to a backend.
//! - `claim-start`: Fires before attempting to take a claim from the pool.
//! - `claim-done`: Fires before returning a successful claim to the client.
//! - `claim-failed`: Fires on failure to take a claim from the pool.
//! - `retry`: Fires before waiting to retry a failed operation.
//!
//! The existence of the probes is behind the `"probes"` feature, which is
//! enabled by default. As with any USDT provider, registration is fallible,
//! so [pool::Pool::new] returns a [pool::RegistrationError] from which the
//! pool can still be extracted.

// Public API
pub mod backend;
pub mod backoff;
pub mod claim;
pub mod client;
pub mod command;
pub mod discovery;
pub mod policy;
pub mod pool;
pub mod resolver;
pub mod service;
pub mod task;
pub mod transport;

#[cfg(test)]
mod test_utils;

// Default implementations of generic interfaces
pub mod connectors;
pub mod resolvers;

use std::sync::atomic::{AtomicU64, Ordering};

/// Uniquely identifies a claim
#[derive(Copy, Clone, Debug)]
pub(crate) struct ClaimId(pub u64);

impl ClaimId {
    fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ClaimId {
    fn default() -> Self {
        Self::new()
    }
}

/// USDT probes for tracing how pools resolve masters and hand out claims.
#[cfg(feature = "probes")]
#[usdt::provider(provider = "sticky_sentinel")]
mod probes {
    /// Fires right before querying the sentinels for the master of a service.
    fn resolve__start(service: &str) {}

    /// Fires when a sentinel reported the master address for a service.
    fn resolve__done(service: &str, sentinel: &str, addr: &str) {}

    /// Fires when no sentinel could report a master for a service.
    fn resolve__failed(service: &str) {}

    /// Fires right before attempting to make a connection, with the address
    /// we're connecting to.
    fn connect__start(pool: &str, addr: &str) {}

    /// Fires just after successfully making a connection.
    fn connect__done(pool: &str, addr: &str) {}

    /// Fires just after failing to make a connection, with a string
    /// identifying the reason.
    fn connect__failed(pool: &str, addr: &str, reason: &str) {}

    /// Fires right before attempting to acquire a claim from the pool.
    fn claim__start(pool: &str, claim_id: u64) {}

    /// Fires when a claim is successfully acquired from the pool.
    fn claim__done(pool: &str, claim_id: u64) {}

    /// Fires when we _fail_ to acquire a claim from the pool, with a string
    /// identifying the reason.
    fn claim__failed(pool: &str, claim_id: u64, reason: &str) {}

    /// Fires before sleeping ahead of a retry, with the attempt index and the
    /// wait in milliseconds.
    fn retry(operation: &str, attempt: u32, wait_ms: u64) {}
}
