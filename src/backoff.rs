//! Retrying fallible network operations with exponential backoff.

#[cfg(feature = "probes")]
use crate::probes;

use std::fmt;
use std::future::Future;
use tokio::time::Duration;
use tracing::{event, Level};

pub trait ExponentialBackoff: Sized {
    fn exponential_backoff(&self) -> Self;
}

impl ExponentialBackoff for Duration {
    fn exponential_backoff(&self) -> Self {
        self.saturating_mul(2)
    }
}

/// Classifies failures which may resolve themselves after a short wait.
///
/// Connection failures and timeouts are transient. Protocol or logic errors,
/// such as a malformed command or a wrong data type, are not.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for redis::RedisError {
    fn is_transient(&self) -> bool {
        self.is_io_error()
            || self.is_timeout()
            || self.is_connection_dropped()
            || self.is_connection_refusal()
            // The node we are talking to was demoted to a replica.
            || self.kind() == redis::ErrorKind::ReadOnly
    }
}

impl Transient for std::io::Error {
    fn is_transient(&self) -> bool {
        use std::io::ErrorKind::*;
        matches!(
            self.kind(),
            ConnectionRefused
                | ConnectionReset
                | ConnectionAborted
                | NotConnected
                | BrokenPipe
                | TimedOut
                | UnexpectedEof
                | WouldBlock
                | Interrupted
        )
    }
}

/// How many times, and how patiently, a failed operation is reattempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first failure.
    ///
    /// With the default of 5, the waits are 1, 2, 4, 8 and 16 units, for a
    /// total of 31 units before the last failure is returned. Zero means the
    /// first failure is returned immediately.
    pub attempts: u32,

    /// The wait before the first retry. Doubles with every retry.
    pub unit: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            unit: Duration::from_secs(1),
        }
    }
}

/// Executes `f`, retrying transient failures according to `policy`.
///
/// - On success, the value is returned immediately.
/// - On a transient failure with retries left, waits `unit * 2^i` (`i`
///   counting from zero) and calls `f` again.
/// - The last transient failure, and any non-transient failure, is returned
///   unchanged.
///
/// The wait occupies the calling task for its whole duration; there is no
/// way to cut it short other than dropping the returned future.
///
/// `operation` and `args` only serve to identify the call in the diagnostic
/// emitted before each retry.
pub async fn ensure<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    args: &(dyn fmt::Debug + Sync),
    mut f: F,
) -> Result<T, E>
where
    E: Transient + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut wait = policy.unit;
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                event!(
                    Level::WARN,
                    operation,
                    args = ?args,
                    wait = ?wait,
                    error_type = std::any::type_name::<E>(),
                    error = %err,
                    "Will reattempt to execute {operation} with args={args:?} after {wait:?} \
                     due to exception {}: {err}",
                    std::any::type_name::<E>(),
                );
                #[cfg(feature = "probes")]
                probes::retry!(|| (
                    operation,
                    attempt,
                    u64::try_from(wait.as_millis()).unwrap_or(u64::MAX)
                ));
                tokio::time::sleep(wait).await;
                wait = wait.exponential_backoff();
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
