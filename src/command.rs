//! Executing Redis commands, with or without retries.

use crate::backoff::{self, RetryPolicy, Transient};

use async_trait::async_trait;
use redis::{Arg, Cmd, FromRedisValue, RedisError, Value};
use std::borrow::Cow;
use std::fmt;

/// Anything which can execute a single Redis command and return its reply.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    type Error: Transient + From<RedisError> + fmt::Display + fmt::Debug + Send;

    /// Executes `cmd`, returning the raw reply.
    async fn execute_command(&self, cmd: &Cmd) -> Result<Value, Self::Error>;

    /// Executes `cmd`, converting the reply into `T`.
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, Self::Error> {
        let value = self.execute_command(cmd).await?;
        Ok(redis::from_redis_value(&value)?)
    }
}

/// Renders the arguments of a command for diagnostics.
pub(crate) struct CommandArgs<'a>(pub &'a Cmd);

impl fmt::Debug for CommandArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.0.args_iter().map(|arg| match arg {
                Arg::Simple(bytes) => String::from_utf8_lossy(bytes),
                Arg::Cursor => Cow::Borrowed("<cursor>"),
            }))
            .finish()
    }
}

/// Routes every command of an inner executor through [backoff::ensure].
///
/// This is how retries are added to the broker client, the task submission
/// client and the results client alike: wrap the plain executor rather than
/// changing it.
///
/// ```no_run
/// use sticky_sentinel::command::{CommandExecutor, Ensured};
/// use sticky_sentinel::client::client_via_sentinel;
/// use sticky_sentinel::policy::Policy;
/// use sticky_sentinel::service::{Descriptor, Endpoint};
///
/// # async {
/// let descriptor = Descriptor::new("mymaster", [Endpoint::new("10.0.0.1", 26379)]);
/// let client = Ensured::new(client_via_sentinel(&descriptor, Policy::default()));
/// let len: i64 = client.query(&redis::cmd("LLEN").arg("celery")).await.unwrap();
/// # };
/// ```
#[derive(Clone, Debug)]
pub struct Ensured<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E> Ensured<E> {
    /// Wraps `inner`, retrying with the default [RetryPolicy].
    pub fn new(inner: E) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

#[async_trait]
impl<E: CommandExecutor> CommandExecutor for Ensured<E> {
    type Error = E::Error;

    async fn execute_command(&self, cmd: &Cmd) -> Result<Value, Self::Error> {
        backoff::ensure(&self.policy, "execute_command", &CommandArgs(cmd), || {
            self.inner.execute_command(cmd)
        })
        .await
    }
}
