//! Submitting tasks to a queue, with or without retries.

use crate::backoff::{self, RetryPolicy, Transient};
use crate::command::CommandExecutor;

use async_trait::async_trait;
use std::fmt;

/// Anything which hands a task over to a queue.
///
/// This is the seam at which a task queue framework plugs in its own
/// submission path; [ListSubmitter] is a minimal implementation.
#[async_trait]
pub trait Submit: Send + Sync {
    type Request: fmt::Debug + Send + Sync;
    type Receipt: Send;
    type Error: Transient + fmt::Display + Send;

    async fn submit(&self, request: &Self::Request) -> Result<Self::Receipt, Self::Error>;
}

/// Routes every submission of an inner [Submit] through [backoff::ensure].
///
/// The retry wraps the whole submission, not its individual commands, so a
/// submission which fails halfway may be repeated from the start.
#[derive(Clone, Debug)]
pub struct EnsuredTask<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> EnsuredTask<S> {
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: Submit> Submit for EnsuredTask<S> {
    type Request = S::Request;
    type Receipt = S::Receipt;
    type Error = S::Error;

    async fn submit(&self, request: &Self::Request) -> Result<Self::Receipt, Self::Error> {
        backoff::ensure(&self.policy, "submit", request, || self.inner.submit(request)).await
    }
}

/// A serialized task, addressed to a queue.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    pub queue: String,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn new(queue: impl ToString, body: impl Into<Vec<u8>>) -> Self {
        Self {
            queue: queue.to_string(),
            body: body.into(),
        }
    }
}

// Bodies can be large; they are summarized rather than printed.
impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("queue", &self.queue)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Submits envelopes by pushing their body onto the list named by the queue.
///
/// The receipt is the length of the list after the push.
#[derive(Clone, Debug)]
pub struct ListSubmitter<E> {
    executor: E,
}

impl<E> ListSubmitter<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

#[async_trait]
impl<E: CommandExecutor> Submit for ListSubmitter<E> {
    type Request = Envelope;
    type Receipt = i64;
    type Error = E::Error;

    async fn submit(&self, envelope: &Envelope) -> Result<i64, E::Error> {
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(&envelope.queue).arg(&envelope.body[..]);
        self.executor.query(&cmd).await
    }
}
