//! Implementation of [Resolver] that always returns an explicit address.

use async_trait::async_trait;

use crate::backend::Backend;
use crate::resolver::{Error, Resolver};

/// A [`Resolver`] that always returns a single address.
///
/// Useful for deployments without Sentinel, where the master never moves.
#[derive(Clone, Debug)]
pub struct FixedResolver {
    backend: Backend,
}

impl FixedResolver {
    /// Construct a resolver to always return the provided address.
    pub fn new(backend: impl Into<Backend>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

#[async_trait]
impl Resolver for FixedResolver {
    async fn resolve_master(&self) -> Result<Backend, Error> {
        Ok(self.backend.clone())
    }
}
