//! The interface for the resolver, which finds the master of a service.

use crate::backend::Backend;
use crate::backoff::Transient;
use crate::service;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No sentinels configured for service {0}")]
    NoSentinels(service::Name),

    #[error("No sentinel could report a master for service {0}")]
    MasterNotFound(service::Name),
}

impl Transient for Error {
    // The resolver never retries on its own. Callers wrapping resolution in
    // a retry policy may wait for a sentinel to come back, but not for
    // configuration to appear.
    fn is_transient(&self) -> bool {
        match self {
            Error::NoSentinels(_) => false,
            Error::MasterNotFound(_) => true,
        }
    }
}

/// Translates a service into the address of its current master.
///
/// The resolver is responsible for knowing which [crate::service::Name]
/// it is resolving. It reports whatever it currently believes to be the
/// master; caching that answer is up to the caller.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Finds the current master address.
    async fn resolve_master(&self) -> Result<Backend, Error>;
}

/// Helper type for anything that implements the Resolver interface.
pub type BoxedResolver = Box<dyn Resolver>;
