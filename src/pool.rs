//! A pool which uses a [resolver] to find the master [backend], and vend out
//! a [claim]

use crate::backend::{self, Backend, Connection};
use crate::backoff::Transient;
use crate::claim;
use crate::policy::{Failover, Policy};
#[cfg(feature = "probes")]
use crate::probes;
use crate::resolver;
use crate::ClaimId;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{event, instrument, Level};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to resolve the master")]
    Resolve(#[from] resolver::Error),

    #[error("Failed to connect to master {backend}")]
    Connect {
        backend: Backend,
        #[source]
        source: backend::Error,
    },
}

impl Error {
    #[cfg(feature = "probes")]
    // Convert to a static string for USDT probes.
    const fn as_str(&self) -> &'static str {
        match self {
            Error::Resolve(_) => "Resolve",
            Error::Connect { .. } => "Connect",
        }
    }
}

impl Transient for Error {
    fn is_transient(&self) -> bool {
        match self {
            Error::Resolve(err) => err.is_transient(),
            Error::Connect { source, .. } => source.is_transient(),
        }
    }
}

/// Pool-wide counters.
#[derive(Debug, Default)]
pub struct Stats {
    claims: AtomicUsize,
    connects: AtomicUsize,
    resolutions: AtomicUsize,
}

impl Stats {
    /// Number of claims handed out, including reused idle connections.
    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::Relaxed)
    }

    /// Number of new connections opened.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::Relaxed)
    }

    /// Number of times the resolver was asked for the master.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::Relaxed)
    }
}

/// The name of the pool
#[derive(Clone, Debug)]
pub(crate) struct Name(Arc<str>);

impl Name {
    pub(crate) fn new<S: Into<Arc<str>>>(name: S) -> Self {
        Self(name.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Manages connections to the master of one service.
///
/// In [Failover::Sticky] mode, the pool moves through two states:
///
/// - Unresolved: no master address is known. The first call which needs one
///   asks the resolver. Concurrent first calls share a single resolution.
/// - Resolved: the address is cached, and returned for the lifetime of the
///   pool, whatever Sentinel reports later. Connection errors don't change
///   this state; they are returned to the caller, whose recovery is to drop
///   the pool and build a new one.
///
/// In [Failover::Follow] mode, the master is resolved every time a new
/// connection is needed.
///
/// The pool spawns no background tasks: resolution and connecting happen
/// within the caller's [Pool::claim].
pub struct Pool<Conn: Connection> {
    name: Name,
    resolver: resolver::BoxedResolver,
    backend_connector: backend::SharedConnector<Conn>,
    policy: Policy,

    // Assigned at most once, by the first resolution in "Sticky" mode.
    master: OnceCell<Backend>,
    idle: Arc<claim::Idle<Conn>>,
    stats: Stats,
}

impl<Conn: Connection> std::fmt::Debug for Pool<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("master", &self.master.get())
            .field("idle", &self.idle)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// A wrapper type indicating that the USDT probes could not be registered.
///
/// In this case, no probes will be available in the process. However, similar
/// to `std::sync::PoisonError`, this contains the pool itself. Applications
/// which don't care about a probe registration failure may still get access to
/// the pool
pub struct RegistrationError<Conn: Connection>(Pool<Conn>);

impl<Conn: Connection> std::fmt::Debug for RegistrationError<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationError").finish_non_exhaustive()
    }
}

impl<Conn: Connection> std::fmt::Display for RegistrationError<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        "USDT probe registration failed".fmt(f)
    }
}

impl<Conn: Connection> RegistrationError<Conn> {
    /// Consume the error and get access to the contained pool.
    pub fn into_inner(self) -> Pool<Conn> {
        self.0
    }
}

impl<Conn: Connection + Send + 'static> Pool<Conn> {
    /// Creates a new connection pool.
    ///
    /// - name: The name of this pool, for instrumentation.
    /// - resolver: Describes how the master should be found for the service.
    /// - backend_connector: Describes how the connections to the master
    /// should be made.
    ///
    /// No resolution or connection happens until the pool is first used.
    ///
    /// ```no_run
    /// use sticky_sentinel::connectors::redis::RedisConnector;
    /// use sticky_sentinel::pool::Pool;
    /// use sticky_sentinel::policy::Policy;
    /// use sticky_sentinel::resolvers::sentinel::SentinelResolver;
    /// use sticky_sentinel::service::{Descriptor, Endpoint};
    /// use std::sync::Arc;
    ///
    /// # async {
    /// let descriptor = Descriptor::new(
    ///     "mymaster",
    ///     [Endpoint::new("192.168.1.1", 26379), Endpoint::new("192.168.1.2", 26379)],
    /// );
    /// let resolver = Box::new(SentinelResolver::new(&descriptor));
    /// let connector = Arc::new(RedisConnector::for_service(&descriptor));
    ///
    /// let pool = Pool::new("my-pool".to_string(), resolver, connector, Policy::default())
    ///     .unwrap();
    ///
    /// // The first claim resolves the master, and pins the pool to it.
    /// let connection = pool.claim().await.unwrap();
    /// # };
    /// ```
    ///
    /// # DTrace probe registration
    ///
    /// This constructor returns a `Result`, because it attempts to register the
    /// USDT probes it exposes, a fallible process. The `Err` variant of the
    /// returned result allows callers to access the constructed `Pool`
    /// anyway.
    ///
    /// Note that if the `"probes"` feauture is not enabled, this method is
    /// infallible.
    #[instrument(skip(resolver, backend_connector), name = "Pool::new")]
    pub fn new(
        name: String,
        resolver: resolver::BoxedResolver,
        backend_connector: backend::SharedConnector<Conn>,
        policy: Policy,
    ) -> Result<Self, RegistrationError<Conn>> {
        let self_ = Self {
            name: Name::new(name),
            resolver,
            backend_connector,
            idle: Arc::new(claim::Idle::new(policy.max_idle_connections)),
            policy,
            master: OnceCell::new(),
            stats: Stats::default(),
        };
        #[cfg(feature = "probes")]
        match usdt::register_probes() {
            Ok(_) => Ok(self_),
            Err(_) => Err(RegistrationError(self_)),
        }
        #[cfg(not(feature = "probes"))]
        Ok(self_)
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Returns a reference to pool-wide stats
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Returns the cached master address, if one has been resolved.
    ///
    /// Always `None` in [Failover::Follow] mode.
    pub fn cached_master(&self) -> Option<&Backend> {
        self.master.get()
    }

    /// Number of open connections waiting to be claimed.
    pub fn idle_connections(&self) -> usize {
        self.idle.len()
    }

    /// Returns the address of the master.
    ///
    /// In [Failover::Sticky] mode only the first call consults the resolver;
    /// every later call returns the same address, even if Sentinel has since
    /// promoted another node.
    #[instrument(level = "debug", skip(self), err, name = "Pool::master_address")]
    pub async fn master_address(&self) -> Result<Backend, Error> {
        match self.policy.failover {
            Failover::Sticky => {
                let master = self.master.get_or_try_init(|| self.resolve()).await?;
                Ok(master.clone())
            }
            Failover::Follow => self.resolve().await,
        }
    }

    async fn resolve(&self) -> Result<Backend, Error> {
        self.stats.resolutions.fetch_add(1, Ordering::Relaxed);
        let master = self.resolver.resolve_master().await?;
        event!(Level::INFO, pool = %self.name, master = %master, "Resolved master");
        Ok(master)
    }

    /// Acquires a handle to a connection to the master.
    ///
    /// An idle connection is reused if one exists. Otherwise a new connection
    /// is opened to [Pool::master_address]; if that fails, the error is
    /// returned as-is.
    ///
    /// The connection only becomes reusable once the caller hands it back
    /// with [claim::Handle::release].
    #[instrument(level = "debug", skip(self), err, name = "Pool::claim")]
    pub async fn claim(&self) -> Result<claim::Handle<Conn>, Error> {
        let id = ClaimId::new();
        #[cfg(feature = "probes")]
        probes::claim__start!(|| (self.name.as_str(), id.0));
        let res = self.do_claim().await;
        #[cfg(feature = "probes")]
        match &res {
            Ok(_) => probes::claim__done!(|| (self.name.as_str(), id.0)),
            Err(e) => probes::claim__failed!(|| (self.name.as_str(), id.0, e.as_str())),
        }
        event!(Level::TRACE, claim_id = id.0, ok = res.is_ok(), "Claim finished");
        res
    }

    async fn do_claim(&self) -> Result<claim::Handle<Conn>, Error> {
        if let Some((backend, conn)) = self.idle.take() {
            self.stats.claims.fetch_add(1, Ordering::Relaxed);
            return Ok(claim::Handle::new(conn, backend, self.idle.clone()));
        }

        let backend = self.master_address().await?;
        let conn = self.connect(&backend).await?;
        self.stats.claims.fetch_add(1, Ordering::Relaxed);
        Ok(claim::Handle::new(conn, backend, self.idle.clone()))
    }

    async fn connect(&self, backend: &Backend) -> Result<Conn, Error> {
        #[cfg(feature = "probes")]
        probes::connect__start!(|| (self.name.as_str(), backend.to_string()));
        match self.backend_connector.connect(backend).await {
            Ok(conn) => {
                #[cfg(feature = "probes")]
                probes::connect__done!(|| (self.name.as_str(), backend.to_string()));
                self.stats.connects.fetch_add(1, Ordering::Relaxed);
                Ok(conn)
            }
            Err(err) => {
                event!(Level::WARN, err = ?err, backend = %backend, "Failed to connect");
                #[cfg(feature = "probes")]
                probes::connect__failed!(|| (
                    self.name.as_str(),
                    backend.to_string(),
                    err.to_string()
                ));
                Err(Error::Connect {
                    backend: backend.clone(),
                    source: err,
                })
            }
        }
    }

    /// Closes all idle connections.
    ///
    /// Claimed connections are unaffected, and the cached master is kept.
    pub fn disconnect(&self) {
        self.idle.clear();
    }
}
