//! Implementation of [Resolver] for Redis Sentinel

use crate::backend::Backend;
use crate::command::CommandExecutor;
use crate::discovery::ShortLivedClient;
#[cfg(feature = "probes")]
use crate::probes;
use crate::resolver::{Error, Resolver};
use crate::service::{self, Descriptor, Endpoint};

use async_trait::async_trait;
use redis::Cmd;
use std::sync::Mutex;
use tracing::{event, instrument, Level};

/// Finds the master of a service by asking each configured sentinel in turn.
///
/// The first sentinel to report an address wins. Sentinels which are
/// unreachable, answer with an error, or don't know the service are
/// skipped. The sentinel which answered is moved to the front of the query
/// order, so later resolutions ask it first.
///
/// Every query goes through a [ShortLivedClient], so no connection to a
/// sentinel outlives the query.
#[derive(Debug)]
pub struct SentinelResolver {
    service: service::Name,
    sentinels: Vec<ShortLivedClient>,

    // Indices into "sentinels", in the order they are queried.
    order: Mutex<Vec<usize>>,
}

impl SentinelResolver {
    pub fn new(descriptor: &Descriptor) -> Self {
        let sentinels: Vec<_> = descriptor
            .sentinels
            .iter()
            .map(|endpoint| ShortLivedClient::new(endpoint.clone(), descriptor.socket_timeout))
            .collect();
        let order = (0..sentinels.len()).collect();
        Self {
            service: descriptor.name.clone(),
            sentinels,
            order: Mutex::new(order),
        }
    }

    /// Returns the sentinels in the order the next resolution will try them.
    pub fn query_order(&self) -> Vec<Endpoint> {
        self.order
            .lock()
            .unwrap()
            .iter()
            .map(|&index| self.sentinels[index].endpoint().clone())
            .collect()
    }

    fn promote(&self, index: usize) {
        let mut order = self.order.lock().unwrap();
        if let Some(position) = order.iter().position(|&i| i == index) {
            order.remove(position);
            order.insert(0, index);
        }
    }

    fn lookup_cmd(&self) -> Cmd {
        let mut cmd = redis::cmd("SENTINEL");
        cmd.arg("get-master-addr-by-name").arg(self.service.as_str());
        cmd
    }
}

#[async_trait]
impl Resolver for SentinelResolver {
    #[instrument(skip(self), fields(service = %self.service), name = "SentinelResolver::resolve_master")]
    async fn resolve_master(&self) -> Result<Backend, Error> {
        if self.sentinels.is_empty() {
            return Err(Error::NoSentinels(self.service.clone()));
        }
        #[cfg(feature = "probes")]
        probes::resolve__start!(|| self.service.as_str());

        let cmd = self.lookup_cmd();
        let order = self.order.lock().unwrap().clone();
        for index in order {
            let sentinel = &self.sentinels[index];
            match sentinel.query::<Option<(String, u16)>>(&cmd).await {
                Ok(Some((host, port))) => {
                    let master = Backend::new(host, port);
                    event!(
                        Level::DEBUG,
                        sentinel = %sentinel.endpoint(),
                        master = %master,
                        "Sentinel reported master"
                    );
                    #[cfg(feature = "probes")]
                    probes::resolve__done!(|| (
                        self.service.as_str(),
                        sentinel.endpoint().to_string(),
                        master.to_string()
                    ));
                    self.promote(index);
                    return Ok(master);
                }
                Ok(None) => {
                    event!(
                        Level::WARN,
                        sentinel = %sentinel.endpoint(),
                        "Sentinel does not know a master for this service"
                    );
                }
                Err(err) => {
                    event!(
                        Level::WARN,
                        sentinel = %sentinel.endpoint(),
                        err = %err,
                        "Failed to query sentinel"
                    );
                }
            }
        }

        #[cfg(feature = "probes")]
        probes::resolve__failed!(|| self.service.as_str());
        Err(Error::MasterNotFound(self.service.clone()))
    }
}
