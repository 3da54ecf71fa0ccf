//! Interface for services
use std::sync::Arc;
use std::time::Duration;

/// The socket timeout used when none is configured.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_millis(100);

/// Describes the name of a service, as monitored by Sentinel.
#[derive(Clone, Debug, PartialEq, Eq, Ord, PartialOrd, Hash)]
pub struct Name(pub Arc<str>);

impl Name {
    pub fn new(s: impl ToString) -> Self {
        Self(Arc::from(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&'_ str> for Name {
    fn from(s: &'_ str) -> Self {
        Self(Arc::from(s))
    }
}

impl std::borrow::Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Name {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Name {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Name::from)
    }
}

/// A single Sentinel node.
///
/// In configuration, endpoints are written as `[host, port]` pairs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "(String, u16)"))]
pub struct Endpoint {
    pub host: Arc<str>,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<Arc<str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<(String, u16)> for Endpoint {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(address: std::net::SocketAddr) -> Self {
        Self::new(address.ip().to_string(), address.port())
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies a logical Redis master/replica set, and how to reach the
/// sentinels which monitor it.
///
/// Descriptors are immutable once built, and are the only state shared
/// between independent pools.
#[derive(Clone, Debug)]
pub struct Descriptor {
    /// The name under which Sentinel monitors the master.
    pub name: Name,

    /// The sentinels to query, in the order they should be tried.
    pub sentinels: Vec<Endpoint>,

    /// Bounds connecting to, and each request against, a sentinel.
    /// Also bounds connecting to the master.
    pub socket_timeout: Duration,

    /// The logical database selected on data-plane connections.
    pub db: i64,

    /// Password for data-plane connections, if the master requires one.
    pub password: Option<String>,
}

impl Descriptor {
    pub fn new(name: impl Into<Name>, sentinels: impl IntoIterator<Item = Endpoint>) -> Self {
        Self {
            name: name.into(),
            sentinels: sentinels.into_iter().collect(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            db: 0,
            password: None,
        }
    }

    pub fn with_socket_timeout(mut self, socket_timeout: Duration) -> Self {
        self.socket_timeout = socket_timeout;
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_password(mut self, password: impl ToString) -> Self {
        self.password = Some(password.to_string());
        self
    }
}
