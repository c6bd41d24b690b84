//! Connection settings and endpoint types.
//!
//! [`ConnectionSettings`] is built once per client, either from a connection
//! string (see [`crate::connection_string`]), a configuration file (see
//! [`crate::config`]) or the [`ConnectionSettingsBuilder`], and is never mutated
//! afterwards. Every field is validated in [`ConnectionSettingsBuilder::build`].
//!
//! # Example
//!
//! ```
//! use esdb_client::settings::{ConnectionSettings, Endpoint, NodePreference};
//!
//! let settings = ConnectionSettings::builder()
//!     .cluster([Endpoint::new("nodeA", 2113), Endpoint::new("nodeB", 2113)])
//!     .node_preference(NodePreference::Follower)
//!     .tls(false)
//!     .build()?;
//! assert!(settings.endpoints().is_cluster());
//! # Ok::<(), esdb_client::error::ParseError>(())
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Default server port.
pub const DEFAULT_PORT: u16 = 2113;

/// A `host:port` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP address (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint from its parts.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The URI tonic connects to.
    #[must_use]
    pub fn uri(&self, secure: bool) -> String {
        let scheme = if secure { "https" } else { "http" };
        if self.host.contains(':') {
            format!("{scheme}://[{}]:{}", self.host, self.port)
        } else {
            format!("{scheme}://{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = ParseError;

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`. A missing port
    /// defaults to [`DEFAULT_PORT`].
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::MissingHost);
        }

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| ParseError::InvalidHost(input.to_string()))?;
            let port = match after {
                "" => None,
                other => Some(
                    other
                        .strip_prefix(':')
                        .ok_or_else(|| ParseError::InvalidHost(input.to_string()))?,
                ),
            };
            (host, port)
        } else {
            match input.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            }
        };

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| ParseError::InvalidPort(input.to_string()))?,
            None => DEFAULT_PORT,
        };

        let valid_host = if host.contains(':') {
            host.parse::<std::net::Ipv6Addr>().is_ok()
        } else {
            url::Host::parse(host).is_ok()
        };
        if host.is_empty() || !valid_host {
            return Err(ParseError::InvalidHost(input.to_string()));
        }

        Ok(Self::new(host, port))
    }
}

/// Candidate server addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSet {
    /// One server; never gossips.
    SingleNode(Endpoint),
    /// Seed list used for gossip discovery, order preserved.
    Cluster(Vec<Endpoint>),
}

impl EndpointSet {
    /// Whether gossip discovery is used.
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        matches!(self, Self::Cluster(_))
    }

    /// All addresses in declaration order.
    #[must_use]
    pub fn addresses(&self) -> &[Endpoint] {
        match self {
            Self::SingleNode(endpoint) => std::slice::from_ref(endpoint),
            Self::Cluster(seeds) => seeds,
        }
    }
}

/// Which cluster role calls should be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodePreference {
    /// The unique alive leader.
    Leader,
    /// A random alive follower, else any alive member.
    Follower,
    /// A random alive read-only replica, else any alive member.
    ReadOnlyReplica,
    /// A random alive member.
    Random,
    /// The sole member (single-node mode).
    None,
}

impl NodePreference {
    /// Name as written in connection strings.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Follower => "follower",
            Self::ReadOnlyReplica => "readOnlyReplica",
            Self::Random => "random",
            Self::None => "none",
        }
    }
}

impl fmt::Display for NodePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodePreference {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "leader" => Ok(Self::Leader),
            "follower" => Ok(Self::Follower),
            "readonlyreplica" => Ok(Self::ReadOnlyReplica),
            "random" => Ok(Self::Random),
            "none" => Ok(Self::None),
            _ => Err(ParseError::InvalidValue {
                key: "nodePreference".into(),
                value: value.to_string(),
            }),
        }
    }
}

/// Username/password attached to calls as basic-auth metadata.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Secret; never logged.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of the `authorization` header.
    #[must_use]
    pub fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable per-client connection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    endpoints: EndpointSet,
    tls: bool,
    tls_ca_file: Option<PathBuf>,
    default_credentials: Option<Credentials>,
    node_preference: NodePreference,
    discovery_timeout: Duration,
    max_discover_attempts: u32,
    discovery_retry_interval: Duration,
    keep_alive_interval: Duration,
    keep_alive_timeout: Duration,
    default_deadline: Option<Duration>,
    membership_ttl: Duration,
}

impl ConnectionSettings {
    /// Start building settings.
    #[must_use]
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::default()
    }

    /// Candidate addresses.
    #[must_use]
    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Whether channels use TLS.
    #[must_use]
    pub fn tls(&self) -> bool {
        self.tls
    }

    /// PEM file holding the root certificate used to verify the server.
    #[must_use]
    pub fn tls_ca_file(&self) -> Option<&PathBuf> {
        self.tls_ca_file.as_ref()
    }

    /// Credentials used when a call does not supply its own.
    #[must_use]
    pub fn default_credentials(&self) -> Option<&Credentials> {
        self.default_credentials.as_ref()
    }

    /// Role routing policy.
    #[must_use]
    pub fn node_preference(&self) -> NodePreference {
        self.node_preference
    }

    /// Deadline for one gossip query to one candidate.
    #[must_use]
    pub fn discovery_timeout(&self) -> Duration {
        self.discovery_timeout
    }

    /// Number of full rounds over the seed list before discovery gives up.
    #[must_use]
    pub fn max_discover_attempts(&self) -> u32 {
        self.max_discover_attempts
    }

    /// Pause between discovery rounds.
    #[must_use]
    pub fn discovery_retry_interval(&self) -> Duration {
        self.discovery_retry_interval
    }

    /// HTTP/2 keep-alive ping interval.
    #[must_use]
    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    /// How long to wait for a keep-alive ack.
    #[must_use]
    pub fn keep_alive_timeout(&self) -> Duration {
        self.keep_alive_timeout
    }

    /// Deadline applied to calls that do not set one.
    #[must_use]
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline
    }

    /// How long discovered membership is reused before gossiping again.
    #[must_use]
    pub fn membership_ttl(&self) -> Duration {
        self.membership_ttl
    }
}

/// Builder for [`ConnectionSettings`].
#[derive(Debug, Clone)]
pub struct ConnectionSettingsBuilder {
    endpoints: Option<EndpointSet>,
    tls: bool,
    tls_ca_file: Option<PathBuf>,
    default_credentials: Option<Credentials>,
    node_preference: Option<NodePreference>,
    discovery_timeout: Duration,
    max_discover_attempts: u32,
    discovery_retry_interval: Duration,
    keep_alive_interval: Duration,
    keep_alive_timeout: Duration,
    default_deadline: Option<Duration>,
    membership_ttl: Duration,
}

impl Default for ConnectionSettingsBuilder {
    fn default() -> Self {
        Self {
            endpoints: None,
            tls: true,
            tls_ca_file: None,
            default_credentials: None,
            node_preference: None,
            discovery_timeout: Duration::from_secs(5),
            max_discover_attempts: 10,
            discovery_retry_interval: Duration::from_millis(100),
            keep_alive_interval: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(10),
            default_deadline: None,
            membership_ttl: Duration::from_secs(5),
        }
    }
}

impl ConnectionSettingsBuilder {
    /// Connect to exactly one server.
    #[must_use]
    pub fn single_node(mut self, endpoint: Endpoint) -> Self {
        self.endpoints = Some(EndpointSet::SingleNode(endpoint));
        self
    }

    /// Discover the cluster through these seeds (one seed is allowed).
    #[must_use]
    pub fn cluster(mut self, seeds: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints = Some(EndpointSet::Cluster(seeds.into_iter().collect()));
        self
    }

    /// Enable or disable TLS.
    #[must_use]
    pub fn tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    /// Root certificate file used to verify the server.
    #[must_use]
    pub fn tls_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_file = Some(path.into());
        self
    }

    /// Credentials attached to every call that does not override them.
    #[must_use]
    pub fn default_credentials(mut self, credentials: Credentials) -> Self {
        self.default_credentials = Some(credentials);
        self
    }

    /// Role routing policy.
    #[must_use]
    pub fn node_preference(mut self, preference: NodePreference) -> Self {
        self.node_preference = Some(preference);
        self
    }

    /// Deadline for a single gossip query.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Total discovery rounds.
    #[must_use]
    pub fn max_discover_attempts(mut self, attempts: u32) -> Self {
        self.max_discover_attempts = attempts;
        self
    }

    /// Pause between discovery rounds.
    #[must_use]
    pub fn discovery_retry_interval(mut self, interval: Duration) -> Self {
        self.discovery_retry_interval = interval;
        self
    }

    /// HTTP/2 keep-alive interval.
    #[must_use]
    pub fn keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// HTTP/2 keep-alive ack timeout.
    #[must_use]
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.keep_alive_timeout = timeout;
        self
    }

    /// Deadline for calls that do not set one.
    #[must_use]
    pub fn default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = Some(deadline);
        self
    }

    /// Lifetime of cached cluster membership.
    #[must_use]
    pub fn membership_ttl(mut self, ttl: Duration) -> Self {
        self.membership_ttl = ttl;
        self
    }

    /// Validate and freeze the settings.
    pub fn build(self) -> Result<ConnectionSettings, ParseError> {
        let endpoints = self.endpoints.ok_or(ParseError::MissingHost)?;
        if endpoints.addresses().is_empty() {
            return Err(ParseError::MissingHost);
        }

        let node_preference = self.node_preference.unwrap_or(if endpoints.is_cluster() {
            NodePreference::Leader
        } else {
            NodePreference::None
        });

        if endpoints.is_cluster() && node_preference == NodePreference::None {
            return Err(ParseError::InvalidSettings(
                "nodePreference=none is only valid for a single node".into(),
            ));
        }
        if self.max_discover_attempts == 0 {
            return Err(ParseError::InvalidSettings(
                "maxDiscoverAttempts must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("discoverTimeout", self.discovery_timeout),
            ("keepAliveInterval", self.keep_alive_interval),
            ("keepAliveTimeout", self.keep_alive_timeout),
        ] {
            if value.is_zero() {
                return Err(ParseError::InvalidSettings(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.default_deadline.is_some_and(|d| d.is_zero()) {
            return Err(ParseError::InvalidSettings(
                "defaultDeadline must be greater than zero".into(),
            ));
        }
        if let Some(credentials) = &self.default_credentials {
            if credentials.username.is_empty() {
                return Err(ParseError::InvalidCredentials("username is empty".into()));
            }
        }
        if self.tls_ca_file.is_some() && !self.tls {
            return Err(ParseError::InvalidSettings(
                "tlsCertificateAuthorityPath requires tls=true".into(),
            ));
        }

        Ok(ConnectionSettings {
            endpoints,
            tls: self.tls,
            tls_ca_file: self.tls_ca_file,
            default_credentials: self.default_credentials,
            node_preference,
            discovery_timeout: self.discovery_timeout,
            max_discover_attempts: self.max_discover_attempts,
            discovery_retry_interval: self.discovery_retry_interval,
            keep_alive_interval: self.keep_alive_interval,
            keep_alive_timeout: self.keep_alive_timeout,
            default_deadline: self.default_deadline,
            membership_ttl: self.membership_ttl,
        })
    }
}
