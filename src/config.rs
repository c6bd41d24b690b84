//! File and environment configuration using Figment.
//!
//! Settings can come from a TOML file merged with `ESDB_`-prefixed environment
//! variables (`__` separates nested keys). A configuration either carries a
//! `connection_string` or describes the endpoints structurally; mixing both is
//! rejected.
//!
//! ```toml
//! # esdb.toml
//! seeds = ["nodeA:2113", "nodeB:2113", "nodeC:2113"]
//! node_preference = "leader"
//! tls = false
//! log_level = "debug"
//! discovery_timeout = "2s"
//! default_deadline = "10s"
//!
//! [credentials]
//! username = "admin"
//! password = "changeit"
//! ```
//!
//! # Example
//! ```no_run
//! use esdb_client::config::ClientConfig;
//!
//! let settings = ClientConfig::load_from("esdb.toml")?.into_settings()?;
//! # Ok::<(), esdb_client::error::ClientError>(())
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::connection_string;
use crate::error::{ClientError, ParseError};
use crate::settings::{ConnectionSettings, Credentials, Endpoint, NodePreference};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ESDB_";

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "esdb.toml";

/// Structured client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Full connection string; exclusive with `endpoint`/`seeds`.
    pub connection_string: Option<String>,
    /// Single-node endpoint (`host:port`).
    pub endpoint: Option<String>,
    /// Gossip seeds (`host:port`); one seed still means cluster mode.
    pub seeds: Vec<String>,
    /// Enable TLS (default true).
    pub tls: Option<bool>,
    /// PEM root certificate.
    pub tls_ca_file: Option<PathBuf>,
    /// Default call credentials.
    pub credentials: Option<Credentials>,
    /// Role routing policy.
    pub node_preference: Option<NodePreference>,
    /// Per-candidate gossip deadline.
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Option<Duration>,
    /// Discovery rounds before giving up.
    pub max_discover_attempts: Option<u32>,
    /// Pause between discovery rounds.
    #[serde(with = "humantime_serde")]
    pub discovery_retry_interval: Option<Duration>,
    /// HTTP/2 keep-alive interval.
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Option<Duration>,
    /// HTTP/2 keep-alive ack timeout.
    #[serde(with = "humantime_serde")]
    pub keep_alive_timeout: Option<Duration>,
    /// Deadline for calls that do not set one.
    #[serde(with = "humantime_serde")]
    pub default_deadline: Option<Duration>,
    /// Lifetime of cached cluster membership.
    #[serde(with = "humantime_serde")]
    pub membership_ttl: Option<Duration>,
    /// Log level for binaries that initialize logging from this file.
    pub log_level: Option<String>,
}

impl ClientConfig {
    /// Load `esdb.toml` from the working directory (if present) and the environment.
    pub fn load() -> Result<Self, ClientError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific TOML file merged with `ESDB_*` environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ClientError> {
        Self::figment(path.as_ref()).extract().map_err(ClientError::from)
    }

    /// The provider stack, exposed so callers can merge extra sources.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate and convert into [`ConnectionSettings`].
    pub fn into_settings(self) -> Result<ConnectionSettings, ParseError> {
        if let Some(connection_string) = &self.connection_string {
            if self.endpoint.is_some() || !self.seeds.is_empty() {
                return Err(ParseError::InvalidSettings(
                    "connection_string cannot be combined with endpoint or seeds".into(),
                ));
            }
            return connection_string::parse(connection_string);
        }

        let mut builder = match (self.endpoint, self.seeds.is_empty()) {
            (Some(_), false) => {
                return Err(ParseError::InvalidSettings(
                    "set either endpoint or seeds, not both".into(),
                ))
            }
            (Some(endpoint), true) => {
                ConnectionSettings::builder().single_node(endpoint.parse::<Endpoint>()?)
            }
            (None, false) => ConnectionSettings::builder().cluster(
                self.seeds
                    .iter()
                    .map(|seed| seed.parse::<Endpoint>())
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            (None, true) => return Err(ParseError::MissingHost),
        };

        if let Some(tls) = self.tls {
            builder = builder.tls(tls);
        }
        if let Some(path) = self.tls_ca_file {
            builder = builder.tls_ca_file(path);
        }
        if let Some(credentials) = self.credentials {
            builder = builder.default_credentials(credentials);
        }
        if let Some(preference) = self.node_preference {
            builder = builder.node_preference(preference);
        }
        if let Some(timeout) = self.discovery_timeout {
            builder = builder.discovery_timeout(timeout);
        }
        if let Some(attempts) = self.max_discover_attempts {
            builder = builder.max_discover_attempts(attempts);
        }
        if let Some(interval) = self.discovery_retry_interval {
            builder = builder.discovery_retry_interval(interval);
        }
        if let Some(interval) = self.keep_alive_interval {
            builder = builder.keep_alive_interval(interval);
        }
        if let Some(timeout) = self.keep_alive_timeout {
            builder = builder.keep_alive_timeout(timeout);
        }
        if let Some(deadline) = self.default_deadline {
            builder = builder.default_deadline(deadline);
        }
        if let Some(ttl) = self.membership_ttl {
            builder = builder.membership_ttl(ttl);
        }

        builder.build()
    }
}
