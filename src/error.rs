//! Error types for the client runtime.
//!
//! Errors are split by the stage that produces them so callers can tell a
//! configuration mistake from a topology hiccup from a domain outcome:
//!
//! - **`ParseError`**: the connection descriptor or structured settings are invalid.
//!   Fatal, surfaced immediately, never retried.
//! - **`DiscoveryError`**: every gossip candidate failed for `maxDiscoverAttempts` rounds.
//! - **`SelectionError`**: the discovered membership has no member matching the node
//!   preference (e.g. no alive leader).
//! - **`ChannelError`**: the transport channel could not be built or was already closed.
//! - **`CommandError`**: the shape every command call returns to its caller.
//! - **`ClientError`**: failures while constructing a client (parse, config, CA file I/O).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::settings::Endpoint;

/// Convenience alias for command results.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// Errors raised while parsing a connection descriptor or validating settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The descriptor was empty or whitespace-only.
    #[error("connection string cannot be empty")]
    Empty,

    /// The descriptor does not start with a recognized scheme.
    #[error("unsupported scheme '{0}' (use esdb:// or esdb+discover://)")]
    UnsupportedScheme(String),

    /// No `host[:port]` was given.
    #[error("connection string must include at least one host")]
    MissingHost,

    /// A host entry could not be parsed.
    #[error("invalid host '{0}'")]
    InvalidHost(String),

    /// A port was present but not a valid port number.
    #[error("invalid port in '{0}'")]
    InvalidPort(String),

    /// The `user:password@` section was malformed.
    #[error("invalid user credentials: {0}")]
    InvalidCredentials(String),

    /// A query parameter key is not recognized.
    #[error("unknown connection setting '{0}'")]
    UnknownKey(String),

    /// A query parameter value could not be interpreted for its key.
    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidValue {
        /// The offending key, as written in the descriptor.
        key: String,
        /// The raw value.
        value: String,
    },

    /// The structured settings failed validation.
    #[error("invalid connection settings: {0}")]
    InvalidSettings(String),
}

/// All discovery rounds failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cluster discovery failed after {attempts} attempt(s): {last_error}")]
pub struct DiscoveryError {
    /// Number of full rounds over the candidate list that were made.
    pub attempts: u32,
    /// Rendering of the most recent per-candidate failure.
    pub last_error: String,
}

/// No member of the discovered cluster satisfies the node preference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Preference is `Leader` and no alive leader was reported.
    #[error("no alive leader in cluster membership")]
    NoLeaderAvailable,

    /// No alive member at all could be selected.
    #[error("no alive member in cluster membership")]
    NoMemberAvailable,
}

/// Transport channel failures.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The endpoint URI could not be built.
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        /// Target endpoint.
        endpoint: Endpoint,
        /// Underlying tonic error.
        #[source]
        source: tonic::transport::Error,
    },

    /// Connecting or handshaking with the endpoint failed.
    #[error("failed to connect to {endpoint}: {message}")]
    Connect {
        /// Target endpoint.
        endpoint: Endpoint,
        /// Human-readable failure.
        message: String,
    },

    /// The channel manager was closed with the client.
    #[error("channel manager is closed")]
    Closed,
}

/// Root cause attached to [`CommandError::Unavailable`].
#[derive(Error, Debug)]
pub enum UnavailableError {
    /// Discovery exhausted every attempt.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Selection found no suitable member even after a fresh discovery round.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// The channel could not be built.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The server (or the transport beneath it) answered `UNAVAILABLE`.
    #[error("{0}")]
    Status(String),
}

/// The error shape every command surfaces to its caller.
///
/// `Unavailable` and `NotLeader` are retried once by the call executor before
/// they reach the caller; everything else is passed through verbatim.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The endpoint is unreachable or no endpoint could be resolved.
    #[error("server unavailable: {0}")]
    Unavailable(#[from] UnavailableError),

    /// The node that received the call is not the leader.
    #[error("not leader{}", leader_hint(.leader))]
    NotLeader {
        /// Leader endpoint reported by the server, if any.
        leader: Option<Endpoint>,
    },

    /// The call was cancelled by the caller or by client shutdown.
    #[error("call cancelled")]
    Cancelled,

    /// The call did not complete before its deadline.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The credentials are missing, wrong, or lack permission.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Optimistic concurrency check failed on the server.
    #[error("wrong expected version for stream '{stream}' (expected {expected}, actual {actual})")]
    WrongExpectedVersion {
        /// Stream the check applied to.
        stream: String,
        /// Revision the caller expected.
        expected: String,
        /// Revision the server holds.
        actual: String,
    },

    /// The stream has been deleted.
    #[error("stream '{0}' is deleted")]
    StreamDeleted(String),

    /// Anything the classifier does not recognize.
    #[error("unknown error: {0}")]
    Unknown(String),
}

fn leader_hint(leader: &Option<Endpoint>) -> String {
    match leader {
        Some(endpoint) => format!(" (leader is {endpoint})"),
        None => String::new(),
    }
}

const EXCEPTION_KEY: &str = "exception";

impl CommandError {
    /// Classify a gRPC status into the command taxonomy.
    ///
    /// The server reports domain errors through an `exception` trailer; the
    /// status code is only consulted when that trailer is absent or unknown.
    pub fn from_status(status: tonic::Status) -> Self {
        let metadata = status.metadata();
        let meta = |key: &str| {
            metadata
                .get(key)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };

        match meta(EXCEPTION_KEY).as_deref() {
            Some("not-leader") => {
                let leader = match (meta("leader-endpoint-host"), meta("leader-endpoint-port")) {
                    (Some(host), Some(port)) => port
                        .parse::<u16>()
                        .ok()
                        .map(|port| Endpoint::new(host, port)),
                    _ => None,
                };
                return Self::NotLeader { leader };
            }
            Some("wrong-expected-version") => {
                return Self::WrongExpectedVersion {
                    stream: meta("stream-name").unwrap_or_default(),
                    expected: meta("expected-version").unwrap_or_else(|| "unknown".into()),
                    actual: meta("actual-version").unwrap_or_else(|| "unknown".into()),
                };
            }
            Some("stream-deleted") => {
                return Self::StreamDeleted(meta("stream-name").unwrap_or_default());
            }
            Some("access-denied") | Some("not-authenticated") => {
                return Self::PermissionDenied(status.message().to_string());
            }
            _ => {}
        }

        match status.code() {
            tonic::Code::Unavailable => Self::Unavailable(UnavailableError::Status(
                status.message().to_string(),
            )),
            tonic::Code::Cancelled => Self::Cancelled,
            tonic::Code::DeadlineExceeded => Self::DeadlineExceeded,
            tonic::Code::PermissionDenied | tonic::Code::Unauthenticated => {
                Self::PermissionDenied(status.message().to_string())
            }
            code => Self::Unknown(format!("{code:?}: {}", status.message())),
        }
    }

    /// Coarse classification used by the retry state machine.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::NotLeader { .. } => ErrorKind::NotLeader,
            _ => ErrorKind::Terminal,
        }
    }
}

impl From<DiscoveryError> for CommandError {
    fn from(value: DiscoveryError) -> Self {
        Self::Unavailable(value.into())
    }
}

impl From<ChannelError> for CommandError {
    fn from(value: ChannelError) -> Self {
        match value {
            ChannelError::Closed => Self::Cancelled,
            other => Self::Unavailable(other.into()),
        }
    }
}

impl From<SelectionError> for CommandError {
    fn from(value: SelectionError) -> Self {
        Self::Unavailable(value.into())
    }
}

/// How the executor reacts to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalidate the channel, rediscover, retry once.
    Unavailable,
    /// Re-select the leader, retry once.
    NotLeader,
    /// Surface to the caller unchanged.
    Terminal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::NotLeader => write!(f, "not-leader"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Errors raised while constructing a client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The connection string or settings were invalid.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Loading the configuration file or environment failed.
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Reading a local file (e.g. the TLS certificate authority) failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<figment::Error> for ClientError {
    fn from(value: figment::Error) -> Self {
        Self::Config(Box::new(value))
    }
}
