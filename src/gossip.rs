//! Cluster membership discovery over the gossip protocol.
//!
//! Single-node clients never gossip: the configured endpoint is reported as an
//! alive leader. Cluster clients walk the seed list sequentially; the first
//! seed that answers supplies the membership for the round. A full pass over
//! the seeds is one attempt, and attempts are bounded by
//! `maxDiscoverAttempts` with `discoveryRetryInterval` between them.
//!
//! The answering node's own liveness is not checked: gossip is read from
//! whoever answers.

use std::sync::Arc;

use crate::error::DiscoveryError;
use crate::settings::{ConnectionSettings, Endpoint, EndpointSet};
use crate::transport::Transport;

/// Gossip wire messages (`event_store.client.gossip`).
pub mod proto {
    /// Empty request.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Empty {}

    /// Membership as seen by the answering node.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ClusterInfo {
        /// Reported members, in the node's order.
        #[prost(message, repeated, tag = "1")]
        pub members: Vec<MemberInfo>,
    }

    /// Address of a member's client endpoint.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct EndPoint {
        /// Host name or IP.
        #[prost(string, tag = "1")]
        pub address: String,
        /// Port.
        #[prost(uint32, tag = "2")]
        pub port: u32,
    }

    /// One cluster member.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct MemberInfo {
        /// Time the member last reported, in ticks.
        #[prost(int64, tag = "2")]
        pub time_stamp: i64,
        /// Replication state.
        #[prost(enumeration = "VNodeState", tag = "3")]
        pub state: i32,
        /// Whether the cluster considers the member alive.
        #[prost(bool, tag = "4")]
        pub is_alive: bool,
        /// Client-facing endpoint.
        #[prost(message, optional, tag = "5")]
        pub http_end_point: Option<EndPoint>,
    }

    /// Replication state of a member.
    #[allow(missing_docs)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum VNodeState {
        Initializing = 0,
        DiscoverLeader = 1,
        Unknown = 2,
        PreReplica = 3,
        CatchingUp = 4,
        Clone = 5,
        Follower = 6,
        PreLeader = 7,
        Leader = 8,
        Manager = 9,
        ShuttingDown = 10,
        Shutdown = 11,
        ReadOnlyLeaderless = 12,
        PreReadOnlyReplica = 13,
        ReadOnlyReplica = 14,
        ResigningLeader = 15,
    }
}

/// Role of a member within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRole {
    /// Accepts writes.
    Leader,
    /// Replicates from the leader.
    Follower,
    /// Serves reads without taking part in write consensus.
    ReadOnlyReplica,
    /// Any transitional or unrecognized state.
    Unknown,
}

impl From<proto::VNodeState> for MemberRole {
    fn from(state: proto::VNodeState) -> Self {
        match state {
            proto::VNodeState::Leader => Self::Leader,
            proto::VNodeState::Follower => Self::Follower,
            proto::VNodeState::ReadOnlyReplica => Self::ReadOnlyReplica,
            _ => Self::Unknown,
        }
    }
}

/// A member as reported by one discovery round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterMember {
    /// Client-facing address.
    pub endpoint: Endpoint,
    /// Role at the time of the report.
    pub role: MemberRole,
    /// Liveness at the time of the report.
    pub is_alive: bool,
}

impl ClusterMember {
    /// Create a member.
    pub fn new(endpoint: Endpoint, role: MemberRole, is_alive: bool) -> Self {
        Self {
            endpoint,
            role,
            is_alive,
        }
    }

    /// Convert a wire member, dropping entries without a usable endpoint.
    pub fn from_proto(info: proto::MemberInfo) -> Option<Self> {
        let end_point = info.http_end_point?;
        let port = u16::try_from(end_point.port).ok().filter(|p| *p != 0)?;
        if end_point.address.is_empty() {
            return None;
        }
        let role = proto::VNodeState::try_from(info.state)
            .map(MemberRole::from)
            .unwrap_or(MemberRole::Unknown);
        Some(Self::new(
            Endpoint::new(end_point.address, port),
            role,
            info.is_alive,
        ))
    }
}

/// Collapse duplicate endpoints. The first position is kept; role and liveness
/// come from the last report.
pub fn dedupe_members(members: Vec<ClusterMember>) -> Vec<ClusterMember> {
    let mut unique: Vec<ClusterMember> = Vec::with_capacity(members.len());
    for member in members {
        match unique.iter_mut().find(|m| m.endpoint == member.endpoint) {
            Some(existing) => {
                existing.role = member.role;
                existing.is_alive = member.is_alive;
            }
            None => unique.push(member),
        }
    }
    unique
}

/// Turns the configured endpoint set into a ranked member list.
pub struct GossipDiscoverer<T: Transport> {
    transport: Arc<T>,
    settings: Arc<ConnectionSettings>,
}

impl<T: Transport> GossipDiscoverer<T> {
    /// Create a discoverer.
    pub fn new(transport: Arc<T>, settings: Arc<ConnectionSettings>) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Run one discovery call: up to `maxDiscoverAttempts` rounds over the seeds.
    #[tracing::instrument(skip(self))]
    pub async fn discover(&self) -> Result<Vec<ClusterMember>, DiscoveryError> {
        let seeds = match self.settings.endpoints() {
            EndpointSet::SingleNode(endpoint) => {
                return Ok(vec![ClusterMember::new(
                    endpoint.clone(),
                    MemberRole::Leader,
                    true,
                )]);
            }
            EndpointSet::Cluster(seeds) => seeds,
        };

        let max_attempts = self.settings.max_discover_attempts();
        let timeout = self.settings.discovery_timeout();
        let mut last_error = String::from("no gossip seeds configured");

        for attempt in 1..=max_attempts {
            for candidate in seeds {
                let query = self.transport.read_gossip(candidate, timeout);
                match tokio::time::timeout(timeout, query).await {
                    Ok(Ok(members)) if !members.is_empty() => {
                        let members = dedupe_members(members);
                        tracing::debug!(
                            %candidate,
                            attempt,
                            members = members.len(),
                            "gossip answered"
                        );
                        return Ok(members);
                    }
                    Ok(Ok(_)) => {
                        last_error = format!("{candidate}: reported no members");
                    }
                    Ok(Err(status)) => {
                        last_error = format!("{candidate}: {}", status.message());
                    }
                    Err(_) => {
                        last_error = format!("{candidate}: gossip timed out after {timeout:?}");
                    }
                }
                tracing::debug!(%candidate, attempt, error = %last_error, "gossip candidate failed");
            }

            if attempt < max_attempts {
                tracing::info!(
                    attempt,
                    max_attempts,
                    "discovery round failed, retrying in {:?}",
                    self.settings.discovery_retry_interval()
                );
                tokio::time::sleep(self.settings.discovery_retry_interval()).await;
            }
        }

        tracing::warn!(attempts = max_attempts, error = %last_error, "cluster discovery exhausted");
        Err(DiscoveryError {
            attempts: max_attempts,
            last_error,
        })
    }
}
