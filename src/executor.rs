//! The single choke point for remote calls.
//!
//! [`CallExecutor::execute`] resolves an endpoint (discovery + selection,
//! cached for `membership_ttl`), leases a channel, attaches credentials,
//! deadline and cancellation, and issues the call. Failures are classified:
//!
//! ```text
//! Unavailable ──first time──> invalidate channel generation, rediscover, retry
//! NotLeader   ──first time──> reselect (leader hint, else rediscover), retry
//! anything else, or a second failure of the same kind ──> caller
//! ```
//!
//! Topology refreshes are epoch-tagged. A caller asking to refresh from an
//! epoch that has already been superseded reuses the newer result, so callers
//! failing together share one gossip round.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::Request;

use crate::channel::{ChannelManager, LeasedChannel};
use crate::error::{CommandError, ErrorKind, SelectionError, UnavailableError};
use crate::gossip::{ClusterMember, GossipDiscoverer, MemberRole};
use crate::selection::select_node;
use crate::settings::{ConnectionSettings, Credentials, Endpoint, NodePreference};
use crate::transport::Transport;

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Deadline for this call; falls back to the client default.
    pub deadline: Option<Duration>,
    /// Credentials for this call; fall back to the client default.
    pub credentials: Option<Credentials>,
    /// Cancels only this call.
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    /// Set the deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// The endpoint chosen for the next call, tagged with the topology epoch it
/// was selected in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedEndpoint {
    /// Target address.
    pub endpoint: Endpoint,
    /// Topology epoch of the selection.
    pub epoch: u64,
}

struct Snapshot {
    members: Vec<ClusterMember>,
    selected: Endpoint,
    refreshed_at: Instant,
}

struct TopologyState {
    snapshot: Option<Snapshot>,
    epoch: u64,
}

/// Cached membership and selection shared by every call.
pub struct Topology<T: Transport> {
    discoverer: GossipDiscoverer<T>,
    settings: Arc<ConnectionSettings>,
    state: Mutex<TopologyState>,
    rounds: AtomicU64,
}

impl<T: Transport> Topology<T> {
    /// Create an empty cache.
    pub fn new(transport: Arc<T>, settings: Arc<ConnectionSettings>) -> Self {
        Self {
            discoverer: GossipDiscoverer::new(transport, Arc::clone(&settings)),
            settings,
            state: Mutex::new(TopologyState {
                snapshot: None,
                epoch: 0,
            }),
            rounds: AtomicU64::new(0),
        }
    }

    /// Current selection, refreshing it if absent or older than the TTL.
    pub async fn resolve(&self) -> Result<SelectedEndpoint, CommandError> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state).await
    }

    async fn resolve_locked(
        &self,
        state: &mut TopologyState,
    ) -> Result<SelectedEndpoint, CommandError> {
        if let Some(snapshot) = &state.snapshot {
            let fresh = !self.settings.endpoints().is_cluster()
                || snapshot.refreshed_at.elapsed() < self.settings.membership_ttl();
            if fresh {
                return Ok(SelectedEndpoint {
                    endpoint: snapshot.selected.clone(),
                    epoch: state.epoch,
                });
            }
        }
        self.refresh_locked(state).await
    }

    /// Force a discovery round unless one already completed after `observed_epoch`.
    pub async fn rediscover(&self, observed_epoch: u64) -> Result<SelectedEndpoint, CommandError> {
        let mut state = self.state.lock().await;
        if state.epoch != observed_epoch {
            if let Some(snapshot) = &state.snapshot {
                tracing::debug!(
                    observed_epoch,
                    epoch = state.epoch,
                    "joining newer topology"
                );
                return Ok(SelectedEndpoint {
                    endpoint: snapshot.selected.clone(),
                    epoch: state.epoch,
                });
            }
        }
        self.refresh_locked(&mut state).await
    }

    /// Point the selection at a leader reported by a `NotLeader` answer,
    /// keeping the cached membership.
    pub async fn follow_leader_hint(
        &self,
        observed_epoch: u64,
        leader: Endpoint,
    ) -> SelectedEndpoint {
        let mut state = self.state.lock().await;
        if state.epoch != observed_epoch {
            if let Some(snapshot) = &state.snapshot {
                return SelectedEndpoint {
                    endpoint: snapshot.selected.clone(),
                    epoch: state.epoch,
                };
            }
        }

        state.epoch += 1;
        let epoch = state.epoch;
        let mut members = state
            .snapshot
            .take()
            .map(|s| s.members)
            .unwrap_or_default();
        for member in &mut members {
            if member.role == MemberRole::Leader {
                member.role = MemberRole::Unknown;
            }
        }
        match members.iter_mut().find(|m| m.endpoint == leader) {
            Some(member) => {
                member.role = MemberRole::Leader;
                member.is_alive = true;
            }
            None => members.push(ClusterMember::new(leader.clone(), MemberRole::Leader, true)),
        }
        tracing::info!(%leader, epoch, "following leader hint");
        state.snapshot = Some(Snapshot {
            members,
            selected: leader.clone(),
            refreshed_at: Instant::now(),
        });
        SelectedEndpoint {
            endpoint: leader,
            epoch,
        }
    }

    /// Membership from the most recent round, discovering if there is none.
    pub async fn members(&self) -> Result<Vec<ClusterMember>, CommandError> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state).await?;
        Ok(state
            .snapshot
            .as_ref()
            .map(|s| s.members.clone())
            .unwrap_or_default())
    }

    /// Number of discovery rounds run so far.
    #[must_use]
    pub fn discovery_rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    async fn refresh_locked(
        &self,
        state: &mut TopologyState,
    ) -> Result<SelectedEndpoint, CommandError> {
        let preference = self.settings.node_preference();
        let mut second_chance = true;

        loop {
            self.rounds.fetch_add(1, Ordering::Relaxed);
            let members = match self.discoverer.discover().await {
                Ok(members) => members,
                Err(e) => {
                    state.snapshot = None;
                    return Err(e.into());
                }
            };

            match select_node(&members, preference) {
                Ok(selected) => {
                    state.epoch += 1;
                    tracing::debug!(
                        endpoint = %selected.endpoint,
                        %preference,
                        epoch = state.epoch,
                        "endpoint selected"
                    );
                    state.snapshot = Some(Snapshot {
                        members,
                        selected: selected.endpoint.clone(),
                        refreshed_at: Instant::now(),
                    });
                    return Ok(SelectedEndpoint {
                        endpoint: selected.endpoint,
                        epoch: state.epoch,
                    });
                }
                Err(SelectionError::NoLeaderAvailable) if second_chance => {
                    second_chance = false;
                    tracing::info!("no alive leader reported, running one more discovery round");
                    tokio::time::sleep(self.settings.discovery_retry_interval()).await;
                }
                Err(e) => {
                    state.snapshot = None;
                    return Err(CommandError::Unavailable(UnavailableError::Selection(e)));
                }
            }
        }
    }
}

/// Issues calls on behalf of every command.
pub struct CallExecutor<T: Transport> {
    settings: Arc<ConnectionSettings>,
    transport: Arc<T>,
    topology: Topology<T>,
    channels: ChannelManager<T>,
    shutdown: CancellationToken,
}

impl<T: Transport> CallExecutor<T> {
    /// Create an executor; no network I/O happens until the first call.
    pub fn new(transport: Arc<T>, settings: Arc<ConnectionSettings>) -> Self {
        Self {
            topology: Topology::new(Arc::clone(&transport), Arc::clone(&settings)),
            channels: ChannelManager::new(Arc::clone(&transport)),
            settings,
            transport,
            shutdown: CancellationToken::new(),
        }
    }

    /// Client settings.
    #[must_use]
    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Shared topology cache.
    #[must_use]
    pub fn topology(&self) -> &Topology<T> {
        &self.topology
    }

    /// Shared channel manager.
    #[must_use]
    pub fn channels(&self) -> &ChannelManager<T> {
        &self.channels
    }

    /// Whether [`CallExecutor::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Execute one unary call and return the raw response body.
    #[tracing::instrument(skip(self, request, options))]
    pub async fn execute(
        &self,
        method: &str,
        request: Bytes,
        options: &CallOptions,
    ) -> Result<Bytes, CommandError> {
        if self.shutdown.is_cancelled() {
            return Err(CommandError::Cancelled);
        }

        let mut retried_unavailable = false;
        let mut retried_not_leader = false;
        let mut target = self.guard(options, self.topology.resolve()).await??;

        loop {
            let (generation, outcome) =
                match self.guard(options, self.channels.acquire(&target.endpoint)).await? {
                    Ok(lease) => {
                        let outcome = self.issue(&lease, method, request.clone(), options).await;
                        (Some(lease.generation), outcome)
                    }
                    Err(e) => (None, Err(CommandError::from(e))),
                };

            let err = match outcome {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            match err.kind() {
                ErrorKind::Unavailable if !retried_unavailable => {
                    retried_unavailable = true;
                    tracing::warn!(
                        endpoint = %target.endpoint,
                        error = %err,
                        "endpoint unavailable, rediscovering and retrying once"
                    );
                    if let Some(generation) = generation {
                        self.channels.invalidate(generation).await;
                    }
                    target = self
                        .guard(options, self.topology.rediscover(target.epoch))
                        .await??;
                }
                ErrorKind::NotLeader if !retried_not_leader => {
                    retried_not_leader = true;
                    let hint = match &err {
                        CommandError::NotLeader { leader } => leader.clone(),
                        _ => None,
                    };
                    tracing::warn!(
                        endpoint = %target.endpoint,
                        leader = ?hint,
                        "not leader, reselecting and retrying once"
                    );
                    target = match hint {
                        Some(leader) => {
                            self.topology
                                .follow_leader_hint(target.epoch, leader)
                                .await
                        }
                        None => {
                            self.guard(options, self.topology.rediscover(target.epoch))
                                .await??
                        }
                    };
                }
                kind => {
                    tracing::debug!(%kind, error = %err, "call failed");
                    return Err(err);
                }
            }
        }
    }

    /// Cancel every in-flight call without waiting for the channel to be released.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    /// Cancel every in-flight call and drop the channel.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.channels.close().await;
        tracing::info!("call executor shut down");
    }

    async fn issue(
        &self,
        lease: &LeasedChannel<T::Channel>,
        method: &str,
        body: Bytes,
        options: &CallOptions,
    ) -> Result<Bytes, CommandError> {
        let deadline = options.deadline.or(self.settings.default_deadline());
        let request = self.build_request(body, options, deadline)?;
        let call = self.transport.unary(&lease.channel, method, request);

        let bounded = async {
            match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, call).await {
                    Ok(result) => result.map_err(CommandError::from_status),
                    Err(_) => Err(CommandError::DeadlineExceeded),
                },
                None => call.await.map_err(CommandError::from_status),
            }
        };

        self.guard(options, bounded)
            .await?
            .map(tonic::Response::into_inner)
    }

    fn build_request(
        &self,
        body: Bytes,
        options: &CallOptions,
        deadline: Option<Duration>,
    ) -> Result<Request<Bytes>, CommandError> {
        let mut request = Request::new(body);
        if let Some(deadline) = deadline {
            request.set_timeout(deadline);
        }

        let credentials = options
            .credentials
            .as_ref()
            .or(self.settings.default_credentials());
        if let Some(credentials) = credentials {
            let value: MetadataValue<Ascii> =
                credentials.basic_auth_header().parse().map_err(|_| {
                    CommandError::PermissionDenied("credentials are not valid header text".into())
                })?;
            request.metadata_mut().insert("authorization", value);
        }

        if self.settings.node_preference() == NodePreference::Leader {
            request
                .metadata_mut()
                .insert("requires-leader", MetadataValue::from_static("true"));
        }

        Ok(request)
    }

    /// Race `fut` against client shutdown and the caller's cancellation token.
    async fn guard<F, R>(&self, options: &CallOptions, fut: F) -> Result<R, CommandError>
    where
        F: std::future::Future<Output = R>,
    {
        let caller_cancelled = async {
            match &options.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CommandError::Cancelled),
            _ = caller_cancelled => Err(CommandError::Cancelled),
            result = fut => Ok(result),
        }
    }
}
