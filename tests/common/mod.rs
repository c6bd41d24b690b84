//! In-memory transport for exercising the call path without a server.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tonic::metadata::MetadataValue;
use tonic::{Request, Response, Status};

use esdb_client::error::ChannelError;
use esdb_client::{ClusterMember, ConnectionSettings, Endpoint, MemberRole, Transport};

/// Scripted answer to a gossip read.
#[derive(Debug, Clone)]
pub enum GossipAnswer {
    Members(Vec<ClusterMember>),
    Fail(Status),
    Hang,
}

/// Scripted answer to a unary call.
#[derive(Debug, Clone)]
pub enum UnaryAnswer {
    Ok(Bytes),
    Fail(Status),
    Hang,
}

/// One unary call as the transport saw it.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub endpoint: Endpoint,
    pub channel_id: usize,
    pub method: String,
    pub body: Bytes,
    pub authorization: Option<String>,
    pub requires_leader: Option<String>,
    pub grpc_timeout: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FakeChannel {
    pub endpoint: Endpoint,
    pub id: usize,
}

#[derive(Default)]
struct Script {
    gossip: HashMap<Endpoint, GossipAnswer>,
    gossip_once: HashMap<Endpoint, VecDeque<GossipAnswer>>,
    unary: HashMap<Endpoint, UnaryAnswer>,
    unary_once: HashMap<Endpoint, VecDeque<UnaryAnswer>>,
    refuse: Vec<Endpoint>,
    broken_channels: Vec<usize>,
    calls: Vec<RecordedCall>,
}

#[derive(Default)]
pub struct FakeTransport {
    script: Mutex<Script>,
    connect_delay: Option<Duration>,
    pub connects: AtomicUsize,
    pub gossip_calls: AtomicUsize,
    pub unary_calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `connect` take `delay`.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Answer every gossip read on `endpoint` with `answer`.
    pub fn gossip(&self, endpoint: &Endpoint, answer: GossipAnswer) -> &Self {
        self.script
            .lock()
            .unwrap()
            .gossip
            .insert(endpoint.clone(), answer);
        self
    }

    /// Answer the next gossip read on `endpoint` with `answer`.
    pub fn gossip_once(&self, endpoint: &Endpoint, answer: GossipAnswer) -> &Self {
        self.script
            .lock()
            .unwrap()
            .gossip_once
            .entry(endpoint.clone())
            .or_default()
            .push_back(answer);
        self
    }

    /// Answer every unary call on `endpoint` with `answer`.
    pub fn respond(&self, endpoint: &Endpoint, answer: UnaryAnswer) -> &Self {
        self.script
            .lock()
            .unwrap()
            .unary
            .insert(endpoint.clone(), answer);
        self
    }

    /// Answer the next unary call on `endpoint` with `answer`.
    pub fn respond_once(&self, endpoint: &Endpoint, answer: UnaryAnswer) -> &Self {
        self.script
            .lock()
            .unwrap()
            .unary_once
            .entry(endpoint.clone())
            .or_default()
            .push_back(answer);
        self
    }

    /// Fail every `connect` to `endpoint`.
    pub fn refuse(&self, endpoint: &Endpoint) -> &Self {
        self.script.lock().unwrap().refuse.push(endpoint.clone());
        self
    }

    /// Fail every call made on channel `id` with `UNAVAILABLE`.
    pub fn break_channel(&self, id: usize) -> &Self {
        self.script.lock().unwrap().broken_channels.push(id);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn called_hosts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.endpoint.host).collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn gossip_calls(&self) -> usize {
        self.gossip_calls.load(Ordering::SeqCst)
    }

    pub fn unary_calls(&self) -> usize {
        self.unary_calls.load(Ordering::SeqCst)
    }
}

fn header(request: &Request<Bytes>, key: &str) -> Option<String> {
    request
        .metadata()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl Transport for FakeTransport {
    type Channel = FakeChannel;

    async fn connect(&self, endpoint: &Endpoint) -> Result<FakeChannel, ChannelError> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let id = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        if self.script.lock().unwrap().refuse.contains(endpoint) {
            return Err(ChannelError::Connect {
                endpoint: endpoint.clone(),
                message: "connection refused".into(),
            });
        }
        Ok(FakeChannel {
            endpoint: endpoint.clone(),
            id,
        })
    }

    async fn unary(
        &self,
        channel: &FakeChannel,
        method: &str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        self.unary_calls.fetch_add(1, Ordering::SeqCst);
        let answer = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(RecordedCall {
                endpoint: channel.endpoint.clone(),
                channel_id: channel.id,
                method: method.to_string(),
                body: request.get_ref().clone(),
                authorization: header(&request, "authorization"),
                requires_leader: header(&request, "requires-leader"),
                grpc_timeout: header(&request, "grpc-timeout"),
            });
            if script.broken_channels.contains(&channel.id) {
                UnaryAnswer::Fail(Status::unavailable("connection reset"))
            } else {
                let queued = script
                    .unary_once
                    .get_mut(&channel.endpoint)
                    .and_then(VecDeque::pop_front);
                queued
                    .or_else(|| script.unary.get(&channel.endpoint).cloned())
                    .unwrap_or(UnaryAnswer::Ok(Bytes::new()))
            }
        };

        match answer {
            UnaryAnswer::Ok(body) => Ok(Response::new(body)),
            UnaryAnswer::Fail(status) => Err(status),
            UnaryAnswer::Hang => std::future::pending().await,
        }
    }

    async fn read_gossip(
        &self,
        candidate: &Endpoint,
        _timeout: Duration,
    ) -> Result<Vec<ClusterMember>, Status> {
        self.gossip_calls.fetch_add(1, Ordering::SeqCst);
        let answer = {
            let mut script = self.script.lock().unwrap();
            let queued = script
                .gossip_once
                .get_mut(candidate)
                .and_then(VecDeque::pop_front);
            queued
                .or_else(|| script.gossip.get(candidate).cloned())
                .unwrap_or_else(|| GossipAnswer::Fail(Status::unavailable("connection refused")))
        };

        match answer {
            GossipAnswer::Members(members) => Ok(members),
            GossipAnswer::Fail(status) => Err(status),
            GossipAnswer::Hang => std::future::pending().await,
        }
    }
}

pub fn node(host: &str) -> Endpoint {
    Endpoint::new(host, 2113)
}

pub fn member(host: &str, role: MemberRole, alive: bool) -> ClusterMember {
    ClusterMember::new(node(host), role, alive)
}

/// nodeA follower, nodeB leader, nodeC follower.
pub fn three_node_cluster() -> Vec<ClusterMember> {
    vec![
        member("nodeA", MemberRole::Follower, true),
        member("nodeB", MemberRole::Leader, true),
        member("nodeC", MemberRole::Follower, true),
    ]
}

pub fn single_node_settings() -> ConnectionSettings {
    ConnectionSettings::builder()
        .single_node(node("localhost"))
        .tls(false)
        .build()
        .unwrap()
}

pub fn cluster_settings(hosts: &[&str]) -> esdb_client::settings::ConnectionSettingsBuilder {
    ConnectionSettings::builder()
        .cluster(hosts.iter().map(|h| node(h)))
        .tls(false)
        .discovery_timeout(Duration::from_secs(1))
        .discovery_retry_interval(Duration::from_millis(100))
}

pub fn not_leader(leader: Option<&Endpoint>) -> Status {
    let mut status = Status::not_found("Leader info available");
    status
        .metadata_mut()
        .insert("exception", MetadataValue::from_static("not-leader"));
    if let Some(leader) = leader {
        status
            .metadata_mut()
            .insert("leader-endpoint-host", leader.host.parse().unwrap());
        status
            .metadata_mut()
            .insert("leader-endpoint-port", leader.port.to_string().parse().unwrap());
    }
    status
}

pub fn wrong_expected_version(stream: &str, expected: &str, actual: &str) -> Status {
    let mut status = Status::failed_precondition("Wrong expected version");
    let metadata = status.metadata_mut();
    metadata.insert("exception", MetadataValue::from_static("wrong-expected-version"));
    metadata.insert("stream-name", stream.parse().unwrap());
    metadata.insert("expected-version", expected.parse().unwrap());
    metadata.insert("actual-version", actual.parse().unwrap());
    status
}
