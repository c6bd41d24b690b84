//! The network seam.
//!
//! Everything that touches a socket goes through [`Transport`]: building a
//! channel, issuing a unary call on it, and reading gossip from a candidate
//! node. [`GrpcTransport`] is the tonic implementation; tests substitute an
//! in-memory transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::uri::PathAndQuery;
use tonic::codec::ProstCodec;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint as TonicEndpoint};
use tonic::{Request, Response, Status};

use crate::codec::RawCodec;
use crate::error::{ChannelError, ClientError};
use crate::gossip::{proto, ClusterMember};
use crate::settings::{ConnectionSettings, Endpoint};

/// Gossip read method path.
pub const GOSSIP_READ_METHOD: &str = "/event_store.client.gossip.Gossip/Read";

/// Network operations used by the client core.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// A live connection to one endpoint. Cloning must be cheap and share the
    /// underlying connection.
    type Channel: Clone + Send + Sync + 'static;

    /// Build (and handshake) a channel to `endpoint`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Channel, ChannelError>;

    /// Issue a unary call with an already-serialized request body.
    async fn unary(
        &self,
        channel: &Self::Channel,
        method: &str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status>;

    /// Ask `candidate` for the cluster membership as it sees it.
    async fn read_gossip(
        &self,
        candidate: &Endpoint,
        timeout: Duration,
    ) -> Result<Vec<ClusterMember>, Status>;
}

/// Where a TLS channel gets the certificates it verifies servers against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustRoots {
    /// No TLS; nothing is verified.
    Plaintext,
    /// The platform's native root store (tonic `tls-roots`).
    Platform,
    /// Only the configured CA certificate.
    Pem,
}

/// gRPC channel configuration fixed at channel-build time.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Use TLS.
    pub tls: bool,
    /// PEM root certificate. When absent, TLS channels trust the platform's
    /// native root store.
    pub root_certificate: Option<Vec<u8>>,
    /// Connection (handshake) timeout.
    pub connect_timeout: Duration,
    /// HTTP/2 keepalive interval.
    pub keepalive_interval: Duration,
    /// How long to wait for a keepalive ack.
    pub keepalive_timeout: Duration,
}

impl ChannelConfig {
    /// Derive channel configuration from settings, reading the CA file if one is set.
    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self, ClientError> {
        let root_certificate = match settings.tls_ca_file() {
            Some(path) => Some(std::fs::read(path).map_err(|source| ClientError::Io {
                path: path.clone(),
                source,
            })?),
            None => None,
        };

        Ok(Self {
            tls: settings.tls(),
            root_certificate,
            connect_timeout: settings.discovery_timeout(),
            keepalive_interval: settings.keep_alive_interval(),
            keepalive_timeout: settings.keep_alive_timeout(),
        })
    }

    /// Trust anchors channels built from this configuration use.
    #[must_use]
    pub fn trust_roots(&self) -> TrustRoots {
        match (self.tls, &self.root_certificate) {
            (false, _) => TrustRoots::Plaintext,
            (true, None) => TrustRoots::Platform,
            (true, Some(_)) => TrustRoots::Pem,
        }
    }

    fn endpoint(&self, endpoint: &Endpoint) -> Result<TonicEndpoint, ChannelError> {
        let invalid = |source| ChannelError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            source,
        };

        let mut builder = TonicEndpoint::from_shared(endpoint.uri(self.tls))
            .map_err(invalid)?
            .connect_timeout(self.connect_timeout)
            .http2_keep_alive_interval(self.keepalive_interval)
            .keep_alive_timeout(self.keepalive_timeout)
            .keep_alive_while_idle(true);

        let tls = ClientTlsConfig::new().domain_name(endpoint.host.clone());
        let tls = match (self.trust_roots(), &self.root_certificate) {
            (TrustRoots::Plaintext, _) => None,
            (TrustRoots::Pem, Some(pem)) => Some(tls.ca_certificate(Certificate::from_pem(pem))),
            // native roots are loaded by tonic's `tls-roots` feature
            _ => Some(tls),
        };
        if let Some(tls) = tls {
            builder = builder.tls_config(tls).map_err(invalid)?;
        }

        Ok(builder)
    }
}

/// tonic-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    config: ChannelConfig,
}

impl GrpcTransport {
    /// Create a transport with the given channel configuration.
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }

    /// Create a transport from client settings.
    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self, ClientError> {
        Ok(Self::new(ChannelConfig::from_settings(settings)?))
    }
}

fn method_path(method: &str) -> Result<PathAndQuery, Status> {
    method
        .parse::<PathAndQuery>()
        .map_err(|e| Status::invalid_argument(format!("invalid method path '{method}': {e}")))
}

#[async_trait]
impl Transport for GrpcTransport {
    type Channel = Channel;

    #[tracing::instrument(skip(self), fields(tls = self.config.tls))]
    async fn connect(&self, endpoint: &Endpoint) -> Result<Channel, ChannelError> {
        let channel = self
            .config
            .endpoint(endpoint)?
            .connect()
            .await
            .map_err(|e| ChannelError::Connect {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;
        tracing::debug!(%endpoint, "channel connected");
        Ok(channel)
    }

    async fn unary(
        &self,
        channel: &Channel,
        method: &str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        let path = method_path(method)?;
        let mut grpc = tonic::client::Grpc::new(channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("channel not ready: {e}")))?;
        grpc.unary(request, path, RawCodec).await
    }

    async fn read_gossip(
        &self,
        candidate: &Endpoint,
        timeout: Duration,
    ) -> Result<Vec<ClusterMember>, Status> {
        let channel = self
            .connect(candidate)
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("channel not ready: {e}")))?;

        let mut request = Request::new(proto::Empty {});
        request.set_timeout(timeout);

        let codec: ProstCodec<proto::Empty, proto::ClusterInfo> = ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(GOSSIP_READ_METHOD), codec)
            .await?;

        Ok(response
            .into_inner()
            .members
            .into_iter()
            .filter_map(ClusterMember::from_proto)
            .collect())
    }
}
