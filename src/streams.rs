//! Stream commands.
//!
//! Commands only build requests and interpret responses; routing, retries,
//! credentials and deadlines are the executor's business.

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;

use crate::error::{CommandError, CommandResult};
use crate::executor::CallOptions;

/// Fully qualified gRPC method for stream deletion.
pub const DELETE_METHOD: &str = "/event_store.client.streams.Streams/Delete";

/// Streams wire messages (`event_store.client.streams`).
pub mod proto {
    #![allow(missing_docs)]

    /// Empty marker message.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Empty {}

    /// Names a stream.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct StreamIdentifier {
        /// UTF-8 stream name.
        #[prost(bytes = "vec", tag = "3")]
        pub stream_name: Vec<u8>,
    }

    /// Delete request.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DeleteReq {
        #[prost(message, optional, tag = "1")]
        pub options: Option<DeleteOptions>,
    }

    /// Delete request options.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DeleteOptions {
        #[prost(message, optional, tag = "1")]
        pub stream_identifier: Option<StreamIdentifier>,
        #[prost(oneof = "ExpectedStreamRevision", tags = "2, 3, 4, 5")]
        pub expected_stream_revision: Option<ExpectedStreamRevision>,
    }

    /// Optimistic concurrency check sent with a delete.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum ExpectedStreamRevision {
        #[prost(uint64, tag = "2")]
        Revision(u64),
        #[prost(message, tag = "3")]
        NoStream(Empty),
        #[prost(message, tag = "4")]
        Any(Empty),
        #[prost(message, tag = "5")]
        StreamExists(Empty),
    }

    /// Delete response.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DeleteResp {
        #[prost(oneof = "DeletePosition", tags = "1, 2")]
        pub position_option: Option<DeletePosition>,
    }

    /// Log position of the delete, when the server reports one.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum DeletePosition {
        #[prost(message, tag = "1")]
        Position(Position),
        #[prost(message, tag = "2")]
        NoPosition(Empty),
    }

    /// Transaction log position.
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Position {
        #[prost(uint64, tag = "1")]
        pub commit_position: u64,
        #[prost(uint64, tag = "2")]
        pub prepare_position: u64,
    }
}

/// Revision the stream must be at for a write or delete to go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpectedRevision {
    /// No check.
    #[default]
    Any,
    /// The stream must not exist.
    NoStream,
    /// The stream must exist, at any revision.
    StreamExists,
    /// The stream must be at exactly this revision.
    Exact(u64),
}

impl ExpectedRevision {
    fn to_proto(self) -> proto::ExpectedStreamRevision {
        match self {
            Self::Any => proto::ExpectedStreamRevision::Any(proto::Empty {}),
            Self::NoStream => proto::ExpectedStreamRevision::NoStream(proto::Empty {}),
            Self::StreamExists => proto::ExpectedStreamRevision::StreamExists(proto::Empty {}),
            Self::Exact(revision) => proto::ExpectedStreamRevision::Revision(revision),
        }
    }
}

/// Options for [`StreamsClient::delete_stream`].
#[derive(Debug, Clone, Default)]
pub struct DeleteStreamOptions {
    /// Concurrency check; defaults to [`ExpectedRevision::Any`].
    pub expected_revision: ExpectedRevision,
    /// Deadline, credentials and cancellation for the call.
    pub call: CallOptions,
}

impl DeleteStreamOptions {
    /// Require the stream to be at `revision`.
    #[must_use]
    pub fn expected_revision(mut self, revision: ExpectedRevision) -> Self {
        self.expected_revision = revision;
        self
    }

    /// Use `call` for deadline, credentials and cancellation.
    #[must_use]
    pub fn call_options(mut self, call: CallOptions) -> Self {
        self.call = call;
        self
    }
}

/// Position in the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Position {
    /// Commit position.
    pub commit: u64,
    /// Prepare position.
    pub prepare: u64,
}

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    /// Where the delete was written, if the server reported it.
    pub position: Option<Position>,
}

/// Stream operations exposed by a client.
#[async_trait]
pub trait StreamsClient {
    /// Soft-delete `stream_name`.
    async fn delete_stream(
        &self,
        stream_name: &str,
        options: &DeleteStreamOptions,
    ) -> CommandResult<DeleteResult>;
}

/// Serialize a delete request.
pub fn encode_delete_request(stream_name: &str, expected: ExpectedRevision) -> Bytes {
    let request = proto::DeleteReq {
        options: Some(proto::DeleteOptions {
            stream_identifier: Some(proto::StreamIdentifier {
                stream_name: stream_name.as_bytes().to_vec(),
            }),
            expected_stream_revision: Some(expected.to_proto()),
        }),
    };
    Bytes::from(request.encode_to_vec())
}

/// Interpret a delete response body.
pub fn decode_delete_response(body: Bytes) -> CommandResult<DeleteResult> {
    let response = proto::DeleteResp::decode(body)
        .map_err(|e| CommandError::Unknown(format!("malformed delete response: {e}")))?;

    let position = match response.position_option {
        Some(proto::DeletePosition::Position(p)) => Some(Position {
            commit: p.commit_position,
            prepare: p.prepare_position,
        }),
        Some(proto::DeletePosition::NoPosition(_)) | None => None,
    };
    Ok(DeleteResult { position })
}
