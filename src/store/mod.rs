//! Store-gateway client surface
//!
//! The store-gateway is an external collaborator: this module defines the
//! request/response model the coordinator speaks and the trait a transport
//! implements. A `series` call returns a stream of frames multiplexing
//! series data, non-fatal warnings, and the hints naming which blocks the
//! replica actually consulted. The hints are authoritative for the
//! consistency check; a replica assigned a block it no longer has simply
//! does not hint it.

mod pool;
mod replica_set;

pub use pool::{StoreClientFactory, StoreClientPool};
pub use replica_set::{BalancingStrategy, ClientAssignment, StoreSet};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::block::BlockId;
use crate::series::{LabelMatcher, Series};
use crate::Result;

/// How a replica must behave when it cannot serve all matched blocks.
/// The coordinator always requires `Abort`: a replica silently skipping
/// blocks would defeat the consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialResponseStrategy {
    #[default]
    Abort,
    Warn,
}

/// Streaming series request sent to one replica.
#[derive(Debug, Clone)]
pub struct SeriesRequest {
    pub min_t: i64,
    pub max_t: i64,
    pub matchers: Vec<LabelMatcher>,
    /// Return label sets only, without chunk payloads
    pub skip_chunks: bool,
    /// Restrict the replica to these blocks
    pub block_ids: Vec<BlockId>,
    pub partial_response: PartialResponseStrategy,
}

/// Hint frame: the blocks a replica actually consulted. IDs stay in wire
/// form here; the coordinator parses them and treats unparsable IDs as an
/// internal error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueriedBlocksHint {
    pub queried_blocks: Vec<String>,
}

/// One frame of a series stream.
#[derive(Debug, Clone)]
pub enum SeriesFrame {
    Series(Series),
    Warning(String),
    Hints(QueriedBlocksHint),
}

/// Boxed frame stream returned by a replica.
pub type SeriesStream = BoxStream<'static, Result<SeriesFrame>>;

/// Label names request sent to one replica.
#[derive(Debug, Clone)]
pub struct LabelNamesRequest {
    pub min_t: i64,
    pub max_t: i64,
    pub matchers: Vec<LabelMatcher>,
    pub block_ids: Vec<BlockId>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelNamesResponse {
    pub names: Vec<String>,
    pub warnings: Vec<String>,
    pub hints: QueriedBlocksHint,
}

/// Label values request sent to one replica.
#[derive(Debug, Clone)]
pub struct LabelValuesRequest {
    pub min_t: i64,
    pub max_t: i64,
    pub label: String,
    pub matchers: Vec<LabelMatcher>,
    pub block_ids: Vec<BlockId>,
}

#[derive(Debug, Clone, Default)]
pub struct LabelValuesResponse {
    pub values: Vec<String>,
    pub warnings: Vec<String>,
    pub hints: QueriedBlocksHint,
}

/// Client used to query one backend store-gateway. The tenant travels with
/// every call as request metadata.
#[async_trait]
pub trait StoreGatewayClient: Send + Sync {
    /// Address of the remote store-gateway; uniquely identifies a backend
    /// instance within the exclusion maps.
    fn remote_address(&self) -> &str;

    /// Open a streaming series query.
    async fn series(&self, tenant: &str, req: SeriesRequest) -> Result<SeriesStream>;

    async fn label_names(&self, tenant: &str, req: LabelNamesRequest)
        -> Result<LabelNamesResponse>;

    async fn label_values(
        &self,
        tenant: &str,
        req: LabelValuesRequest,
    ) -> Result<LabelValuesResponse>;
}
