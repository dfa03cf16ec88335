//! Error types for Strata

use crate::block::BlockId;

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which per-query limit was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Distinct series fingerprints fetched from store-gateways
    Series,
    /// Total chunks fetched from store-gateways
    Chunks,
    /// Total chunk bytes fetched from store-gateways
    ChunkBytes,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitKind::Series => write!(f, "series"),
            LimitKind::Chunks => write!(f, "chunks"),
            LimitKind::ChunkBytes => write!(f, "chunk bytes"),
        }
    }
}

/// Error types for Strata
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Object store errors
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// The block catalog for a tenant has not been refreshed recently enough
    /// to be trusted for query planning.
    #[error("the bucket index for tenant {tenant} is too old (last updated at unix time {updated_at}) and cannot be trusted")]
    IndexStale { tenant: String, updated_at: i64 },
    /// The ring cannot cover the requested blocks after applying exclusions.
    #[error("no store-gateway instance left for blocks: {}", format_block_ids(block_ids))]
    NoReplicasForBlocks { block_ids: Vec<BlockId> },
    /// Some expected blocks were never reported as queried, even after all
    /// retry attempts.
    #[error("the consistency check failed because some blocks were not queried: {}", format_block_ids(missing))]
    ConsistencyCheckFailed { missing: Vec<BlockId> },
    /// A per-query resource limit was breached. Never retried.
    #[error("the query exceeded the maximum number of {kind} fetched from store-gateways (limit: {limit}, observed: {observed})")]
    LimitExceeded {
        kind: LimitKind,
        limit: u64,
        observed: u64,
    },
    /// A store-gateway could not be dialed. Handled internally by the retry
    /// loop; surfaces only through the consistency check once attempts are
    /// exhausted.
    #[error("store-gateway {addr} unavailable: {reason}")]
    ReplicaUnavailable { addr: String, reason: String },
    /// The caller cancelled the request
    #[error("query cancelled")]
    Cancelled,
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

fn format_block_ids(ids: &[BlockId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
