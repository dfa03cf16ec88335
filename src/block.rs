//! Block descriptors and deletion marks
//!
//! Blocks are immutable, time-bounded units of compacted series data living
//! in object storage. They are identified by a 128-bit ID whose canonical
//! string form (fixed-width lowercase hex) sorts lexicographically in the
//! same order as the numeric value.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hashing::fnv32a;
use crate::{Error, Result};

/// 128-bit block identifier with a lexicographic canonical encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u128);

impl BlockId {
    pub const fn from_u128(v: u128) -> Self {
        Self(v)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }

    /// Parse the canonical 32-character hex form.
    pub fn parse(s: &str) -> Result<Self> {
        if s.len() != 32 {
            return Err(Error::Internal(format!(
                "malformed block ID '{s}': expected 32 hex characters"
            )));
        }
        let v = u128::from_str_radix(s, 16)
            .map_err(|e| Error::Internal(format!("malformed block ID '{s}': {e}")))?;
        Ok(Self(v))
    }

    /// Ring token for this block, used to locate the store-gateway replicas
    /// that should have it loaded.
    pub fn ring_token(&self) -> u32 {
        fnv32a([self.to_string().as_bytes()])
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl std::str::FromStr for BlockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockId::parse(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

/// A compactor shard identifier in `index_of_count` form (e.g. `1_of_4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactorShardId {
    pub index: u64,
    pub count: u64,
}

impl CompactorShardId {
    /// Parse the `i_of_n` label value written by the split-and-merge
    /// compactor. Indexes are zero-based and must be below the count.
    pub fn parse(s: &str) -> Result<Self> {
        let (index, count) = s
            .split_once("_of_")
            .ok_or_else(|| Error::Internal(format!("invalid shard ID '{s}': expected 'i_of_n'")))?;
        let index: u64 = index
            .parse()
            .map_err(|e| Error::Internal(format!("invalid shard index in '{s}': {e}")))?;
        let count: u64 = count
            .parse()
            .map_err(|e| Error::Internal(format!("invalid shard count in '{s}': {e}")))?;
        if count == 0 {
            return Err(Error::Internal(format!(
                "invalid shard ID '{s}': count must be at least 1"
            )));
        }
        if index >= count {
            return Err(Error::Internal(format!(
                "invalid shard ID '{s}': index must be below count"
            )));
        }
        Ok(Self { index, count })
    }
}

impl std::fmt::Display for CompactorShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_of_{}", self.index, self.count)
    }
}

/// Descriptor of one immutable block, as listed by the block catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block ID
    pub id: BlockId,
    /// Minimum sample timestamp in the block, milliseconds, inclusive
    pub min_t: i64,
    /// Maximum sample timestamp in the block, milliseconds, inclusive
    pub max_t: i64,
    /// Shard ID assigned by the split-and-merge compactor, if any. Kept as
    /// the raw label value; blocks with an unparsable value are always
    /// queried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compactor_shard_id: Option<String>,
    /// When the block was uploaded to the bucket, unix seconds
    pub uploaded_at: i64,
}

impl Block {
    /// Whether this block may contain samples within `[min_t, max_t]`
    /// (milliseconds, both inclusive).
    pub fn overlaps(&self, min_t: i64, max_t: i64) -> bool {
        self.max_t >= min_t && self.min_t <= max_t
    }
}

/// Sort blocks by max time descending, the order the finder contract
/// requires. Ties are broken by ID so the output is total.
pub fn sort_blocks_by_max_t_desc(blocks: &mut [Block]) {
    blocks.sort_by(|a, b| b.max_t.cmp(&a.max_t).then_with(|| a.id.cmp(&b.id)));
}

/// Tombstone indicating a block is going away and should be ignored after a
/// grace period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionMark {
    /// Block ID the mark applies to
    pub id: BlockId,
    /// When the block was marked for deletion, unix seconds
    pub marked_at: i64,
}
