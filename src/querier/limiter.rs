//! Per-query resource limiter
//!
//! Three counters shared by all replica streams of one request: distinct
//! series fingerprints, chunk count, and chunk bytes. Checked after every
//! incoming series frame; a breach fails the whole request with a tenant
//! limit error, never a retryable one.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::series::Labels;
use crate::{Error, LimitKind, Result};

/// Tracks per-query resource consumption across concurrent replica
/// streams. A limit of zero disables the corresponding counter.
#[derive(Debug, Default)]
pub struct QueryLimiter {
    max_series: u64,
    max_chunks: u64,
    max_chunk_bytes: u64,

    series_fingerprints: Mutex<HashSet<u64>>,
    chunks: AtomicU64,
    chunk_bytes: AtomicU64,
}

impl QueryLimiter {
    pub fn new(max_series: u64, max_chunks: u64, max_chunk_bytes: u64) -> Self {
        Self {
            max_series,
            max_chunks,
            max_chunk_bytes,
            ..Default::default()
        }
    }

    /// Record one series. Series seen on multiple replicas count once,
    /// keyed by label fingerprint.
    pub fn add_series(&self, labels: &Labels) -> Result<()> {
        if self.max_series == 0 {
            return Ok(());
        }

        let mut fingerprints = self.series_fingerprints.lock();
        fingerprints.insert(labels.fingerprint());
        let observed = fingerprints.len() as u64;
        if observed > self.max_series {
            return Err(Error::LimitExceeded {
                kind: LimitKind::Series,
                limit: self.max_series,
                observed,
            });
        }
        Ok(())
    }

    pub fn add_chunks(&self, count: u64) -> Result<()> {
        if self.max_chunks == 0 {
            return Ok(());
        }

        let observed = self.chunks.fetch_add(count, Ordering::Relaxed) + count;
        if observed > self.max_chunks {
            return Err(Error::LimitExceeded {
                kind: LimitKind::Chunks,
                limit: self.max_chunks,
                observed,
            });
        }
        Ok(())
    }

    pub fn add_chunk_bytes(&self, bytes: u64) -> Result<()> {
        if self.max_chunk_bytes == 0 {
            return Ok(());
        }

        let observed = self.chunk_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        if observed > self.max_chunk_bytes {
            return Err(Error::LimitExceeded {
                kind: LimitKind::ChunkBytes,
                limit: self.max_chunk_bytes,
                observed,
            });
        }
        Ok(())
    }
}
