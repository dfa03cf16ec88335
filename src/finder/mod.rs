//! Block discovery for the query path
//!
//! Given `(tenant, min_t, max_t)` a finder returns the candidate blocks and
//! their deletion marks. Two implementations share the contract: the
//! bucket-index finder reads the per-tenant index object, the scan finder
//! enumerates the bucket directly. Both refuse to answer from a catalog
//! that is staler than the configured bound, because planning a query
//! against a stale catalog would make the consistency check meaningless.

mod bucket_index;
mod scan;

pub use bucket_index::{BucketIndexFinder, BucketIndexFinderConfig};
pub use scan::{BucketScanFinder, BucketScanFinderConfig};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::block::{sort_blocks_by_max_t_desc, Block, BlockId, DeletionMark};
use crate::Result;

/// Finder contract: candidate blocks for a tenant and time range, sorted by
/// max time descending, together with the deletion marks of all known
/// blocks.
#[async_trait]
pub trait BlocksFinder: Send + Sync {
    async fn get_blocks(
        &self,
        tenant: &str,
        min_t: i64,
        max_t: i64,
    ) -> Result<(Vec<Block>, HashMap<BlockId, DeletionMark>)>;
}

/// Shared post-processing for both finder variants: drop blocks outside the
/// range, drop blocks whose deletion mark is older than the ignore delay,
/// sort the survivors, and index the marks by block ID.
fn select_blocks(
    blocks: &[Block],
    marks: &[DeletionMark],
    min_t: i64,
    max_t: i64,
    ignore_deletion_marks_delay: Duration,
    now_unix_secs: i64,
) -> (Vec<Block>, HashMap<BlockId, DeletionMark>) {
    let marks_by_id: HashMap<BlockId, DeletionMark> =
        marks.iter().map(|m| (m.id, *m)).collect();

    let delay_secs = ignore_deletion_marks_delay.as_secs() as i64;
    let mut matching: Vec<Block> = blocks
        .iter()
        .filter(|b| b.overlaps(min_t, max_t))
        .filter(|b| match marks_by_id.get(&b.id) {
            Some(mark) => now_unix_secs - mark.marked_at <= delay_secs,
            None => true,
        })
        .cloned()
        .collect();

    sort_blocks_by_max_t_desc(&mut matching);
    (matching, marks_by_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;

    fn block(id: u128, min_t: i64, max_t: i64) -> Block {
        Block {
            id: BlockId::from_u128(id),
            min_t,
            max_t,
            compactor_shard_id: None,
            uploaded_at: 0,
        }
    }

    #[test]
    fn selection_filters_by_range_and_sorts_desc() {
        let blocks = vec![block(1, 0, 100), block(2, 50, 300), block(3, 400, 500)];

        let (selected, _) = select_blocks(&blocks, &[], 0, 350, Duration::from_secs(600), 1000);
        let ids: Vec<u128> = selected.iter().map(|b| b.id.as_u128()).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn old_deletion_marks_remove_blocks_young_marks_keep_them() {
        let blocks = vec![block(1, 0, 100), block(2, 0, 100)];
        let marks = vec![
            DeletionMark {
                id: BlockId::from_u128(1),
                marked_at: 0,
            },
            DeletionMark {
                id: BlockId::from_u128(2),
                marked_at: 950,
            },
        ];

        let (selected, marks_by_id) =
            select_blocks(&blocks, &marks, 0, 100, Duration::from_secs(600), 1000);
        let ids: Vec<u128> = selected.iter().map(|b| b.id.as_u128()).collect();
        // Block 1 was marked 1000s ago (> 600s delay): gone. Block 2 was
        // marked 50s ago: still expected.
        assert_eq!(ids, vec![2]);
        assert_eq!(marks_by_id.len(), 2);
    }
}
