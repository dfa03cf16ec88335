//! Blocks consistency checker
//!
//! Verifies that every block expected for a query was reported as actually
//! consulted by some replica. Two grace windows keep the check from firing
//! on benign churn: freshly uploaded blocks that store-gateways may not
//! have discovered yet, and blocks recently marked for deletion that
//! replicas are about to unload.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::block::{Block, BlockId, DeletionMark};

/// Checks expected blocks against the queried-block hints.
#[derive(Debug, Clone)]
pub struct ConsistencyChecker {
    /// Blocks uploaded within this window are not required to be queried
    uploaded_grace: Duration,
    /// Blocks marked for deletion longer ago than this are not required
    deletion_grace: Duration,
}

impl ConsistencyChecker {
    /// `consistency_delay` bounds when a freshly uploaded block must appear
    /// on store-gateways; three sync intervals are added on top so a block
    /// uploaded right after a sync still has time to be discovered and
    /// loaded. The deletion grace is half the delay after which finders and
    /// replicas drop marked blocks, splitting the uncertainty window.
    pub fn new(
        consistency_delay: Duration,
        sync_interval: Duration,
        ignore_deletion_marks_delay: Duration,
    ) -> Self {
        Self {
            uploaded_grace: consistency_delay + 3 * sync_interval,
            deletion_grace: ignore_deletion_marks_delay / 2,
        }
    }

    /// The set of blocks still missing: expected, not reported as queried,
    /// and inside neither grace window. `now_unix_secs` is injected so the
    /// decision is reproducible.
    pub fn check(
        &self,
        expected: &[Block],
        deletion_marks: &HashMap<BlockId, DeletionMark>,
        queried: &[BlockId],
        now_unix_secs: i64,
    ) -> Vec<BlockId> {
        let queried: HashSet<&BlockId> = queried.iter().collect();
        let uploaded_grace_secs = self.uploaded_grace.as_secs() as i64;
        let deletion_grace_secs = self.deletion_grace.as_secs() as i64;

        expected
            .iter()
            .filter(|block| !queried.contains(&block.id))
            .filter(|block| now_unix_secs - block.uploaded_at >= uploaded_grace_secs)
            .filter(|block| match deletion_marks.get(&block.id) {
                Some(mark) => now_unix_secs - mark.marked_at < deletion_grace_secs,
                None => true,
            })
            .map(|block| block.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_000_000;

    fn checker() -> ConsistencyChecker {
        // Uploaded grace = 300 + 3*100 = 600s, deletion grace = 300s.
        ConsistencyChecker::new(
            Duration::from_secs(300),
            Duration::from_secs(100),
            Duration::from_secs(600),
        )
    }

    fn block(id: u128, uploaded_ago_secs: i64) -> Block {
        Block {
            id: BlockId::from_u128(id),
            min_t: 0,
            max_t: 1000,
            compactor_shard_id: None,
            uploaded_at: NOW - uploaded_ago_secs,
        }
    }

    fn mark(id: u128, marked_ago_secs: i64) -> (BlockId, DeletionMark) {
        let id = BlockId::from_u128(id);
        (
            id,
            DeletionMark {
                id,
                marked_at: NOW - marked_ago_secs,
            },
        )
    }

    #[test]
    fn queried_blocks_are_never_missing() {
        let expected = vec![block(1, 10_000), block(2, 10_000)];
        let queried = vec![BlockId::from_u128(1), BlockId::from_u128(2)];

        let missing = checker().check(&expected, &HashMap::new(), &queried, NOW);
        assert!(missing.is_empty());
    }

    #[test]
    fn unqueried_old_block_is_missing() {
        let expected = vec![block(1, 10_000)];
        let missing = checker().check(&expected, &HashMap::new(), &[], NOW);
        assert_eq!(missing, vec![BlockId::from_u128(1)]);
    }

    #[test]
    fn freshly_uploaded_block_is_not_required() {
        // Uploaded 500s ago, inside the 600s grace.
        let expected = vec![block(1, 500)];
        let missing = checker().check(&expected, &HashMap::new(), &[], NOW);
        assert!(missing.is_empty());

        // Uploaded exactly at the grace boundary: required.
        let expected = vec![block(2, 600)];
        let missing = checker().check(&expected, &HashMap::new(), &[], NOW);
        assert_eq!(missing, vec![BlockId::from_u128(2)]);
    }

    #[test]
    fn young_deletion_mark_keeps_block_required() {
        // Marked 10s ago, deletion grace is 300s: still required.
        let expected = vec![block(1, 10_000)];
        let marks = HashMap::from([mark(1, 10)]);

        let missing = checker().check(&expected, &marks, &[], NOW);
        assert_eq!(missing, vec![BlockId::from_u128(1)]);
    }

    #[test]
    fn old_deletion_mark_excuses_block() {
        // Marked 400s ago, past the 300s deletion grace: not required.
        let expected = vec![block(1, 10_000)];
        let marks = HashMap::from([mark(1, 400)]);

        let missing = checker().check(&expected, &marks, &[], NOW);
        assert!(missing.is_empty());
    }

    #[test]
    fn phantom_queried_blocks_do_not_mask_missing_ones() {
        let expected = vec![block(1, 10_000)];
        // A hint for a block nobody expected is ignored.
        let queried = vec![BlockId::from_u128(99)];

        let missing = checker().check(&expected, &HashMap::new(), &queried, NOW);
        assert_eq!(missing, vec![BlockId::from_u128(1)]);
    }
}
