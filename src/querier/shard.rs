//! Query-shard based block filtering
//!
//! Split-and-merge compaction and query sharding hash series the same way,
//! so when the shard counts divide one another a whole block can be ruled
//! out without opening it. When neither count divides the other the block
//! must be queried and is counted as incompatible.

use crate::block::{Block, CompactorShardId};
use crate::series::{LabelMatcher, MatchOp};
use crate::{Error, Result};

/// Reserved matcher carrying the query shard selection.
pub const SHARD_LABEL: &str = "__query_shard__";

/// A query shard selection: sub-query `shard_index` of `shard_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSelector {
    pub shard_index: u64,
    pub shard_count: u64,
}

impl ShardSelector {
    /// The `i_of_n` label value form of this selector.
    pub fn label_value(&self) -> String {
        format!("{}_of_{}", self.shard_index, self.shard_count)
    }

    /// Extract the shard selector from a matcher set, returning the
    /// matchers with the reserved one removed. The reserved matcher must be
    /// an equality matcher with a valid `i_of_n` value.
    pub fn from_matchers(
        matchers: &[LabelMatcher],
    ) -> Result<(Option<ShardSelector>, Vec<LabelMatcher>)> {
        let mut shard = None;
        let mut rest = Vec::with_capacity(matchers.len());

        for m in matchers {
            if m.name != SHARD_LABEL {
                rest.push(m.clone());
                continue;
            }
            if m.op != MatchOp::Equal {
                return Err(Error::Internal(format!(
                    "the {SHARD_LABEL} matcher must be an equality matcher"
                )));
            }
            let parsed = CompactorShardId::parse(&m.value)?;
            shard = Some(ShardSelector {
                shard_index: parsed.index,
                shard_count: parsed.count,
            });
        }

        Ok((shard, rest))
    }
}

/// Drop blocks that provably cannot contain series for the query shard.
///
/// Preserves input order so downstream merge ordering stays deterministic.
/// Returns the number of incompatible blocks: blocks carrying a compactor
/// shard whose count neither divides nor is divided by the query shard
/// count. Those are kept.
pub fn filter_blocks_by_shard(
    blocks: &mut Vec<Block>,
    shard_index: u64,
    shard_count: u64,
) -> usize {
    let mut incompatible = 0;

    blocks.retain(|block| {
        let Some(raw) = block.compactor_shard_id.as_deref() else {
            return true;
        };
        let Ok(compactor) = CompactorShardId::parse(raw) else {
            // Unparsable compactor shard: the block must be queried.
            return true;
        };

        let (keep, divisible) =
            can_contain_query_shard(shard_index, shard_count, compactor.index, compactor.count);
        if !divisible {
            incompatible += 1;
        }
        keep
    });

    incompatible
}

/// Whether a block compacted as shard `ci_of_cc` may contain series of
/// query shard `qi_of_qc`. `false` means the block definitely cannot;
/// `true` means it cannot be ruled out. The second value reports whether
/// the shard counts were divisible one way or the other.
fn can_contain_query_shard(qi: u64, qc: u64, ci: u64, cc: u64) -> (bool, bool) {
    // Query sharding at least as fine as compactor sharding: series of
    // query shard qi live only in the block whose compactor shard index is
    // qi mod cc.
    if qc >= cc && qc % cc == 0 {
        return (qi % cc == ci, true);
    }

    // Compactor sharding finer than query sharding: the block holds series
    // of exactly one query shard, ci mod qc.
    if cc >= qc && cc % qc == 0 {
        return (ci % qc == qi, true);
    }

    (true, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;

    fn block(id: u128, shard: Option<&str>) -> Block {
        Block {
            id: BlockId::from_u128(id),
            min_t: 0,
            max_t: 1000,
            compactor_shard_id: shard.map(str::to_string),
            uploaded_at: 0,
        }
    }

    #[test]
    fn query_finer_than_compactor_keeps_single_block() {
        let mut blocks = vec![
            block(0, Some("0_of_4")),
            block(1, Some("1_of_4")),
            block(2, Some("2_of_4")),
            block(3, Some("3_of_4")),
        ];

        // qc % cc == 0 and qi mod cc == 1: only 1_of_4 survives.
        let incompatible = filter_blocks_by_shard(&mut blocks, 5, 8);
        assert_eq!(incompatible, 0);
        let ids: Vec<u128> = blocks.iter().map(|b| b.id.as_u128()).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn compactor_finer_than_query_keeps_matching_blocks() {
        let mut blocks = vec![
            block(0, Some("0_of_8")),
            block(3, Some("3_of_8")),
            block(7, Some("7_of_8")),
        ];

        // cc = 8, qc = 4, qi = 3: keep blocks with ci mod 4 == 3.
        let incompatible = filter_blocks_by_shard(&mut blocks, 3, 4);
        assert_eq!(incompatible, 0);
        let ids: Vec<u128> = blocks.iter().map(|b| b.id.as_u128()).collect();
        assert_eq!(ids, vec![3, 7]);
    }

    #[test]
    fn indivisible_counts_keep_the_block_and_count_it() {
        let mut blocks = vec![block(0, Some("1_of_3"))];
        let incompatible = filter_blocks_by_shard(&mut blocks, 0, 4);
        assert_eq!(incompatible, 1);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn shard_zero_of_one_is_identity() {
        let mut blocks = vec![
            block(0, Some("0_of_4")),
            block(1, Some("1_of_4")),
            block(2, None),
        ];
        let before = blocks.clone();

        let incompatible = filter_blocks_by_shard(&mut blocks, 0, 1);
        assert_eq!(incompatible, 0);
        assert_eq!(blocks, before);
    }

    #[test]
    fn blocks_without_or_with_unparsable_shard_are_kept() {
        let mut blocks = vec![block(0, None), block(1, Some("not-a-shard"))];
        filter_blocks_by_shard(&mut blocks, 3, 4);
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn filter_preserves_input_order() {
        let mut blocks = vec![
            block(9, Some("1_of_2")),
            block(4, None),
            block(7, Some("1_of_2")),
        ];
        filter_blocks_by_shard(&mut blocks, 1, 2);
        let ids: Vec<u128> = blocks.iter().map(|b| b.id.as_u128()).collect();
        assert_eq!(ids, vec![9, 4, 7]);
    }

    #[test]
    fn selector_extraction_strips_the_reserved_matcher() {
        let matchers = vec![
            LabelMatcher::equal("job", "api"),
            LabelMatcher::equal(SHARD_LABEL, "2_of_4"),
        ];

        let (shard, rest) = ShardSelector::from_matchers(&matchers).unwrap();
        let shard = shard.unwrap();
        assert_eq!(shard.shard_index, 2);
        assert_eq!(shard.shard_count, 4);
        assert_eq!(rest, vec![LabelMatcher::equal("job", "api")]);
        assert_eq!(shard.label_value(), "2_of_4");
    }

    #[test]
    fn selector_extraction_rejects_non_equality_and_bad_values() {
        let bad_op = vec![LabelMatcher {
            op: MatchOp::Regexp,
            name: SHARD_LABEL.to_string(),
            value: "1_of_2".to_string(),
        }];
        assert!(ShardSelector::from_matchers(&bad_op).is_err());

        let bad_value = vec![LabelMatcher::equal(SHARD_LABEL, "nope")];
        assert!(ShardSelector::from_matchers(&bad_value).is_err());
    }
}
