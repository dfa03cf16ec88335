//! Consistency-checked fan-out query coordinator
//!
//! Entry points for series, label names and label values queries. All three
//! share one orchestration: find the blocks covering the time range, filter
//! them by query shard, pick store-gateway replicas through the ring, fan
//! out streaming sub-queries, and verify via the returned hints that every
//! expected block was actually consulted, retrying the residual against
//! replicas not yet attempted until the check passes or attempts run out.

mod consistency;
mod limiter;
mod merge;
mod shard;
pub mod telemetry;

pub use consistency::ConsistencyChecker;
pub use limiter::QueryLimiter;
pub use merge::{merge_string_sets, MergeSeriesIter};
pub use shard::{filter_blocks_by_shard, ShardSelector, SHARD_LABEL};

use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::block::BlockId;
use crate::clock::QueryClock;
use crate::finder::BlocksFinder;
use crate::limits::TenantLimits;
use crate::series::{LabelMatcher, Series};
use crate::store::{
    ClientAssignment, LabelNamesRequest, LabelValuesRequest, PartialResponseStrategy,
    QueriedBlocksHint, SeriesFrame, SeriesRequest, StoreSet,
};
use crate::{Error, LimitKind, Result};

/// The maximum number of times missing blocks are re-fetched from other
/// store-gateways. If no eligible store-gateway is left the retries end
/// earlier.
pub const MAX_FETCH_ATTEMPTS: usize = 3;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct QuerierConfig {
    /// Only query the block store for samples older than this; recent data
    /// is covered by the write path. Zero disables the clamp.
    pub query_store_after: Duration,
    /// Retry budget of the consistency loop
    pub max_fetch_attempts: usize,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        Self {
            query_store_after: Duration::ZERO,
            max_fetch_attempts: MAX_FETCH_ATTEMPTS,
        }
    }
}

/// Volume counters for one coordinated query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub fetched_series: u64,
    pub fetched_chunks: u64,
    pub fetched_chunk_bytes: u64,
    /// Distinct store-gateway instances hit
    pub stores_hit: u64,
    /// Retry attempts beyond the first
    pub refetches: u64,
}

/// Result of a series query: a lazily merged, label-sorted series sequence
/// plus non-fatal warnings.
#[derive(Debug)]
pub struct SeriesQueryResult {
    pub series: MergeSeriesIter,
    pub warnings: Vec<String>,
    pub stats: QueryStats,
}

/// Result of a label names or label values query.
#[derive(Debug, Clone, Default)]
pub struct LabelsQueryResult {
    pub items: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: QueryStats,
}

#[derive(Default)]
struct StatsAcc {
    fetched_series: AtomicU64,
    fetched_chunks: AtomicU64,
    fetched_chunk_bytes: AtomicU64,
    stores_hit: AtomicU64,
    refetches: AtomicU64,
}

impl StatsAcc {
    fn snapshot(&self) -> QueryStats {
        QueryStats {
            fetched_series: self.fetched_series.load(Ordering::Relaxed),
            fetched_chunks: self.fetched_chunks.load(Ordering::Relaxed),
            fetched_chunk_bytes: self.fetched_chunk_bytes.load(Ordering::Relaxed),
            stores_hit: self.stores_hit.load(Ordering::Relaxed),
            refetches: self.refetches.load(Ordering::Relaxed),
        }
    }
}

/// Queries the blocks storage through store-gateways, with a consistency
/// check over the blocks actually queried.
pub struct BlocksStoreQuerier {
    finder: Arc<dyn BlocksFinder>,
    stores: Arc<StoreSet>,
    consistency: ConsistencyChecker,
    limits: Arc<dyn TenantLimits>,
    cfg: QuerierConfig,
    clock: Arc<QueryClock>,
}

impl BlocksStoreQuerier {
    pub fn new(
        finder: Arc<dyn BlocksFinder>,
        stores: Arc<StoreSet>,
        consistency: ConsistencyChecker,
        limits: Arc<dyn TenantLimits>,
        cfg: QuerierConfig,
    ) -> Self {
        Self {
            finder,
            stores,
            consistency,
            limits,
            cfg,
            clock: Arc::new(QueryClock::new()),
        }
    }

    /// Select series matching `matchers` within `[min_t, max_t]`.
    ///
    /// The query shard, if any, travels as the reserved `__query_shard__`
    /// equality matcher and is stripped before matchers reach the
    /// replicas.
    pub async fn series(
        &self,
        tenant: &str,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        skip_chunks: bool,
        cancel: &CancellationToken,
    ) -> Result<SeriesQueryResult> {
        let (shard, matchers) = ShardSelector::from_matchers(matchers)?;

        let limiter = QueryLimiter::new(
            self.limits.max_fetched_series_per_query(tenant),
            0,
            self.limits.max_fetched_chunk_bytes_per_query(tenant),
        );
        let max_chunks_limit = self.limits.max_chunks_per_query(tenant);
        let left_chunks_limit = AtomicU64::new(max_chunks_limit);

        let res_series_sets: Mutex<Vec<Vec<Series>>> = Mutex::new(Vec::new());
        let res_warnings: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let stats = StatsAcc::default();

        let query_fn = |assignments: Vec<ClientAssignment>, min_t: i64, max_t: i64| {
            let matchers = &matchers;
            let limiter = &limiter;
            let left_chunks_limit = &left_chunks_limit;
            let res_series_sets = &res_series_sets;
            let res_warnings = &res_warnings;
            let stats = &stats;
            let cancel = cancel.clone();
            async move {
                let outcome = self
                    .fetch_series_from_stores(
                        tenant,
                        assignments,
                        min_t,
                        max_t,
                        matchers,
                        skip_chunks,
                        limiter,
                        max_chunks_limit,
                        left_chunks_limit.load(Ordering::Relaxed),
                        &cancel,
                        stats,
                    )
                    .await?;

                res_series_sets.lock().extend(outcome.series_sets);
                res_warnings.lock().extend(outcome.warnings);

                // A single block is never queried twice, so chunks seen in
                // this attempt shrink the budget of the next one.
                if max_chunks_limit > 0 {
                    let left = left_chunks_limit.load(Ordering::Relaxed);
                    left_chunks_limit
                        .store(left.saturating_sub(outcome.num_chunks), Ordering::Relaxed);
                }

                Ok(outcome.queried_blocks)
            }
        };

        self.query_with_consistency_check(tenant, min_t, max_t, shard, cancel, &stats, query_fn)
            .await?;

        Ok(SeriesQueryResult {
            series: MergeSeriesIter::new(res_series_sets.into_inner()),
            warnings: res_warnings.into_inner(),
            stats: stats.snapshot(),
        })
    }

    /// Enumerate label names within `[min_t, max_t]`.
    pub async fn label_names(
        &self,
        tenant: &str,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        cancel: &CancellationToken,
    ) -> Result<LabelsQueryResult> {
        let min_t = self.clamp_labels_query_start(tenant, min_t, max_t);

        let res_name_sets: Mutex<Vec<Vec<String>>> = Mutex::new(Vec::new());
        let res_warnings: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let stats = StatsAcc::default();

        let query_fn = |assignments: Vec<ClientAssignment>, min_t: i64, max_t: i64| {
            let res_name_sets = &res_name_sets;
            let res_warnings = &res_warnings;
            let cancel = cancel.clone();
            async move {
                let outcome = self
                    .fetch_label_names_from_stores(tenant, assignments, min_t, max_t, matchers, &cancel)
                    .await?;
                res_name_sets.lock().extend(outcome.value_sets);
                res_warnings.lock().extend(outcome.warnings);
                Ok(outcome.queried_blocks)
            }
        };

        self.query_with_consistency_check(tenant, min_t, max_t, None, cancel, &stats, query_fn)
            .await?;

        Ok(LabelsQueryResult {
            items: merge_string_sets(res_name_sets.into_inner()),
            warnings: res_warnings.into_inner(),
            stats: stats.snapshot(),
        })
    }

    /// Enumerate the values of `label` within `[min_t, max_t]`.
    pub async fn label_values(
        &self,
        tenant: &str,
        label: &str,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        cancel: &CancellationToken,
    ) -> Result<LabelsQueryResult> {
        let min_t = self.clamp_labels_query_start(tenant, min_t, max_t);

        let res_value_sets: Mutex<Vec<Vec<String>>> = Mutex::new(Vec::new());
        let res_warnings: Mutex<Vec<String>> = Mutex::new(Vec::new());
        let stats = StatsAcc::default();

        let query_fn = |assignments: Vec<ClientAssignment>, min_t: i64, max_t: i64| {
            let res_value_sets = &res_value_sets;
            let res_warnings = &res_warnings;
            let cancel = cancel.clone();
            async move {
                let outcome = self
                    .fetch_label_values_from_stores(
                        tenant,
                        label,
                        assignments,
                        min_t,
                        max_t,
                        matchers,
                        &cancel,
                    )
                    .await?;
                res_value_sets.lock().extend(outcome.value_sets);
                res_warnings.lock().extend(outcome.warnings);
                Ok(outcome.queried_blocks)
            }
        };

        self.query_with_consistency_check(tenant, min_t, max_t, None, cancel, &stats, query_fn)
            .await?;

        Ok(LabelsQueryResult {
            items: merge_string_sets(res_value_sets.into_inner()),
            warnings: res_warnings.into_inner(),
            stats: stats.snapshot(),
        })
    }

    /// Clamp the start of a label query so the range is at most the
    /// tenant's maximum labels query length, ending at the original
    /// `max_t`.
    fn clamp_labels_query_start(&self, tenant: &str, min_t: i64, max_t: i64) -> i64 {
        let max_len = self.limits.max_labels_query_length(tenant);
        if max_len.is_zero() {
            return min_t;
        }
        let clamped = min_t.max(max_t - max_len.as_millis() as i64);
        if clamped != min_t {
            debug!(
                tenant = %tenant,
                original = min_t,
                updated = clamped,
                "the start of the label query has been clamped to the max labels query length"
            );
        }
        clamped
    }

    /// The shared orchestration loop. `query_fn` runs one attempt against
    /// the given replica assignments and returns the blocks the replicas
    /// reported as queried.
    async fn query_with_consistency_check<F, Fut>(
        &self,
        tenant: &str,
        min_t: i64,
        mut max_t: i64,
        shard: Option<ShardSelector>,
        cancel: &CancellationToken,
        stats: &StatsAcc,
        mut query_fn: F,
    ) -> Result<()>
    where
        F: FnMut(Vec<ClientAssignment>, i64, i64) -> Fut,
        Fut: Future<Output = Result<Vec<BlockId>>>,
    {
        // Recent samples are covered by the write path: clamp the max time
        // so the block store is only consulted for data old enough to have
        // been compacted and uploaded.
        if !self.cfg.query_store_after.is_zero() {
            let boundary = self.clock.now_millis() - self.cfg.query_store_after.as_millis() as i64;
            let orig_max_t = max_t;
            max_t = max_t.min(boundary);

            if orig_max_t != max_t {
                debug!(
                    original = orig_max_t,
                    updated = max_t,
                    "the max time of the query to blocks storage has been clamped"
                );
            }

            if max_t < min_t {
                telemetry::record_query_outcome(0, 0);
                debug!("empty query time range after max time clamping");
                return Ok(());
            }
        }

        let (mut expected, deletion_marks) = self.finder.get_blocks(tenant, min_t, max_t).await?;
        if expected.is_empty() {
            telemetry::record_query_outcome(0, 0);
            debug!(tenant = %tenant, "no blocks found for query time range");
            return Ok(());
        }
        telemetry::record_blocks_found(expected.len() as u64);

        if let Some(shard) = shard {
            let before = expected.len();
            let incompatible =
                filter_blocks_by_shard(&mut expected, shard.shard_index, shard.shard_count);
            debug!(
                shard = %shard.label_value(),
                before,
                after = expected.len(),
                incompatible,
                "filtered blocks due to query sharding"
            );
            telemetry::record_incompatible_shard_blocks(incompatible as u64);

            if expected.is_empty() {
                telemetry::record_query_outcome(0, 0);
                return Ok(());
            }
        }
        telemetry::record_blocks_queried(expected.len() as u64);

        let mut remaining: Vec<BlockId> = expected.iter().map(|b| b.id).collect();
        let mut attempted: HashMap<BlockId, Vec<String>> = HashMap::new();
        let mut touched_stores: HashSet<String> = HashSet::new();
        let mut queried_so_far: Vec<BlockId> = Vec::new();
        let mut attempts_done = 0usize;

        for attempt in 1..=self.cfg.max_fetch_attempts.max(1) {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            // Pick the replicas holding the remaining blocks, excluding the
            // (block, replica) pairs already attempted.
            let assignments = match self.stores.clients_for(tenant, &remaining, &attempted).await {
                Ok(assignments) => assignments,
                Err(err) if attempt > 1 => {
                    // No store-gateway left to retry against; fall through
                    // to the final consistency evaluation over what was
                    // queried so far.
                    warn!(
                        tenant = %tenant,
                        error = %err,
                        "unable to get store-gateway clients while retrying to fetch missing blocks"
                    );
                    break;
                }
                Err(err) => return Err(err),
            };
            attempts_done = attempt;
            debug!(
                tenant = %tenant,
                instances = assignments.len(),
                attempt,
                "found store-gateway instances to query"
            );

            // The exclusion map tracks attempted, not served: a replica
            // that fails mid-stream must not be retried for these blocks.
            for assignment in &assignments {
                let addr = assignment.client.remote_address().to_string();
                touched_stores.insert(addr.clone());
                for block_id in &assignment.blocks {
                    attempted.entry(*block_id).or_default().push(addr.clone());
                }
            }

            // Sub-query errors are not retried here: retries only cover
            // missing blocks, everything else fails the request.
            let queried = query_fn(assignments, min_t, max_t).await?;
            queried_so_far.extend(queried);

            let missing = self.consistency.check(
                &expected,
                &deletion_marks,
                &queried_so_far,
                self.clock.now_millis() / 1000,
            );
            if missing.is_empty() {
                stats
                    .stores_hit
                    .store(touched_stores.len() as u64, Ordering::Relaxed);
                stats.refetches.store(attempt as u64 - 1, Ordering::Relaxed);
                telemetry::record_query_outcome(touched_stores.len() as u64, attempt as u64 - 1);
                return Ok(());
            }

            debug!(
                tenant = %tenant,
                attempt,
                missing = ?missing,
                "consistency check failed, retrying missing blocks"
            );
            remaining = missing;
        }

        // Replica selection failed mid-retry, or attempts ran out: evaluate
        // the check once more over everything queried so far and succeed
        // only if nothing is missing.
        let missing = self.consistency.check(
            &expected,
            &deletion_marks,
            &queried_so_far,
            self.clock.now_millis() / 1000,
        );
        if missing.is_empty() {
            stats
                .stores_hit
                .store(touched_stores.len() as u64, Ordering::Relaxed);
            stats
                .refetches
                .store(attempts_done.saturating_sub(1) as u64, Ordering::Relaxed);
            telemetry::record_query_outcome(
                touched_stores.len() as u64,
                attempts_done.saturating_sub(1) as u64,
            );
            return Ok(());
        }

        warn!(tenant = %tenant, missing = ?missing, "failed consistency check");
        Err(Error::ConsistencyCheckFailed { missing })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_series_from_stores(
        &self,
        tenant: &str,
        assignments: Vec<ClientAssignment>,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        skip_chunks: bool,
        limiter: &QueryLimiter,
        max_chunks_limit: u64,
        left_chunks_limit: u64,
        cancel: &CancellationToken,
        stats: &StatsAcc,
    ) -> Result<SeriesFetchOutcome> {
        let child_cancel = cancel.child_token();
        let num_chunks = AtomicU64::new(0);

        let mut tasks: FuturesUnordered<_> = assignments
            .into_iter()
            .map(|assignment| {
                self.fetch_series_one(
                    tenant,
                    assignment,
                    min_t,
                    max_t,
                    matchers,
                    skip_chunks,
                    limiter,
                    max_chunks_limit,
                    left_chunks_limit,
                    &num_chunks,
                    child_cancel.clone(),
                    stats,
                )
            })
            .collect();

        let mut outcome = SeriesFetchOutcome::default();
        let mut fatal: Option<Error> = None;

        while let Some(result) = tasks.next().await {
            match result {
                Ok(Some(per_client)) => {
                    outcome.series_sets.push(per_client.series);
                    outcome.warnings.extend(per_client.warnings);
                    outcome.queried_blocks.extend(per_client.queried_blocks);
                }
                Ok(None) => {
                    // Replica unavailable this attempt; its blocks stay
                    // un-hinted and the consistency pass picks them up.
                }
                Err(err) => {
                    // First fatal error wins and cancels the siblings.
                    child_cancel.cancel();
                    if fatal.is_none() || matches!(fatal, Some(Error::Cancelled)) {
                        fatal = Some(err);
                    }
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }
        outcome.num_chunks = num_chunks.load(Ordering::Relaxed);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_series_one(
        &self,
        tenant: &str,
        assignment: ClientAssignment,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        skip_chunks: bool,
        limiter: &QueryLimiter,
        max_chunks_limit: u64,
        left_chunks_limit: u64,
        num_chunks: &AtomicU64,
        cancel: CancellationToken,
        stats: &StatsAcc,
    ) -> Result<Option<PerClientSeries>> {
        let ClientAssignment { client, blocks } = assignment;
        let addr = client.remote_address().to_string();

        let req = SeriesRequest {
            min_t,
            max_t,
            matchers: matchers.to_vec(),
            skip_chunks,
            block_ids: blocks.clone(),
            partial_response: PartialResponseStrategy::Abort,
        };

        let mut stream = match client.series(tenant, req).await {
            Ok(stream) => stream,
            Err(err) => {
                // Do not fail the request: the blocks stay un-served for
                // this attempt and the retry re-assigns them.
                warn!(remote = %addr, error = %err, "failed to fetch series");
                return Ok(None);
            }
        };

        let mut my_series: Vec<Series> = Vec::new();
        let mut my_warnings: Vec<String> = Vec::new();
        let mut my_queried: Vec<BlockId> = Vec::new();

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                frame = stream.next() => frame,
            };

            let frame = match frame {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    // Mid-stream failure: drop the partial series of this
                    // attempt, leave the blocks un-hinted.
                    warn!(remote = %addr, error = %err, "failed to receive series");
                    return Ok(None);
                }
            };

            match frame {
                SeriesFrame::Series(series) => {
                    limiter.add_series(&series.labels)?;

                    let chunks_count = series.chunks.len() as u64;
                    let chunks_size: u64 =
                        series.chunks.iter().map(|c| c.size_bytes() as u64).sum();

                    if max_chunks_limit > 0 {
                        let actual = num_chunks.fetch_add(chunks_count, Ordering::Relaxed)
                            + chunks_count;
                        if actual > left_chunks_limit {
                            return Err(Error::LimitExceeded {
                                kind: LimitKind::Chunks,
                                limit: max_chunks_limit,
                                observed: (max_chunks_limit - left_chunks_limit) + actual,
                            });
                        }
                    }
                    limiter.add_chunk_bytes(chunks_size)?;
                    limiter.add_chunks(chunks_count)?;

                    my_series.push(series);
                }
                SeriesFrame::Warning(warning) => my_warnings.push(warning),
                SeriesFrame::Hints(hints) => {
                    my_queried.extend(parse_queried_blocks(&addr, &hints)?);
                }
            }
        }

        let fetched_chunks: u64 = my_series.iter().map(|s| s.chunks.len() as u64).sum();
        let fetched_bytes: u64 = my_series
            .iter()
            .flat_map(|s| s.chunks.iter())
            .map(|c| c.size_bytes() as u64)
            .sum();

        stats
            .fetched_series
            .fetch_add(my_series.len() as u64, Ordering::Relaxed);
        stats.fetched_chunks.fetch_add(fetched_chunks, Ordering::Relaxed);
        stats
            .fetched_chunk_bytes
            .fetch_add(fetched_bytes, Ordering::Relaxed);
        telemetry::record_fetched(&addr, my_series.len() as u64, fetched_chunks, fetched_bytes);

        debug!(
            remote = %addr,
            fetched_series = my_series.len(),
            fetched_chunks,
            fetched_bytes,
            requested_blocks = blocks.len(),
            queried_blocks = my_queried.len(),
            "received series from store-gateway"
        );

        // The merge relies on each input set being label-sorted.
        my_series.sort_by(|a, b| a.labels.cmp(&b.labels));

        Ok(Some(PerClientSeries {
            series: my_series,
            warnings: my_warnings,
            queried_blocks: my_queried,
        }))
    }

    async fn fetch_label_names_from_stores(
        &self,
        tenant: &str,
        assignments: Vec<ClientAssignment>,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        cancel: &CancellationToken,
    ) -> Result<LabelsFetchOutcome> {
        let child_cancel = cancel.child_token();

        let mut tasks: FuturesUnordered<_> = assignments
            .into_iter()
            .map(|assignment| {
                let cancel = child_cancel.clone();
                async move {
                    let ClientAssignment { client, blocks } = assignment;
                    let addr = client.remote_address().to_string();
                    let req = LabelNamesRequest {
                        min_t,
                        max_t,
                        matchers: matchers.to_vec(),
                        block_ids: blocks,
                    };

                    let response = tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        response = client.label_names(tenant, req) => response,
                    };
                    let response = match response {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(remote = %addr, error = %err, "failed to fetch label names");
                            return Ok(None);
                        }
                    };

                    let queried = parse_queried_blocks(&addr, &response.hints)?;
                    debug!(
                        remote = %addr,
                        names = response.names.len(),
                        queried_blocks = queried.len(),
                        "received label names from store-gateway"
                    );
                    Ok(Some((response.names, response.warnings, queried)))
                }
            })
            .collect();

        collect_labels_outcome(&mut tasks, &child_cancel).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_label_values_from_stores(
        &self,
        tenant: &str,
        label: &str,
        assignments: Vec<ClientAssignment>,
        min_t: i64,
        max_t: i64,
        matchers: &[LabelMatcher],
        cancel: &CancellationToken,
    ) -> Result<LabelsFetchOutcome> {
        let child_cancel = cancel.child_token();

        let mut tasks: FuturesUnordered<_> = assignments
            .into_iter()
            .map(|assignment| {
                let cancel = child_cancel.clone();
                async move {
                    let ClientAssignment { client, blocks } = assignment;
                    let addr = client.remote_address().to_string();
                    let req = LabelValuesRequest {
                        min_t,
                        max_t,
                        label: label.to_string(),
                        matchers: matchers.to_vec(),
                        block_ids: blocks,
                    };

                    let response = tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        response = client.label_values(tenant, req) => response,
                    };
                    let mut response = match response {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(remote = %addr, error = %err, "failed to fetch label values");
                            return Ok(None);
                        }
                    };

                    // Values need not arrive sorted, but the merge wants
                    // sorted inputs.
                    response.values.sort_unstable();

                    let queried = parse_queried_blocks(&addr, &response.hints)?;
                    debug!(
                        remote = %addr,
                        values = response.values.len(),
                        queried_blocks = queried.len(),
                        "received label values from store-gateway"
                    );
                    Ok(Some((response.values, response.warnings, queried)))
                }
            })
            .collect();

        collect_labels_outcome(&mut tasks, &child_cancel).await
    }
}

#[derive(Default)]
struct SeriesFetchOutcome {
    series_sets: Vec<Vec<Series>>,
    warnings: Vec<String>,
    queried_blocks: Vec<BlockId>,
    num_chunks: u64,
}

struct PerClientSeries {
    series: Vec<Series>,
    warnings: Vec<String>,
    queried_blocks: Vec<BlockId>,
}

#[derive(Default)]
struct LabelsFetchOutcome {
    value_sets: Vec<Vec<String>>,
    warnings: Vec<String>,
    queried_blocks: Vec<BlockId>,
}

type LabelsTaskResult = Result<Option<(Vec<String>, Vec<String>, Vec<BlockId>)>>;

async fn collect_labels_outcome(
    tasks: &mut FuturesUnordered<impl Future<Output = LabelsTaskResult>>,
    child_cancel: &CancellationToken,
) -> Result<LabelsFetchOutcome> {
    let mut outcome = LabelsFetchOutcome::default();
    let mut fatal: Option<Error> = None;

    while let Some(result) = tasks.next().await {
        match result {
            Ok(Some((values, warnings, queried))) => {
                outcome.value_sets.push(values);
                outcome.warnings.extend(warnings);
                outcome.queried_blocks.extend(queried);
            }
            Ok(None) => {}
            Err(err) => {
                child_cancel.cancel();
                if fatal.is_none() || matches!(fatal, Some(Error::Cancelled)) {
                    fatal = Some(err);
                }
            }
        }
    }

    match fatal {
        Some(err) => Err(err),
        None => Ok(outcome),
    }
}

/// Parse the block IDs of a hints frame. The hints are authoritative for
/// the consistency check, so an unparsable ID is an internal error rather
/// than something to skip.
fn parse_queried_blocks(addr: &str, hints: &QueriedBlocksHint) -> Result<Vec<BlockId>> {
    hints
        .queried_blocks
        .iter()
        .map(|raw| {
            BlockId::parse(raw).map_err(|err| {
                Error::Internal(format!(
                    "failed to parse queried block IDs from hints received from {addr}: {err}"
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_retry_budget() {
        let cfg = QuerierConfig::default();
        assert_eq!(cfg.max_fetch_attempts, 3);
        assert!(cfg.query_store_after.is_zero());
    }
}
