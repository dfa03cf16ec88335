//! Query-path telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct QuerierInstruments {
    stores_hit: Histogram<u64>,
    refetches: Histogram<u64>,
    blocks_found: Counter<u64>,
    blocks_queried: Counter<u64>,
    blocks_incompatible_shard: Counter<u64>,
    fetched_series: Counter<u64>,
    fetched_chunks: Counter<u64>,
    fetched_chunk_bytes: Counter<u64>,
}

fn instruments() -> &'static QuerierInstruments {
    static INSTRUMENTS: OnceLock<QuerierInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("strata.querier");
        QuerierInstruments {
            stores_hit: meter
                .u64_histogram("strata.querier.storegateway.instances_hit")
                .with_description("Store-gateway instances hit for a single query")
                .init(),
            refetches: meter
                .u64_histogram("strata.querier.storegateway.refetches")
                .with_description("Re-fetch attempts due to missing blocks per query")
                .init(),
            blocks_found: meter
                .u64_counter("strata.querier.blocks_found")
                .with_description("Blocks found based on query time range")
                .init(),
            blocks_queried: meter
                .u64_counter("strata.querier.blocks_queried")
                .with_description("Blocks queried after shard filtering")
                .init(),
            blocks_incompatible_shard: meter
                .u64_counter("strata.querier.blocks_incompatible_query_shard")
                .with_description(
                    "Blocks whose compactor shard count is incompatible with the query shard count",
                )
                .init(),
            fetched_series: meter
                .u64_counter("strata.querier.fetched_series")
                .with_description("Series fetched from store-gateways")
                .init(),
            fetched_chunks: meter
                .u64_counter("strata.querier.fetched_chunks")
                .with_description("Chunks fetched from store-gateways")
                .init(),
            fetched_chunk_bytes: meter
                .u64_counter("strata.querier.fetched_chunk_bytes")
                .with_description("Chunk bytes fetched from store-gateways")
                .with_unit("By")
                .init(),
        }
    })
}

/// Outcome of one coordinated query, recorded on success.
pub fn record_query_outcome(stores_hit: u64, refetches: u64) {
    let i = instruments();
    i.stores_hit.record(stores_hit, &[]);
    i.refetches.record(refetches, &[]);
}

pub fn record_blocks_found(count: u64) {
    instruments().blocks_found.add(count, &[]);
}

pub fn record_blocks_queried(count: u64) {
    instruments().blocks_queried.add(count, &[]);
}

pub fn record_incompatible_shard_blocks(count: u64) {
    if count > 0 {
        instruments().blocks_incompatible_shard.add(count, &[]);
    }
}

/// Per-replica fetch volume, labelled with the replica address.
pub fn record_fetched(addr: &str, series: u64, chunks: u64, chunk_bytes: u64) {
    let i = instruments();
    let attrs = [KeyValue::new("replica", addr.to_string())];
    i.fetched_series.add(series, &attrs);
    i.fetched_chunks.add(chunks, &attrs);
    i.fetched_chunk_bytes.add(chunk_bytes, &attrs);
}
