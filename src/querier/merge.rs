//! Deterministic result merging
//!
//! Replication means one series label set can arrive from several replica
//! streams. The k-way merge walks all per-replica sets in label order and
//! concatenates the chunks of equal label sets, in stream order, without
//! decoding anything. Output order is a function of the inputs alone, not
//! of replica latency.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::series::Series;

/// Lazily merges per-replica series sets, each already sorted by labels.
#[derive(Debug)]
pub struct MergeSeriesIter {
    /// One cursor per input set
    cursors: Vec<std::vec::IntoIter<Series>>,
    heap: BinaryHeap<HeapEntry>,
}

#[derive(Debug)]
struct HeapEntry {
    series: Series,
    source: usize,
}

// Min-heap on (labels, source index): BinaryHeap is a max-heap, so the
// ordering is reversed.
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .series
            .labels
            .cmp(&self.series.labels)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl MergeSeriesIter {
    /// Build a merge over per-replica series sets. Each input must be
    /// sorted by labels; the fetch path sorts replica responses before
    /// handing them over.
    pub fn new(sets: Vec<Vec<Series>>) -> Self {
        let mut cursors: Vec<std::vec::IntoIter<Series>> =
            sets.into_iter().map(Vec::into_iter).collect();

        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some(series) = cursor.next() {
                heap.push(HeapEntry { series, source });
            }
        }

        Self { cursors, heap }
    }

    fn advance(&mut self, source: usize) {
        if let Some(series) = self.cursors[source].next() {
            self.heap.push(HeapEntry { series, source });
        }
    }
}

impl Iterator for MergeSeriesIter {
    type Item = Series;

    fn next(&mut self) -> Option<Series> {
        let head = self.heap.pop()?;
        let mut merged = head.series;
        self.advance(head.source);

        // Pull every equal-labelled head and concatenate its chunks. Heap
        // order breaks ties by source index, so concatenation order is
        // stable across runs.
        while let Some(peek) = self.heap.peek() {
            if peek.series.labels != merged.labels {
                break;
            }
            let dup = self.heap.pop().expect("peeked entry present");
            merged.chunks.extend(dup.series.chunks);
            self.advance(dup.source);
        }

        Some(merged)
    }
}

/// Merge string sets into one sorted, deduplicated vector. Used for label
/// names and label values responses.
pub fn merge_string_sets(sets: Vec<Vec<String>>) -> Vec<String> {
    let mut out: Vec<String> = sets.into_iter().flatten().collect();
    out.sort_unstable();
    out.dedup();
    out
}
