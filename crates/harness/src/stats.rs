//! Derived statistics over perf sample tables.
//!
//! Percentiles are computed on the sorted latency array with simple rank
//! indexing, which is plenty for the sample counts these jobs produce.

use serde::Serialize;
use std::collections::BTreeMap;

/// Latency distribution of one perf run, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub count: usize,
    pub min_ms: u64,
    pub median_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
}

impl LatencySummary {
    /// Summarize `(start_ms, end_ms)` samples. Returns `None` when the
    /// run recorded no samples at all.
    pub fn from_samples(samples: &[(u64, u64)]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut latencies: Vec<u64> = samples
            .iter()
            .map(|&(start, end)| end.saturating_sub(start))
            .collect();
        latencies.sort_unstable();

        let len = latencies.len();
        Some(Self {
            count: len,
            min_ms: latencies[0],
            median_ms: latencies[len / 2],
            p95_ms: latencies[(len * 95 / 100).min(len - 1)],
            p99_ms: latencies[(len * 99 / 100).min(len - 1)],
            max_ms: latencies[len - 1],
        })
    }
}

/// Operations completed during one wall-clock second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThroughputBucket {
    /// Seconds since the UNIX epoch.
    pub second: u64,
    pub ops: u64,
}

/// Bucket samples by the second their operation completed in, sorted by
/// second. Gaps (seconds with no completions) produce no bucket.
pub fn throughput_buckets(samples: &[(u64, u64)]) -> Vec<ThroughputBucket> {
    let mut counts: BTreeMap<u64, u64> = BTreeMap::new();
    for &(_, end_ms) in samples {
        *counts.entry(end_ms / 1000).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(second, ops)| ThroughputBucket { second, ops })
        .collect()
}
