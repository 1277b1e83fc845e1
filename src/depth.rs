//! # Depth computation
//!
//! Turns one contig's span array into a dense per-position depth vector by
//! sweeping a [`SpanTracker`] across the reference. Depth is either the
//! active span count or, in kmer-weighted mode, the floored sum of the
//! active spans' kmer factors.
use crate::spans::{Span, SpanTracker};

/// Depths are saturated to this value before storage. Deliberately visible
/// to downstream statistics: extreme pileups count as exactly 1000.
pub const DEPTH_CAP: u16 = 1000;

/// How a position's depth is derived from the active span set.
#[derive(Debug, Clone)]
pub enum DepthMode {
    /// Depth is the number of overlapping spans.
    Unweighted,
    /// Depth is `floor(sum of factors[span.kmer])` over overlapping spans.
    Weighted(Vec<f64>),
}

/// Compute the depth vector for one contig.
///
/// `spans` must be sorted by `start`. The result covers positions
/// `0..max_end` where `max_end` is the furthest span end; callers treat
/// positions past the vector as depth 0. An empty span array yields an
/// empty vector.
pub fn count_coverage(spans: &[Span], mode: &DepthMode) -> Vec<u16> {
    let Some(max_end) = spans.iter().map(|s| s.end).max() else {
        return Vec::new();
    };

    let mut depth = vec![0u16; max_end as usize];
    let mut tracker = SpanTracker::new();
    let mut pos: i64 = 0;

    for span in spans {
        while pos < span.start {
            tracker.remove_non_overlaps(pos);
            depth[pos as usize] = coverage_at(&tracker, mode);
            pos += 1;
        }
        tracker.add(*span);
    }
    while (pos as usize) < depth.len() {
        tracker.remove_non_overlaps(pos);
        depth[pos as usize] = coverage_at(&tracker, mode);
        pos += 1;
    }

    depth
}

fn coverage_at(tracker: &SpanTracker, mode: &DepthMode) -> u16 {
    match mode {
        DepthMode::Unweighted => tracker.len().min(DEPTH_CAP as usize) as u16,
        DepthMode::Weighted(factors) => {
            let sum: f64 = tracker
                .iter()
                .map(|span| factors.get(span.kmer as usize).copied().unwrap_or(1.0))
                .sum();
            let floored = sum.floor();
            if floored <= 0.0 {
                0
            } else {
                floored.min(f64::from(DEPTH_CAP)) as u16
            }
        }
    }
}
