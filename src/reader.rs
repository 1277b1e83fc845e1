//! # Span extraction from alignment files
//!
//! Drains the alignment provider one contig at a time and turns every
//! passing primary record into a [`Span`]. Filtering rejects unmapped,
//! secondary, supplementary, low-quality and (by default) duplicate
//! records; paired records are then clipped against their mate according
//! to the configured [`OverlapMode`] so overlapping mate bases are not
//! counted twice.
use anyhow::{Context, Result};
use clap::ValueEnum;
use log::debug;
use rust_htslib::bam::{self, ext::BamRecordExtensions, Read};

use crate::{errors::CovError, kmer::KmerProfile, regions::Contig, spans::Span};

/// Fallback span capacity when the index reports no aligned-record count.
const DEFAULT_SPAN_CAPACITY: usize = 1 << 20;

/// Policy for bases covered by both mates of a read pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OverlapMode {
    /// Clip the leftmost mate at the other mate's start so each base is
    /// counted once. Mates starting at the same position keep only the
    /// second-of-pair read.
    None,
    /// Legacy partial clipping of the first-of-pair read only. Leaves a
    /// one-base hole and does not clip when the second-of-pair read is
    /// leftmost. Kept for backward compatibility.
    Half,
}

/// Record-level filters applied before span extraction.
#[derive(Debug, Clone, Copy)]
pub struct ReadFilters {
    pub min_mapq: u8,
    pub allow_duplicates: bool,
    pub overlap_mode: OverlapMode,
}

impl Default for ReadFilters {
    fn default() -> Self {
        ReadFilters {
            min_mapq: 1,
            allow_duplicates: false,
            overlap_mode: OverlapMode::None,
        }
    }
}

/// The fields of an alignment record that overlap clipping looks at.
/// All coordinates are 0-based half-open.
#[derive(Debug, Clone, Copy)]
pub struct SpanCandidate {
    pub start: i64,
    pub end: i64,
    pub tid: i32,
    pub mate_tid: i32,
    pub mate_start: i64,
    pub paired: bool,
    pub first_of_pair: bool,
    pub mate_unmapped: bool,
}

/// Apply mate-overlap clipping to a candidate, returning the retained
/// `(start, end)` or `None` when the record is rejected outright.
pub fn clip_span(mode: OverlapMode, c: &SpanCandidate) -> Option<(i64, i64)> {
    if !c.paired {
        return Some((c.start, c.end));
    }
    let mate_on_contig = c.mate_tid == c.tid && !c.mate_unmapped;
    let (start, end) = match mode {
        OverlapMode::None => {
            // Same-start mates: drop the first-of-pair read entirely and
            // keep its mate whole, even when the mates differ in length.
            if c.first_of_pair && c.mate_start == c.start {
                return None;
            }
            if mate_on_contig && c.start < c.mate_start && c.mate_start <= c.end {
                (c.start, c.mate_start)
            } else {
                (c.start, c.end)
            }
        }
        OverlapMode::Half => {
            if c.first_of_pair
                && mate_on_contig
                && c.start <= c.mate_start
                && c.mate_start <= c.end
            {
                (c.start, c.mate_start - 1)
            } else {
                (c.start, c.end)
            }
        }
    };
    (end > start).then_some((start, end))
}

/// Per-contig span reader over an indexed SAM/BAM/CRAM file.
pub struct SpanReader {
    reader: bam::IndexedReader,
    filters: ReadFilters,
    kmer: Option<KmerProfile>,
}

impl SpanReader {
    /// Open the alignment at `path`. `reference` is required for CRAM
    /// input and applied when given.
    pub fn open(
        path: &str,
        reference: Option<&str>,
        filters: ReadFilters,
        kmer: Option<KmerProfile>,
    ) -> Result<Self> {
        let mut reader = bam::IndexedReader::from_path(path)
            .with_context(|| format!("Could not open indexed alignment {path}"))?;
        if let Some(reference) = reference {
            reader
                .set_reference(reference)
                .with_context(|| format!("Could not set reference {reference}"))?;
        }
        Ok(SpanReader {
            reader,
            filters,
            kmer,
        })
    }

    /// Aligned-record count for `tid` from the index, 0 when unknown.
    fn estimated_aligned_records(&mut self, tid: u32) -> u64 {
        match self.reader.index_stats() {
            Ok(stats) => stats
                .iter()
                .find(|(stat_tid, _, _, _)| *stat_tid == i64::from(tid))
                .map(|&(_, _, mapped, _)| mapped)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Read the filtered, overlap-clipped spans for `contig`, in
    /// non-decreasing `start` order.
    pub fn read_contig(&mut self, contig: &Contig) -> Result<Vec<Span>> {
        let estimate = self.estimated_aligned_records(contig.tid) as usize;
        let capacity = if estimate == 0 {
            DEFAULT_SPAN_CAPACITY
        } else {
            estimate
        };
        let mut spans: Vec<Span> = Vec::with_capacity(capacity);

        self.reader
            .fetch((contig.tid as i32, 0, contig.length as i64))
            .map_err(|e| {
                CovError::Provider(format!("fetching {} failed: {e}", contig.name))
            })?;

        let mut record = bam::Record::new();
        while let Some(result) = self.reader.read(&mut record) {
            result.map_err(|e| {
                CovError::Provider(format!("reading {} failed: {e}", contig.name))
            })?;

            if record.is_unmapped() || record.is_secondary() || record.is_supplementary() {
                continue;
            }
            if record.mapq() < self.filters.min_mapq {
                continue;
            }
            if record.is_duplicate() && !self.filters.allow_duplicates {
                continue;
            }

            let candidate = SpanCandidate {
                start: record.pos(),
                end: record.reference_end(),
                tid: record.tid(),
                mate_tid: record.mtid(),
                mate_start: record.mpos(),
                paired: record.is_paired(),
                first_of_pair: record.is_first_in_template(),
                mate_unmapped: record.is_mate_unmapped(),
            };
            let Some((start, end)) = clip_span(self.filters.overlap_mode, &candidate) else {
                continue;
            };

            let kmer = match &self.kmer {
                Some(profile) => profile.index_of_read(&record.seq().as_bytes()),
                None => 0,
            };
            spans.push(Span::with_kmer(start, end, kmer));
        }

        spans.shrink_to_fit();
        debug!("{}: kept {} spans", contig.name, spans.len());
        Ok(spans)
    }
}
