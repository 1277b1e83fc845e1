//! # Gap detection
//!
//! An online state machine that consumes `(contig, position, depth)` tuples
//! in coordinate order and emits maximal closed intervals whose depth is
//! strictly below the configured threshold. Blocks are contig-local: a
//! contig change closes any pending block. Downstream, blocks flow into a
//! [`GapSink`]; annotators implement the trait and append their own columns.
use std::collections::HashMap;
use std::io::Write;

use anyhow::Result;

use crate::{regions::RegionSet, utils};

/// A maximal run of sub-threshold positions, closed coordinates
/// `[start, end]`, with the depths observed across the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapBlock {
    pub contig: String,
    pub start: i64,
    pub end: i64,
    pub samples: Vec<u16>,
}

impl GapBlock {
    pub fn size(&self) -> i64 {
        self.end - self.start + 1
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }
        let sum: u64 = self.samples.iter().map(|&d| u64::from(d)).sum();
        sum as f64 / self.samples.len() as f64
    }

    /// Lower median of the observed depths.
    pub fn median(&self) -> f64 {
        if self.samples.is_empty() {
            return f64::NAN;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        f64::from(sorted[(sorted.len() - 1) / 2])
    }
}

struct OpenBlock {
    contig: String,
    start: i64,
    samples: Vec<u16>,
}

impl OpenBlock {
    fn close(self) -> GapBlock {
        let end = self.start + self.samples.len() as i64 - 1;
        GapBlock {
            contig: self.contig,
            start: self.start,
            end,
            samples: self.samples,
        }
    }
}

/// The `{Idle, InGap}` state machine. At most one block is open at a time.
pub struct GapDetector {
    threshold: u16,
    open: Option<OpenBlock>,
    last: Option<(String, i64)>,
}

impl GapDetector {
    pub fn new(threshold: u16) -> Self {
        GapDetector {
            threshold,
            open: None,
            last: None,
        }
    }

    /// Consume one depth point. Returns the block this point closed, if any.
    /// Points must arrive in coordinate order within a contig.
    pub fn push(&mut self, contig: &str, pos: i64, depth: u16) -> Option<GapBlock> {
        let mut closed = None;

        if let Some((last_contig, _)) = &self.last {
            if last_contig.as_str() != contig {
                closed = self.open.take().map(OpenBlock::close);
            }
        }

        if depth < self.threshold {
            let contiguous = matches!(
                (&self.open, &self.last),
                (Some(_), Some((last_contig, last_pos)))
                    if last_contig.as_str() == contig && *last_pos + 1 == pos
            );
            if contiguous {
                // unwrap here because contiguous implies an open block
                self.open.as_mut().unwrap().samples.push(depth);
            } else {
                closed = self.open.take().map(OpenBlock::close).or(closed);
                self.open = Some(OpenBlock {
                    contig: contig.to_owned(),
                    start: pos,
                    samples: vec![depth],
                });
            }
        } else {
            closed = self.open.take().map(OpenBlock::close).or(closed);
        }

        match self.last.as_mut() {
            Some((last_contig, last_pos)) => {
                if last_contig.as_str() != contig {
                    *last_contig = contig.to_owned();
                }
                *last_pos = pos;
            }
            None => self.last = Some((contig.to_owned(), pos)),
        }
        closed
    }

    /// End of stream: close any open block at its last observed position.
    pub fn finish(&mut self) -> Option<GapBlock> {
        self.open.take().map(OpenBlock::close)
    }
}

/// Clips blocks against a gap-target region set, splitting at intersection
/// boundaries. Blocks with no overlap are dropped.
pub struct GapIntersector {
    by_contig: HashMap<String, Vec<(i64, i64)>>,
}

impl GapIntersector {
    pub fn new(targets: &RegionSet) -> Self {
        let mut by_contig: HashMap<String, Vec<(i64, i64)>> = HashMap::new();
        for region in targets.regions() {
            by_contig
                .entry(region.contig.clone())
                .or_default()
                .push((region.start, region.end));
        }
        GapIntersector { by_contig }
    }

    /// The pieces of `block` that fall inside the target set, in order.
    /// Sample slices follow the split.
    pub fn split(&self, block: &GapBlock) -> Vec<GapBlock> {
        let Some(intervals) = self.by_contig.get(&block.contig) else {
            return Vec::new();
        };
        let mut pieces = Vec::new();
        for &(start, end) in intervals {
            if start > block.end {
                break;
            }
            // Targets are half-open, blocks are closed.
            if utils::range_overlap(block.start, block.end, start, end - 1).unwrap_or(0) == 0 {
                continue;
            }
            let piece_start = block.start.max(start);
            let piece_end = block.end.min(end - 1);
            let lo = (piece_start - block.start) as usize;
            let hi = (piece_end - block.start) as usize + 1;
            pieces.push(GapBlock {
                contig: block.contig.clone(),
                start: piece_start,
                end: piece_end,
                samples: block.samples[lo..hi].to_vec(),
            });
        }
        pieces
    }
}

/// Downstream consumer of gap blocks. Annotating sinks append their own
/// columns after the default ones.
pub trait GapSink: Send {
    fn write_block(&mut self, block: &GapBlock) -> Result<()>;
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes the default gap columns as CSV.
pub struct CsvGapSink {
    writer: csv::Writer<Box<dyn Write + Send>>,
}

impl CsvGapSink {
    pub fn new(sink: Box<dyn Write + Send>) -> Result<Self> {
        let mut writer = csv::Writer::from_writer(sink);
        writer.write_record(["chrom", "start", "end", "size", "mean", "median"])?;
        Ok(CsvGapSink { writer })
    }
}

impl GapSink for CsvGapSink {
    fn write_block(&mut self, block: &GapBlock) -> Result<()> {
        let start = block.start.to_string();
        let end = block.end.to_string();
        let size = block.size().to_string();
        let mean = block.mean().to_string();
        let median = block.median().to_string();
        self.writer.write_record([
            block.contig.as_str(),
            start.as_str(),
            end.as_str(),
            size.as_str(),
            mean.as_str(),
            median.as_str(),
        ])?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::TargetRegion;

    fn run_detector(threshold: u16, points: &[(&str, i64, u16)]) -> Vec<GapBlock> {
        let mut detector = GapDetector::new(threshold);
        let mut blocks = Vec::new();
        for &(contig, pos, depth) in points {
            blocks.extend(detector.push(contig, pos, depth));
        }
        blocks.extend(detector.finish());
        blocks
    }

    #[test]
    fn detects_runs_below_threshold() {
        let depths = [5, 5, 1, 1, 1, 5, 5, 2, 2, 5, 5];
        let points: Vec<(&str, i64, u16)> = depths
            .iter()
            .enumerate()
            .map(|(i, &d)| ("c1", 10 + i as i64, d))
            .collect();
        let blocks = run_detector(3, &points);
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].end), (12, 14));
        assert_eq!(blocks[0].samples, vec![1, 1, 1]);
        assert_eq!((blocks[1].start, blocks[1].end), (17, 18));
    }

    #[test]
    fn open_block_closes_at_end_of_stream() {
        let blocks = run_detector(3, &[("c1", 5, 0), ("c1", 6, 1)]);
        assert_eq!(blocks.len(), 1);
        assert_eq!((blocks[0].start, blocks[0].end), (5, 6));
    }

    #[test]
    fn contig_change_closes_pending_block() {
        let blocks = run_detector(3, &[("c1", 5, 0), ("c2", 5, 0), ("c2", 6, 4)]);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].contig, "c1");
        assert_eq!((blocks[0].start, blocks[0].end), (5, 5));
        assert_eq!(blocks[1].contig, "c2");
    }

    #[test]
    fn position_jump_splits_blocks() {
        // Adjacent target regions leave a hole between positions 6 and 20.
        let blocks = run_detector(3, &[("c1", 5, 0), ("c1", 6, 0), ("c1", 20, 1), ("c1", 21, 9)]);
        assert_eq!(blocks.len(), 2);
        assert_eq!((blocks[0].start, blocks[0].end), (5, 6));
        assert_eq!((blocks[1].start, blocks[1].end), (20, 20));
    }

    #[test]
    fn at_threshold_is_not_a_gap() {
        let blocks = run_detector(3, &[("c1", 5, 3)]);
        assert!(blocks.is_empty());
    }

    #[test]
    fn block_statistics() {
        let block = GapBlock {
            contig: "c1".into(),
            start: 10,
            end: 13,
            samples: vec![4, 1, 2, 1],
        };
        assert_eq!(block.size(), 4);
        assert!((block.mean() - 2.0).abs() < f64::EPSILON);
        assert_eq!(block.median(), 1.0);
    }

    #[test]
    fn intersector_splits_at_target_boundaries() {
        let targets = RegionSet::new(vec![
            TargetRegion {
                contig: "c1".into(),
                tid: 0,
                start: 0,
                end: 12,
                name: None,
            },
            TargetRegion {
                contig: "c1".into(),
                tid: 0,
                start: 14,
                end: 20,
                name: None,
            },
        ]);
        let intersector = GapIntersector::new(&targets);
        let block = GapBlock {
            contig: "c1".into(),
            start: 10,
            end: 16,
            samples: vec![0, 1, 2, 3, 4, 5, 6],
        };
        let pieces = intersector.split(&block);
        assert_eq!(pieces.len(), 2);
        assert_eq!((pieces[0].start, pieces[0].end), (10, 11));
        assert_eq!(pieces[0].samples, vec![0, 1]);
        assert_eq!((pieces[1].start, pieces[1].end), (14, 16));
        assert_eq!(pieces[1].samples, vec![4, 5, 6]);

        let elsewhere = GapBlock {
            contig: "c9".into(),
            start: 0,
            end: 1,
            samples: vec![0, 0],
        };
        assert!(intersector.split(&elsewhere).is_empty());
    }
}
