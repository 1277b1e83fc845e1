//! # Region writer
//!
//! Walks each contig's target regions against the depth vector, emitting
//! per-base records in ascending position order and keeping the sample-wide
//! and (optionally) per-region histograms. Also owns the downsampler and
//! forwards every position to the gap stage when gap detection is on.
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;

use crate::{
    pipeline::{DepthPoint, MailboxSender},
    regions::{Contig, TargetRegion},
    stats::CoverageStats,
};

/// Averages depths over fixed-size windows and emits one value per window.
///
/// Within a region, positions fall into windows of `factor` positions. The
/// position at window offset `factor / 2` emits the mean of the samples
/// accumulated so far and does not feed the accumulator itself; every other
/// position feeds it. The accumulator resets at each window boundary. A
/// region ending before the current window reached its emission offset
/// emits the partial mean at the region's last position.
pub struct Downsampler {
    sink: Box<dyn Write + Send>,
    factor: u32,
    offset: u32,
    sum: f64,
    samples: u32,
    emitted: bool,
}

impl Downsampler {
    pub fn new(sink: Box<dyn Write + Send>, factor: u32) -> Self {
        Downsampler {
            sink,
            factor,
            offset: 0,
            sum: 0.0,
            samples: 0,
            emitted: false,
        }
    }

    fn begin_region(&mut self) {
        self.offset = 0;
        self.sum = 0.0;
        self.samples = 0;
        self.emitted = false;
    }

    fn push(&mut self, chrom: &str, pos: i64, depth: u16) -> Result<()> {
        if self.offset == self.factor / 2 {
            let mean = if self.samples > 0 {
                self.sum / f64::from(self.samples)
            } else {
                // Only reachable with factor 1: the window holds nothing
                // but the emitting position itself.
                f64::from(depth)
            };
            writeln!(self.sink, "{chrom}\t{pos}\t{mean}")?;
            self.emitted = true;
        } else {
            self.sum += f64::from(depth);
            self.samples += 1;
        }
        self.offset += 1;
        if self.offset == self.factor {
            self.offset = 0;
            self.sum = 0.0;
            self.samples = 0;
            self.emitted = false;
        }
        Ok(())
    }

    fn end_region(&mut self, chrom: &str, last_pos: i64) -> Result<()> {
        if !self.emitted && self.samples > 0 {
            let mean = self.sum / f64::from(self.samples);
            writeln!(self.sink, "{chrom}\t{last_pos}\t{mean}")?;
        }
        self.begin_region();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }
}

/// Emits per-base records and owns all run statistics.
pub struct RegionWriter {
    per_base: Option<Box<dyn Write + Send>>,
    downsampler: Option<Downsampler>,
    track_region_stats: bool,
    global: CoverageStats,
    region_stats: Vec<(String, CoverageStats)>,
}

impl RegionWriter {
    pub fn new(
        per_base: Option<Box<dyn Write + Send>>,
        downsampler: Option<Downsampler>,
        track_region_stats: bool,
    ) -> Self {
        RegionWriter {
            per_base,
            downsampler,
            track_region_stats,
            global: CoverageStats::new(),
            region_stats: Vec::new(),
        }
    }

    /// Process one contig: walk its target regions in order against the
    /// depth vector. Positions beyond the vector read as depth 0.
    pub fn write_contig(
        &mut self,
        contig: &Contig,
        depth: &[u16],
        regions: &[TargetRegion],
        gap_feed: Option<&MailboxSender<DepthPoint>>,
    ) -> Result<()> {
        let contig_name: Arc<str> = Arc::from(contig.name.as_str());
        for region in regions {
            let mut stats = self.track_region_stats.then(CoverageStats::new);
            for pos in region.start..region.end {
                let d = depth.get(pos as usize).copied().unwrap_or(0);
                if let Some(sink) = self.per_base.as_mut() {
                    writeln!(sink, "{}\t{}\t{}", contig.name, pos, d)?;
                }
                self.global.add(d);
                if let Some(stats) = stats.as_mut() {
                    stats.add(d);
                }
                if let Some(downsampler) = self.downsampler.as_mut() {
                    downsampler.push(&contig.name, pos, d)?;
                }
                if let Some(feed) = gap_feed {
                    feed.send(DepthPoint {
                        contig: Arc::clone(&contig_name),
                        pos,
                        depth: d,
                    })?;
                }
            }
            if let Some(downsampler) = self.downsampler.as_mut() {
                downsampler.end_region(&contig.name, region.end - 1)?;
            }
            if let Some(stats) = stats {
                self.region_stats.push((region.label(), stats));
            }
        }
        Ok(())
    }

    /// Flush all sinks and hand back the accumulated statistics.
    pub fn finish(mut self) -> Result<(CoverageStats, Vec<(String, CoverageStats)>)> {
        if let Some(sink) = self.per_base.as_mut() {
            sink.flush()?;
        }
        if let Some(downsampler) = self.downsampler.as_mut() {
            downsampler.flush()?;
        }
        Ok((self.global, self.region_stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::TargetRegion;

    fn contig() -> Contig {
        Contig {
            name: "c1".into(),
            tid: 0,
            length: 10_000,
        }
    }

    fn region(start: i64, end: i64) -> TargetRegion {
        TargetRegion {
            contig: "c1".into(),
            tid: 0,
            start,
            end,
            name: None,
        }
    }

    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn shared_buf() -> (Box<dyn Write + Send>, std::sync::Arc<std::sync::Mutex<Vec<u8>>>) {
        let buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        (Box::new(SharedBuf(std::sync::Arc::clone(&buf))), buf)
    }

    #[test]
    fn per_base_lines_are_ascending_and_zero_padded() {
        let (sink, buf) = shared_buf();
        let mut writer = RegionWriter::new(Some(sink), None, false);
        let depth = vec![0u16, 0, 2, 2, 1];
        writer
            .write_contig(&contig(), &depth, &[region(1, 7)], None)
            .unwrap();
        let (stats, _) = writer.finish().unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "c1\t1\t0\nc1\t2\t2\nc1\t3\t2\nc1\t4\t1\nc1\t5\t0\nc1\t6\t0\n");
        assert_eq!(stats.count(), 6);
    }

    #[test]
    fn per_region_stats_are_independent() {
        let mut writer = RegionWriter::new(None, None, true);
        let depth = vec![4u16; 100];
        writer
            .write_contig(&contig(), &depth, &[region(0, 10), region(50, 60)], None)
            .unwrap();
        let (stats, regions) = writer.finish().unwrap();
        assert_eq!(stats.count(), 20);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].0, "c1:0-10");
        assert!((regions[1].1.mean() - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn downsampling_emits_window_means_at_center_offset() {
        let (sink, buf) = shared_buf();
        let mut writer = RegionWriter::new(None, Some(Downsampler::new(sink, 5)), false);
        let depth: Vec<u16> = (1..=10).collect();
        writer
            .write_contig(&contig(), &depth, &[region(0, 10)], None)
            .unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        // Window 1 accumulates depths 1 and 2 before offset 2, window 2
        // accumulates 6 and 7 before its emission at position 7.
        assert_eq!(text, "c1\t2\t1.5\nc1\t7\t6.5\n");
    }

    #[test]
    fn downsampling_partial_window_emits_at_region_end() {
        let (sink, buf) = shared_buf();
        let mut writer = RegionWriter::new(None, Some(Downsampler::new(sink, 5)), false);
        let depth = vec![3u16, 5];
        writer
            .write_contig(&contig(), &depth, &[region(0, 2)], None)
            .unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "c1\t1\t4\n");
    }

    #[test]
    fn downsampling_windows_restart_per_region() {
        let (sink, buf) = shared_buf();
        let mut writer = RegionWriter::new(None, Some(Downsampler::new(sink, 4)), false);
        let depth = vec![2u16; 40];
        writer
            .write_contig(&contig(), &depth, &[region(0, 4), region(20, 24)], None)
            .unwrap();
        writer.finish().unwrap();

        let text = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(text, "c1\t2\t2\nc1\t22\t2\n");
    }
}
