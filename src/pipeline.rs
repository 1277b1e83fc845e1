//! # Staged coverage pipeline
//!
//! Span reader, depth computer, region writer, gap detector and gap
//! annotator each run on their own thread, connected by bounded mailboxes.
//! Contig-granular stages exchange one message per contig; the per-position
//! gap feed is throttled by a soft/hard watermark pair: a producer that
//! observes the hard limit blocks until the consumer drains the mailbox
//! below the soft limit. End-of-stream is a dropped sender; every stage
//! flushes its state when its input disconnects and propagates by dropping
//! its own downstream sender.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, info};

use crate::{
    depth::{count_coverage, DepthMode},
    errors::CovError,
    gaps::{GapDetector, GapIntersector, GapSink},
    reader::{ReadFilters, SpanReader},
    regions::{Contig, RegionSet},
    spans::Span,
    stats::CoverageStats,
    writer::{Downsampler, RegionWriter},
};

/// Queue depth at which a producer starts blocking.
pub const MAILBOX_HARD_LIMIT: usize = 100_000;
/// Queue depth a blocked producer waits for before resuming.
pub const MAILBOX_SOFT_LIMIT: usize = 20_000;
/// Whole-contig payloads are large; keep at most a few in flight.
const CONTIG_HARD_LIMIT: usize = 4;
const CONTIG_SOFT_LIMIT: usize = 2;

const BACKPRESSURE_POLL: Duration = Duration::from_millis(1);

/// One contig's filtered span array, handed off as a single message.
pub struct ContigSpans {
    pub contig: Contig,
    pub spans: Vec<Span>,
}

/// One contig's dense depth vector.
pub struct ContigDepth {
    pub contig: Contig,
    pub depth: Vec<u16>,
}

/// A single emitted position, fed to the gap detector.
pub struct DepthPoint {
    pub contig: Arc<str>,
    pub pos: i64,
    pub depth: u16,
}

/// Sending half of a watermark-bounded mailbox.
pub struct MailboxSender<T> {
    tx: Sender<T>,
    open: Arc<AtomicBool>,
    soft: usize,
    hard: usize,
}

/// Receiving half; marks the mailbox closed when dropped so blocked
/// producers give up instead of waiting on a consumer that is gone.
pub struct MailboxReceiver<T> {
    rx: Receiver<T>,
    open: Arc<AtomicBool>,
}

pub fn mailbox<T>(soft: usize, hard: usize) -> (MailboxSender<T>, MailboxReceiver<T>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let open = Arc::new(AtomicBool::new(true));
    (
        MailboxSender {
            tx,
            open: Arc::clone(&open),
            soft,
            hard,
        },
        MailboxReceiver { rx, open },
    )
}

impl<T> MailboxSender<T> {
    /// Deliver a message, blocking while the mailbox sits at its hard
    /// limit. Fails when the receiver is gone.
    pub fn send(&self, msg: T) -> Result<()> {
        if self.tx.len() >= self.hard {
            while self.tx.len() > self.soft && self.open.load(Ordering::Relaxed) {
                thread::sleep(BACKPRESSURE_POLL);
            }
        }
        self.tx
            .send(msg)
            .map_err(|_| anyhow!("pipeline stage mailbox disconnected"))
    }
}

impl<T> MailboxReceiver<T> {
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }
}

impl<T> Drop for MailboxReceiver<T> {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// Gap stage configuration.
pub struct GapConfig {
    pub threshold: u16,
    pub targets: Option<RegionSet>,
    pub sink: Box<dyn GapSink>,
}

/// Everything the pipeline needs to run.
pub struct PipelineConfig {
    pub alignment: String,
    pub reference: Option<String>,
    pub filters: ReadFilters,
    pub kmer: Option<crate::kmer::KmerProfile>,
    pub depth_mode: DepthMode,
    pub targets: Arc<RegionSet>,
    /// Contigs to process, in target-set order.
    pub contigs: Vec<Contig>,
    pub per_base: Option<Box<dyn std::io::Write + Send>>,
    pub downsampler: Option<Downsampler>,
    pub track_region_stats: bool,
    pub gap: Option<GapConfig>,
}

/// Statistics collected by the run.
pub struct PipelineReport {
    pub global: CoverageStats,
    pub region_stats: Vec<(String, CoverageStats)>,
    pub gap_blocks: u64,
}

/// Run the staged pipeline to completion and collect its statistics.
pub fn run_pipeline(config: PipelineConfig) -> Result<PipelineReport> {
    let PipelineConfig {
        alignment,
        reference,
        filters,
        kmer,
        depth_mode,
        targets,
        contigs,
        per_base,
        downsampler,
        track_region_stats,
        gap,
    } = config;

    let (span_tx, span_rx) = mailbox::<ContigSpans>(CONTIG_SOFT_LIMIT, CONTIG_HARD_LIMIT);
    let (depth_tx, depth_rx) = mailbox::<ContigDepth>(CONTIG_SOFT_LIMIT, CONTIG_HARD_LIMIT);

    let reader_handle = thread::Builder::new()
        .name("span-reader".into())
        .spawn(move || -> Result<()> {
            let mut reader = SpanReader::open(&alignment, reference.as_deref(), filters, kmer)?;
            for contig in contigs {
                let spans = reader.read_contig(&contig)?;
                info!("{}: {} spans", contig.name, spans.len());
                if span_tx.send(ContigSpans { contig, spans }).is_err() {
                    // Downstream died; its own error is reported at join.
                    break;
                }
            }
            Ok(())
        })
        .context("could not spawn span reader")?;

    let depth_handle = thread::Builder::new()
        .name("depth-computer".into())
        .spawn(move || -> Result<()> {
            while let Some(ContigSpans { contig, spans }) = span_rx.recv() {
                let depth = count_coverage(&spans, &depth_mode);
                debug!("{}: depth vector of {} positions", contig.name, depth.len());
                if depth_tx.send(ContigDepth { contig, depth }).is_err() {
                    break;
                }
            }
            Ok(())
        })
        .context("could not spawn depth computer")?;

    let (gap_stage, point_tx) = match gap {
        Some(gap_config) => {
            let (point_tx, point_rx) =
                mailbox::<DepthPoint>(MAILBOX_SOFT_LIMIT, MAILBOX_HARD_LIMIT);
            let (block_tx, block_rx) =
                mailbox::<crate::gaps::GapBlock>(MAILBOX_SOFT_LIMIT, MAILBOX_HARD_LIMIT);

            let threshold = gap_config.threshold;
            let detector_handle = thread::Builder::new()
                .name("gap-detector".into())
                .spawn(move || -> Result<()> {
                    let mut detector = GapDetector::new(threshold);
                    while let Some(point) = point_rx.recv() {
                        if let Some(block) = detector.push(&point.contig, point.pos, point.depth)
                        {
                            if block_tx.send(block).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    if let Some(block) = detector.finish() {
                        let _ = block_tx.send(block);
                    }
                    Ok(())
                })
                .context("could not spawn gap detector")?;

            let intersector = gap_config.targets.as_ref().map(GapIntersector::new);
            let mut sink = gap_config.sink;
            let annotator_handle = thread::Builder::new()
                .name("gap-annotator".into())
                .spawn(move || -> Result<u64> {
                    let mut written = 0;
                    while let Some(block) = block_rx.recv() {
                        match &intersector {
                            Some(intersector) => {
                                for piece in intersector.split(&block) {
                                    sink.write_block(&piece)?;
                                    written += 1;
                                }
                            }
                            None => {
                                sink.write_block(&block)?;
                                written += 1;
                            }
                        }
                    }
                    sink.finish()?;
                    Ok(written)
                })
                .context("could not spawn gap annotator")?;

            (Some((detector_handle, annotator_handle)), Some(point_tx))
        }
        None => (None, None),
    };

    let writer_targets = Arc::clone(&targets);
    let writer_handle = thread::Builder::new()
        .name("region-writer".into())
        .spawn(move || -> Result<(CoverageStats, Vec<(String, CoverageStats)>)> {
            let mut writer = RegionWriter::new(per_base, downsampler, track_region_stats);
            while let Some(ContigDepth { contig, depth }) = depth_rx.recv() {
                let regions = writer_targets.for_tid(contig.tid);
                writer.write_contig(&contig, &depth, regions, point_tx.as_ref())?;
            }
            drop(point_tx);
            writer.finish()
        })
        .context("could not spawn region writer")?;

    let reader_result = join_stage(reader_handle, "span reader");
    let depth_result = join_stage(depth_handle, "depth computer");
    let writer_result = join_stage(writer_handle, "region writer");
    let gap_blocks = match gap_stage {
        Some((detector_handle, annotator_handle)) => {
            let detector_result = join_stage(detector_handle, "gap detector");
            let annotator_result = join_stage(annotator_handle, "gap annotator");
            detector_result?;
            Some(annotator_result?)
        }
        None => None,
    };

    // Upstream failures are the root cause; report them first.
    reader_result?;
    depth_result?;
    let (global, region_stats) = writer_result?;

    Ok(PipelineReport {
        global,
        region_stats,
        gap_blocks: gap_blocks.unwrap_or(0),
    })
}

fn join_stage<T>(handle: thread::JoinHandle<Result<T>>, stage: &str) -> Result<T> {
    match handle.join() {
        Ok(result) => result.with_context(|| format!("{stage} stage failed")),
        Err(_) => Err(CovError::Invariant(format!("{stage} stage panicked")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mailbox_delivers_in_order() {
        let (tx, rx) = mailbox::<u32>(2, 4);
        for i in 0..4 {
            tx.send(i).unwrap();
        }
        drop(tx);
        let mut got = Vec::new();
        while let Some(v) = rx.recv() {
            got.push(v);
        }
        assert_eq!(got, vec![0, 1, 2, 3]);
    }

    #[test]
    fn send_fails_after_receiver_drops() {
        let (tx, rx) = mailbox::<u32>(2, 4);
        drop(rx);
        assert!(tx.send(1).is_err());
    }

    #[test]
    fn blocked_sender_resumes_when_consumer_drains() {
        let (tx, rx) = mailbox::<u32>(1, 3);
        for i in 0..3 {
            tx.send(i).unwrap();
        }
        let producer = thread::spawn(move || tx.send(99));
        thread::sleep(Duration::from_millis(20));
        let mut got = Vec::new();
        while let Some(v) = rx.recv() {
            got.push(v);
            if got.len() == 4 {
                break;
            }
        }
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(got, vec![0, 1, 2, 99]);
    }
}
