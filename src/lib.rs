//! # percov
//!
//! Single-sample per-base coverage over target regions. Given a
//! coordinate-sorted, indexed alignment file and a BED file of targets,
//! `percov` computes the depth of passing primary alignments at every
//! targeted base, derives region-level and sample-level statistics, and
//! optionally reports "gaps": maximal runs of bases below a depth
//! threshold. The work runs as a staged pipeline: span extraction, depth
//! computation, region writing and gap detection each on their own thread,
//! joined by bounded mailboxes.
pub mod cli;
pub mod depth;
pub mod errors;
pub mod gaps;
pub mod io;
pub mod kmer;
pub mod pipeline;
pub mod reader;
pub mod regions;
pub mod spans;
pub mod stats;
pub mod utils;
pub mod writer;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use rust_htslib::bam::{self, Read};

use crate::{
    cli::Cli,
    depth::DepthMode,
    errors::CovError,
    gaps::CsvGapSink,
    io::bed::RawTarget,
    kmer::KmerProfile,
    pipeline::{GapConfig, PipelineConfig, PipelineReport},
    reader::ReadFilters,
    regions::{Contig, RegionSet, TargetRegion},
    writer::Downsampler,
};

/// Run a full coverage pass as described by the parsed command line.
pub fn run(cli: &Cli) -> Result<()> {
    cli.validate()?;
    let sample = cli.sample_name()?;

    let contigs_by_name = header_contigs(&cli.alignment)?;
    let raw_targets = io::bed::read_targets(&cli.targets)?;
    if raw_targets.is_empty() {
        bail!(CovError::InputMismatch(format!(
            "no target intervals in {}",
            cli.targets
        )));
    }
    let targets = resolve_targets(&raw_targets, &contigs_by_name, true)?;
    info!(
        "Target set: {} regions, {} bases",
        targets.len(),
        targets.base_count()
    );

    let contigs_by_tid: HashMap<u32, &Contig> =
        contigs_by_name.values().map(|c| (c.tid, c)).collect();
    let contigs: Vec<Contig> = targets
        .contig_tids()
        .iter()
        .map(|tid| (*contigs_by_tid.get(tid).expect("tid resolved above")).clone())
        .collect();

    let kmer_profile = match &cli.kmer {
        Some(path) => Some(KmerProfile::from_tsv(path, &sample)?),
        None => None,
    };
    let depth_mode = match &kmer_profile {
        Some(profile) => DepthMode::Weighted(profile.factors().to_vec()),
        None => DepthMode::Unweighted,
    };

    let per_base_path = cli.output.as_deref().or(cli.okmer.as_deref());
    let per_base = per_base_path.map(io::open_output).transpose()?;
    let downsampler = cli
        .downsample_output
        .as_deref()
        .map(io::open_output)
        .transpose()?
        .map(|sink| Downsampler::new(sink, cli.downsample_factor));

    let gap = match &cli.gaps {
        Some(path) => {
            let gap_targets = match &cli.gap_target {
                Some(gap_target_path) => {
                    let raw = io::bed::read_targets(gap_target_path)?;
                    Some(resolve_targets(&raw, &contigs_by_name, false)?)
                }
                None => None,
            };
            let sink = CsvGapSink::new(io::open_output(path)?)?;
            Some(GapConfig {
                threshold: cli.gap_threshold,
                targets: gap_targets,
                sink: Box::new(sink),
            })
        }
        None => None,
    };

    let filters = ReadFilters {
        min_mapq: cli.min_mapq,
        allow_duplicates: cli.allow_duplicates,
        overlap_mode: cli.overlap_mode,
    };

    let report = pipeline::run_pipeline(PipelineConfig {
        alignment: cli.alignment.clone(),
        reference: cli.reference.clone(),
        filters,
        kmer: kmer_profile,
        depth_mode,
        targets: Arc::new(targets),
        contigs,
        per_base,
        downsampler,
        track_region_stats: cli.interval_summary.is_some(),
        gap,
    })?;

    write_reports(cli, &sample, &report)?;
    info!(
        "Done: {} bases, mean depth {:.2}, median {}",
        report.global.count(),
        report.global.mean(),
        report.global.median()
    );
    if cli.gaps.is_some() {
        info!("Reported {} gap blocks", report.gap_blocks);
    }
    Ok(())
}

fn write_reports(cli: &Cli, sample: &str, report: &PipelineReport) -> Result<()> {
    if let Some(path) = &cli.sample_summary {
        io::report::write_sample_summary(path, &report.global)?;
    }
    if let Some(path) = &cli.covo {
        io::report::write_coverage_js(path, sample, &report.global)?;
    }
    if let Some(path) = &cli.interval_summary {
        io::report::write_interval_summary(path, sample, &report.region_stats)?;
    }
    Ok(())
}

/// Extract all contigs from an alignment file's header, keyed by name.
fn header_contigs(alignment_path: &str) -> Result<HashMap<String, Contig>> {
    let reader = bam::Reader::from_path(alignment_path)
        .with_context(|| format!("Could not open alignment {alignment_path}"))?;
    let header = reader.header();

    let mut contigs = HashMap::new();
    for (tid, name) in header.target_names().iter().enumerate() {
        let tid = tid as u32;
        let name = std::str::from_utf8(name)
            .context("Contig name in alignment header is not valid UTF-8")?
            .to_owned();
        let length = header
            .target_len(tid)
            .context("Could not get target length from header")?;
        contigs.insert(name.clone(), Contig { name, tid, length });
    }
    Ok(contigs)
}

/// Resolve raw intervals against the header contigs and normalize them
/// into a region set. In strict mode an unknown contig is fatal; otherwise
/// its intervals are skipped with a warning.
fn resolve_targets(
    raw: &[RawTarget],
    contigs: &HashMap<String, Contig>,
    strict: bool,
) -> Result<RegionSet> {
    let mut regions: Vec<TargetRegion> = Vec::with_capacity(raw.len());
    for target in raw {
        match contigs.get(&target.chrom) {
            Some(contig) => regions.push(TargetRegion {
                contig: target.chrom.clone(),
                tid: contig.tid,
                start: target.start,
                end: target.end,
                name: target.name().map(str::to_owned),
            }),
            None if strict => bail!(CovError::InputMismatch(format!(
                "target contig '{}' is absent from the alignment header",
                target.chrom
            ))),
            None => {
                warn!(
                    "Contig '{}' is absent from the alignment header, skipping its intervals",
                    target.chrom
                );
            }
        }
    }
    Ok(RegionSet::new(regions))
}
