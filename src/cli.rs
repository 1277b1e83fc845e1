//! # Command line interface for `percov`
use anyhow::{bail, Result};
use clap::Parser;
use log::info;

use crate::{errors::CovError, reader::OverlapMode, utils};

#[derive(Parser)]
#[command(
    name = "percov",
    author,
    version,
    about = "Per-base coverage over target regions",
    long_about = None
)]
pub struct Cli {
    /// Input file to compute depth from. Can be SAM/BAM/CRAM, must be
    /// coordinate sorted and indexed.
    #[arg(short, long)]
    pub alignment: String,

    /// File specifying target regions. Expected format is BED3+ (0-based,
    /// half-open); extra columns are kept and the first names the region
    #[arg(short = 'L', long)]
    pub targets: String,

    /// Per-base depth output. Compression is inferred from the suffix
    /// (.gz, .bgz)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Downsampled per-base output
    #[arg(long)]
    pub downsample_output: Option<String>,

    /// Downsampling window size; one mean is emitted per window
    #[arg(long, default_value_t = 0)]
    pub downsample_factor: u32,

    /// Minimum mapping quality for a read to be counted
    #[arg(long, default_value_t = 1)]
    pub min_mapq: u8,

    /// Count duplicate reads instead of discarding them
    #[arg(long)]
    pub allow_duplicates: bool,

    /// Mate overlap handling: clip overlapping mate bases (none) or legacy
    /// partial clipping (half)
    #[arg(long, value_enum, default_value = "none")]
    pub overlap_mode: OverlapMode,

    /// Sample-level summary TSV output
    #[arg(long)]
    pub sample_summary: Option<String>,

    /// Coverage JS output: means and medians keyed by sample
    #[arg(long)]
    pub covo: Option<String>,

    /// Per-region interval summary TSV output
    #[arg(long)]
    pub interval_summary: Option<String>,

    /// Gap CSV output: maximal runs of positions below the gap threshold
    #[arg(long)]
    pub gaps: Option<String>,

    /// Depth below which a position belongs to a gap
    #[arg(long, default_value_t = 20)]
    pub gap_threshold: u16,

    /// Restrict gap reporting to these regions. Expected format is BED3+
    #[arg(long)]
    pub gap_target: Option<String>,

    /// RefGene annotation database for downstream gap annotation. Required
    /// with --gaps
    #[arg(long)]
    pub refgene: Option<String>,

    /// Kmer profile matrix for kmer-weighted depth. Expected format is TSV
    /// with a header row of kmers and one row of counts per sample
    #[arg(long)]
    pub kmer: Option<String>,

    /// Kmer-weighted per-base depth output. Required with --kmer
    #[arg(long)]
    pub okmer: Option<String>,

    /// Reference genome. Expected format is FASTA, index file should exist
    /// right next to FASTA. Required if alignment is in CRAM format.
    #[arg(long)]
    pub reference: Option<String>,

    /// Sample name
    #[arg(long)]
    pub sample: Option<String>,
}

impl Cli {
    /// Cross-flag validation that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.alignment.ends_with(".cram") && self.reference.is_none() {
            bail!(CovError::Usage(
                "alignment is CRAM format but no --reference is specified".into()
            ));
        }
        if self.gaps.is_some() && self.refgene.is_none() {
            bail!(CovError::Usage("--gaps requires --refgene".into()));
        }
        if self.kmer.is_some() != self.okmer.is_some() {
            bail!(CovError::Usage(
                "--kmer and --okmer must be given together".into()
            ));
        }
        if self.kmer.is_some() && self.output.is_some() {
            bail!(CovError::Usage(
                "--output and --okmer are mutually exclusive; kmer-weighted depth replaces the per-base output".into()
            ));
        }
        if self.downsample_output.is_some() != (self.downsample_factor > 0) {
            bail!(CovError::Usage(
                "--downsample-output and a positive --downsample-factor must be given together"
                    .into()
            ));
        }
        Ok(())
    }

    pub fn sample_name(&self) -> Result<String> {
        if let Some(name) = &self.sample {
            Ok(name.clone())
        } else {
            let name = utils::sample_name_from_path(&self.alignment)?;
            info!("Inferring sample name from filename: {name}");
            Ok(name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["percov", "-a", "sample1.bam", "-L", "targets.bed"])
    }

    #[test]
    fn minimal_invocation_is_valid() {
        let cli = base_cli();
        cli.validate().unwrap();
        assert_eq!(cli.min_mapq, 1);
        assert_eq!(cli.overlap_mode, OverlapMode::None);
        assert_eq!(cli.sample_name().unwrap(), "sample1");
    }

    #[test]
    fn cram_requires_reference() {
        let mut cli = base_cli();
        cli.alignment = "sample1.cram".into();
        assert!(cli.validate().is_err());
        cli.reference = Some("ref.fa".into());
        cli.validate().unwrap();
    }

    #[test]
    fn gaps_require_refgene() {
        let mut cli = base_cli();
        cli.gaps = Some("gaps.csv".into());
        assert!(cli.validate().is_err());
        cli.refgene = Some("refgene.db".into());
        cli.validate().unwrap();
    }

    #[test]
    fn kmer_flags_come_in_pairs() {
        let mut cli = base_cli();
        cli.kmer = Some("profile.tsv".into());
        assert!(cli.validate().is_err());
        cli.okmer = Some("weighted.tsv".into());
        cli.validate().unwrap();
    }

    #[test]
    fn downsample_flags_come_in_pairs() {
        let mut cli = base_cli();
        cli.downsample_factor = 5;
        assert!(cli.validate().is_err());
        cli.downsample_output = Some("down.tsv".into());
        cli.validate().unwrap();
    }

    #[test]
    fn overlap_mode_parses_from_flag() {
        let cli = Cli::parse_from([
            "percov",
            "-a",
            "s.bam",
            "-L",
            "t.bed",
            "--overlap-mode",
            "half",
        ]);
        assert_eq!(cli.overlap_mode, OverlapMode::Half);
    }
}
