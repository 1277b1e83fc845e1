//! # Target interval input
//!
//! Targets come in as three-column tab-separated lines `chr\tstart\tend`
//! (0-based half-open) with optional extra columns, which are preserved
//! opaquely. Contig names are resolved against the alignment header later;
//! this module only parses.
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use log::info;

use crate::errors::CovError;

/// One raw line of a target file, before contig resolution.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct RawTarget {
    pub chrom: String,
    pub start: i64,
    pub end: i64,
    /// Extra columns beyond the third, kept as-is. The first one, when
    /// present, names the region.
    #[serde(default)]
    pub rest: Vec<String>,
}

impl RawTarget {
    pub fn name(&self) -> Option<&str> {
        self.rest.first().map(String::as_str)
    }
}

/// Read raw target intervals from the bed file at `path`.
pub fn read_targets<P: AsRef<Path>>(path: P) -> Result<Vec<RawTarget>> {
    let path = path.as_ref();
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(b'\t')
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Could not read bed file {}", path.display()))?;

    let mut targets: Vec<RawTarget> = Vec::new();
    for result in reader.deserialize() {
        let target: RawTarget = result
            .with_context(|| format!("Failed to deserialize bed record in {}", path.display()))?;
        if target.start < 0 || target.end < target.start {
            bail!(CovError::InputMismatch(format!(
                "malformed interval {}:{}-{} in {}",
                target.chrom,
                target.start,
                target.end,
                path.display()
            )));
        }
        targets.push(target);
    }

    info!("Read {} intervals from {}", targets.len(), path.display());
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bed3_and_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.bed");
        std::fs::write(
            &path,
            "# a comment\nchr1\t10\t20\nchr1\t30\t40\texon1\t0\t+\nchr2\t0\t5\n",
        )
        .unwrap();

        let targets = read_targets(&path).unwrap();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].name(), None);
        assert_eq!(targets[1].name(), Some("exon1"));
        assert_eq!(targets[1].rest, vec!["exon1", "0", "+"]);
        assert_eq!((targets[2].start, targets[2].end), (0, 5));
    }

    #[test]
    fn rejects_inverted_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.bed");
        std::fs::write(&path, "chr1\t20\t10\n").unwrap();
        assert!(read_targets(&path).is_err());
    }
}
