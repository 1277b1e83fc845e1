//! # Run reports
//!
//! The sample summary, the interval summary and the coverage JS payload.
//! All are written once, after the pipeline has drained.
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde_json::json;

use crate::stats::CoverageStats;

/// Depth thresholds reported by the sample summary.
const SUMMARY_THRESHOLDS: [u16; 5] = [1, 5, 10, 20, 50];

/// Write the single-row sample summary TSV.
pub fn write_sample_summary<P: AsRef<Path>>(path: P, stats: &CoverageStats) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Could not create sample summary {}", path.display()))?;

    let mut header = vec!["Median Coverage".to_owned(), "Mean Coverage".to_owned()];
    let mut row = vec![stats.median().to_string(), stats.mean().to_string()];
    for threshold in SUMMARY_THRESHOLDS {
        header.push(format!("perc_bases_above_{threshold}"));
        row.push((stats.fraction_above(threshold) * 100.0).to_string());
    }
    writer.write_record(&header)?;
    writer.write_record(&row)?;
    writer.flush()?;
    Ok(())
}

/// Write the coverage JS payload: a `covs = // NOJSON` prefix followed by
/// pretty-printed means and medians keyed by sample.
pub fn write_coverage_js<P: AsRef<Path>>(
    path: P,
    sample: &str,
    stats: &CoverageStats,
) -> Result<()> {
    let path = path.as_ref();
    let payload = json!({
        "means": { sample: stats.mean() },
        "medians": { sample: stats.median() },
    });
    let mut file = File::create(path)
        .with_context(|| format!("Could not create coverage js {}", path.display()))?;
    write!(file, "covs = // NOJSON\n{}", serde_json::to_string_pretty(&payload)?)?;
    Ok(())
}

/// Write the two-row interval summary TSV: region labels, then the mean
/// depth of each region. NaN means are coerced to 0.
pub fn write_interval_summary<P: AsRef<Path>>(
    path: P,
    sample: &str,
    region_stats: &[(String, CoverageStats)],
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .with_context(|| format!("Could not create interval summary {}", path.display()))?;

    let mut header = vec!["sample".to_owned()];
    let mut row = vec![sample.to_owned()];
    for (label, stats) in region_stats {
        header.push(label.clone());
        let mean = stats.mean();
        let mean = if mean.is_nan() { 0.0 } else { mean };
        row.push(mean.to_string());
    }
    writer.write_record(&header)?;
    writer.write_record(&row)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats_with(depths: &[u16]) -> CoverageStats {
        let mut stats = CoverageStats::new();
        for &d in depths {
            stats.add(d);
        }
        stats
    }

    #[test]
    fn sample_summary_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.tsv");
        write_sample_summary(&path, &stats_with(&[0, 10, 10, 30])).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "Median Coverage\tMean Coverage\tperc_bases_above_1\tperc_bases_above_5\t\
             perc_bases_above_10\tperc_bases_above_20\tperc_bases_above_50"
        );
        let fields: Vec<&str> = lines.next().unwrap().split('\t').collect();
        assert_eq!(fields[0], "10");
        assert_eq!(fields[1], "12.5");
        assert_eq!(fields[2], "75");
        assert_eq!(fields[5], "25");
    }

    #[test]
    fn coverage_js_has_nojson_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("covs.js");
        write_coverage_js(&path, "s1", &stats_with(&[4, 4])).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("covs = // NOJSON\n{"));
        let json: serde_json::Value = serde_json::from_str(&text["covs = // NOJSON\n".len()..]).unwrap();
        assert_eq!(json["means"]["s1"], 4.0);
        assert_eq!(json["medians"]["s1"], 4.0);
    }

    #[test]
    fn interval_summary_coerces_nan_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intervals.tsv");
        let regions = vec![
            ("r1".to_owned(), stats_with(&[2, 4])),
            ("r2".to_owned(), CoverageStats::new()),
        ];
        write_interval_summary(&path, "s1", &regions).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "sample\tr1\tr2\ns1\t3\t0\n");
    }
}
