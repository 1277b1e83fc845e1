//! # Kmer profiles for weighted depth
//!
//! A kmer profile is a matrix of per-sample kmer counts: one row per
//! sample, one column per kmer, loaded from a TSV whose header row names
//! the kmers. Normalization turns raw counts into multiplicative factors:
//! each row is divided by its sum, each column by its sum, and the result
//! inverted; zero and non-finite entries become the neutral factor 1.0.
//! A read's factor is looked up by its leading `k` bases, the shearing
//! signature laid down by library preparation.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use log::info;
use ndarray::{Array2, Axis};

use crate::errors::CovError;

/// One sample's kmer factor vector plus the kmer-to-column lookup.
#[derive(Debug, Clone)]
pub struct KmerProfile {
    k: usize,
    columns: HashMap<Vec<u8>, u32>,
    /// Factor per kmer column, with one extra neutral slot at the end for
    /// reads whose signature is absent from the profile.
    factors: Vec<f64>,
}

impl KmerProfile {
    /// Load the profile at `path` and select the row for `sample`.
    pub fn from_tsv<P: AsRef<Path>>(path: P, sample: &str) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(b'\t')
            .from_path(path)
            .with_context(|| format!("Could not read kmer profile {}", path.display()))?;

        let headers = reader.headers()?.clone();
        let kmers: Vec<Vec<u8>> = headers
            .iter()
            .skip(1)
            .map(|kmer| kmer.trim().to_ascii_uppercase().into_bytes())
            .collect();
        if kmers.is_empty() {
            bail!(CovError::Config(format!(
                "kmer profile {} has no kmer columns",
                path.display()
            )));
        }
        let k = kmers[0].len();
        if k == 0 || kmers.iter().any(|kmer| kmer.len() != k) {
            bail!(CovError::Config(format!(
                "kmer profile {} header kmers must all have the same nonzero length",
                path.display()
            )));
        }

        let mut samples: Vec<String> = Vec::new();
        let mut data: Vec<f64> = Vec::new();
        for row in reader.records() {
            let row = row.with_context(|| {
                format!("Failed to read kmer profile record in {}", path.display())
            })?;
            if row.len() != kmers.len() + 1 {
                bail!(CovError::Config(format!(
                    "kmer profile {} row '{}' has {} fields, expected {}",
                    path.display(),
                    row.get(0).unwrap_or(""),
                    row.len(),
                    kmers.len() + 1
                )));
            }
            samples.push(row[0].to_owned());
            for field in row.iter().skip(1) {
                let value: f64 = field.trim().parse().with_context(|| {
                    format!("Bad kmer count '{field}' in {}", path.display())
                })?;
                data.push(value);
            }
        }

        let mut matrix = Array2::from_shape_vec((samples.len(), kmers.len()), data)
            .context("kmer profile rows are inconsistent")?;
        normalize(&mut matrix);

        let row = samples
            .iter()
            .position(|name| name == sample)
            .ok_or_else(|| {
                CovError::InputMismatch(format!(
                    "sample '{sample}' not present in kmer profile {}",
                    path.display()
                ))
            })?;
        let mut factors: Vec<f64> = matrix.row(row).to_vec();
        factors.push(1.0);

        let columns: HashMap<Vec<u8>, u32> = kmers
            .into_iter()
            .enumerate()
            .map(|(i, kmer)| (kmer, i as u32))
            .collect();

        info!(
            "Loaded kmer profile {} ({} samples, {} {k}-mers)",
            path.display(),
            samples.len(),
            columns.len()
        );
        Ok(KmerProfile { k, columns, factors })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Index of the neutral factor used for unknown signatures.
    pub fn neutral_index(&self) -> u32 {
        (self.factors.len() - 1) as u32
    }

    /// Factor column for a read sequence, keyed by its leading `k` bases.
    pub fn index_of_read(&self, seq: &[u8]) -> u32 {
        if seq.len() < self.k {
            return self.neutral_index();
        }
        let prefix: Vec<u8> = seq[..self.k].to_ascii_uppercase();
        self.columns
            .get(&prefix)
            .copied()
            .unwrap_or_else(|| self.neutral_index())
    }

    pub fn factors(&self) -> &[f64] {
        &self.factors
    }
}

/// Row-normalize, column-normalize, then invert. Entries that come out
/// zero or non-finite become the neutral factor 1.0.
fn normalize(matrix: &mut Array2<f64>) {
    for mut row in matrix.outer_iter_mut() {
        let sum = row.sum();
        if sum != 0.0 {
            row.mapv_inplace(|x| x / sum);
        }
    }
    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let sum = column.sum();
        if sum != 0.0 {
            column.mapv_inplace(|x| x / sum);
        }
    }
    matrix.mapv_inplace(|x| {
        let factor = 1.0 / x;
        if factor.is_finite() {
            factor
        } else {
            1.0
        }
    });
}
