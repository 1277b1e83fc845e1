//! # Failure taxonomy for `percov`
//!
//! Errors are carried through the crate inside [`anyhow::Error`] chains; the
//! variants here classify the failure so the binary can report it coherently.
//! `Usage` and `Config` are produced at the CLI boundary, `InputMismatch`
//! before the pipeline starts, `Provider` while draining the alignment file.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CovError {
    /// Missing required flag or an inconsistent flag combination.
    #[error("usage error: {0}")]
    Usage(String),
    /// Inputs that do not agree with each other, e.g. a target contig that
    /// is absent from the alignment header.
    #[error("input mismatch: {0}")]
    InputMismatch(String),
    /// I/O failure while iterating alignment records.
    #[error("alignment provider failure: {0}")]
    Provider(String),
    /// A configuration value outside its accepted set.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A broken internal assumption. Never expected to surface.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}
