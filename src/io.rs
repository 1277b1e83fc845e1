//! # Input and output glue
//!
//! Submodules parse the interval inputs and write the report outputs; this
//! root holds the shared output-sink plumbing. Compression of per-base
//! outputs is inferred from the file suffix.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use flate2::{write::GzEncoder, Compression};

pub mod bed;
pub mod report;

/// Open `path` for writing, gzip-compressing when the suffix asks for it
/// (`.gz`, `.bgz`).
pub fn open_output(path: &str) -> Result<Box<dyn Write + Send>> {
    let file = File::create(path).with_context(|| format!("Could not create output {path}"))?;
    let writer = BufWriter::new(file);
    let compressed = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("bgz"));
    if compressed {
        Ok(Box::new(GzEncoder::new(writer, Compression::default())))
    } else {
        Ok(Box::new(writer))
    }
}
