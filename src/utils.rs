//! # Miscellaneous utility functions for `percov`
use anyhow::{bail, Context, Result};
use std::{cmp, path::Path};

/// Determine the overlap between two ranges, each specified by their start
/// and end coordinates.
/// **NOTE:** start and end positions are inclusive
///
/// # Examples
///
/// ```
/// let a: Vec<i64> = vec![10, 15];
/// let b: Vec<i64> = vec![13, 25];
/// let overlap = percov::utils::range_overlap(a[0], a[1], b[0], b[1]).unwrap();
/// assert_eq!(3, overlap);
/// ```
pub fn range_overlap(a_start: i64, a_end: i64, b_start: i64, b_end: i64) -> Result<i64> {
    if (a_start > a_end) | (b_start > b_end) {
        bail!("a or b range not correctly specified")
    }
    Ok(cmp::max(
        0,
        cmp::min(a_end, b_end) - cmp::max(a_start, b_start) + 1,
    ))
}

/// Infer a sample name from the filepath of an alignment file
///
/// # Examples
///
/// ```
/// let filepath = "./path/to/alignment.bam";
/// let sample_name = percov::utils::sample_name_from_path(filepath).unwrap();
///
/// assert_eq!("alignment", sample_name);
/// ```
pub fn sample_name_from_path(filepath: &str) -> Result<String> {
    let context = || format!("Could not infer sample name from path {filepath}");
    let name = Path::new(filepath)
        .file_stem()
        .with_context(context)?
        .to_str()
        .with_context(context)?;

    Ok(String::from(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_of_disjoint_ranges_is_zero() {
        assert_eq!(0, range_overlap(0, 4, 5, 9).unwrap());
        assert_eq!(1, range_overlap(0, 5, 5, 9).unwrap());
        assert!(range_overlap(4, 0, 5, 9).is_err());
    }
}
