//! Asset URLs: list parsing and the URL to storage path mapping.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{Error, Result};

/// Number of trailing URL path segments that form an asset's storage path.
const PATH_SEGMENTS: usize = 3;

/// Parse a URL list: one URL per line, surrounding whitespace trimmed, blank
/// lines ignored, duplicates dropped keeping the first occurrence.
#[must_use]
pub fn parse_url_list(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .map(str::to_owned)
        .collect()
}

/// Read and parse the URL list at `path`.
///
/// # Errors
///
/// Returns [`Error::MissingUrlFile`] if the file does not exist, or an I/O
/// error if it cannot be read.
pub fn read_url_list(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(Error::MissingUrlFile(path.to_path_buf()));
    }
    Ok(parse_url_list(&fs::read_to_string(path)?))
}

/// Relative storage path `{seg-3}/{seg-2}/{seg-1}` of an asset URL.
///
/// Only the URL path takes part; host, query and fragment are ignored, and
/// empty segments (doubled or trailing slashes) are skipped. Returns `None`
/// when the URL does not parse, has fewer than three path segments, or a
/// segment would escape its directory (`.`/`..`).
#[must_use]
pub fn relative_path(url: &str) -> Option<PathBuf> {
    let parsed = Url::parse(url).ok()?;
    let segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < PATH_SEGMENTS {
        return None;
    }
    let tail = &segments[segments.len() - PATH_SEGMENTS..];
    if tail
        .iter()
        .any(|s| *s == "." || *s == ".." || s.contains('\\'))
    {
        return None;
    }
    Some(tail.iter().collect())
}
