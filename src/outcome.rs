//! Per-stage outcome kinds and the tally that counts them.

use std::collections::BTreeMap;
use std::fmt;

/// A closed set of per-task results for one stage.
pub trait Outcome: Copy + Ord + Send + fmt::Display {
    /// Outcome recorded when a task panics instead of returning.
    fn worker_fault() -> Self;
}

/// Transport-level download failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportError {
    /// The request or body read exceeded the timeout.
    Timeout,
    /// Host name resolution failed.
    Dns,
    /// TLS handshake or certificate failure.
    Tls,
    /// TCP connection could not be established.
    Connect,
    /// Any other request failure.
    Other,
}

/// Result of downloading one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DownloadOutcome {
    /// Fetched and written to the unprocessed tree.
    Success,
    /// A file already existed at the target path; no request was made.
    Skipped,
    /// The URL has no three-segment storage path.
    UrlError,
    /// The server answered with a non-200 status.
    HttpError(u16),
    /// The request failed below HTTP.
    Transport(TransportError),
    /// Writing the body to disk failed.
    IoError,
    /// The task failed unexpectedly.
    Error,
}

impl Outcome for DownloadOutcome {
    fn worker_fault() -> Self {
        Self::Error
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Skipped => f.write_str("skipped"),
            Self::UrlError => f.write_str("url_error"),
            Self::HttpError(code) => write!(f, "http_error_{code}"),
            Self::Transport(TransportError::Timeout) => f.write_str("timeout"),
            Self::Transport(TransportError::Dns) => f.write_str("dns_error"),
            Self::Transport(TransportError::Tls) => f.write_str("tls_error"),
            Self::Transport(TransportError::Connect) => f.write_str("connect_error"),
            Self::Transport(TransportError::Other) => f.write_str("request_error"),
            Self::IoError => f.write_str("io_error"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Result of classifying one unprocessed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterOutcome {
    /// No mark found; moved to the processed tree.
    NoLogoMoved,
    /// A mark is likely present; left in place for redaction.
    LogoFoundStay,
    /// The file could not be decoded; left in place.
    LoadFail,
    /// Classification or the move failed; left in place for review.
    ErrorStay,
    /// The file was gone before the task ran.
    Absent,
}

impl Outcome for FilterOutcome {
    fn worker_fault() -> Self {
        Self::ErrorStay
    }
}

impl fmt::Display for FilterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoLogoMoved => "no_logo_moved",
            Self::LogoFoundStay => "logo_found_stay",
            Self::LoadFail => "load_fail",
            Self::ErrorStay => "error_stay",
            Self::Absent => "absent",
        })
    }
}

/// Result of template redaction on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RedactOutcome {
    /// A template matched; the region was covered and the file moved.
    Processed,
    /// No template reached the threshold; left in place.
    Unmatched,
    /// The file could not be decoded; left in place.
    LoadFail,
    /// Saving or removing failed; left in place.
    Error,
    /// The file was gone before the task ran.
    Absent,
}

impl Outcome for RedactOutcome {
    fn worker_fault() -> Self {
        Self::Error
    }
}

impl fmt::Display for RedactOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Processed => "processed",
            Self::Unmatched => "unmatched",
            Self::LoadFail => "load_fail",
            Self::Error => "error",
            Self::Absent => "absent",
        })
    }
}

/// Count of tasks per outcome for one stage run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally<O> {
    counts: BTreeMap<O, usize>,
}

impl<O> Default for Tally<O> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl<O: Outcome> Tally<O> {
    /// An empty tally.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more `outcome`.
    pub fn record(&mut self, outcome: O) {
        *self.counts.entry(outcome).or_insert(0) += 1;
    }

    /// How many tasks ended in `outcome`.
    #[must_use]
    pub fn get(&self, outcome: O) -> usize {
        self.counts.get(&outcome).copied().unwrap_or(0)
    }

    /// Total number of recorded tasks.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Non-zero counts in outcome order.
    pub fn iter(&self) -> impl Iterator<Item = (O, usize)> + '_ {
        self.counts.iter().map(|(o, n)| (*o, *n))
    }

    /// Counts keyed by display tag.
    #[must_use]
    pub fn by_tag(&self) -> BTreeMap<String, usize> {
        self.iter().map(|(o, n)| (o.to_string(), n)).collect()
    }
}

impl<O: Outcome> FromIterator<O> for Tally<O> {
    fn from_iter<I: IntoIterator<Item = O>>(iter: I) -> Self {
        let mut tally = Self::new();
        for outcome in iter {
            tally.record(outcome);
        }
        tally
    }
}

impl<O: Outcome> fmt::Display for Tally<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("nothing to do");
        }
        for (i, (outcome, count)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{outcome}: {count}")?;
        }
        Ok(())
    }
}
