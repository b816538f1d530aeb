//! Concurrent download of asset URLs into the unprocessed tree.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::assets::relative_path;
use crate::error::Result;
use crate::layout::PathLayout;
use crate::outcome::{DownloadOutcome, Tally, TransportError};
use crate::pool::run_pool;
use crate::progress::ProgressSink;

/// Default width of the download pool.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 15;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const CHUNK_SIZE: usize = 8192;

/// Why a fetch produced no body.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The server answered with a status other than 200.
    #[error("HTTP status {0}")]
    Status(u16),

    /// The request failed below HTTP.
    #[error("{kind:?} failure: {message}")]
    Transport {
        /// Failure class used for tallying.
        kind: TransportError,
        /// Underlying error text.
        message: String,
    },
}

/// Source of asset bytes. Implemented over HTTP by [`HttpFetcher`]; tests
/// substitute their own.
pub trait Fetch: Sync {
    /// Issue a GET for `url` and return the body stream on status 200.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Status`] for any other status, or
    /// [`FetchError::Transport`] when no response was received.
    fn fetch(&self, url: &str) -> std::result::Result<Box<dyn Read + Send>, FetchError>;
}

/// Blocking HTTP client with a hard timeout and no automatic retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Build a client whose requests (connect + body) time out after `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> std::result::Result<Box<dyn Read + Send>, FetchError> {
        match self.agent.get(url).call() {
            Ok(resp) if resp.status() == 200 => Ok(Box::new(resp.into_reader())),
            Ok(resp) => Err(FetchError::Status(resp.status())),
            Err(ureq::Error::Status(code, _)) => Err(FetchError::Status(code)),
            Err(ureq::Error::Transport(t)) => Err(FetchError::Transport {
                kind: classify_transport(&t),
                message: t.to_string(),
            }),
        }
    }
}

/// Map a ureq transport error to a tally class.
fn classify_transport(err: &ureq::Transport) -> TransportError {
    let text = err.to_string().to_lowercase();
    if is_timeout(err) || text.contains("timed out") {
        return TransportError::Timeout;
    }
    match err.kind() {
        ureq::ErrorKind::Dns => TransportError::Dns,
        _ if text.contains("tls") || text.contains("certificate") => TransportError::Tls,
        ureq::ErrorKind::ConnectionFailed => TransportError::Connect,
        _ => TransportError::Other,
    }
}

fn is_timeout(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(e) = source {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = e.source();
    }
    false
}

/// Download one URL into the unprocessed tree.
///
/// An existing target file short-circuits to [`DownloadOutcome::Skipped`]
/// without touching the network. The body is streamed to a `.part` sibling
/// and renamed into place only once complete, so an interrupted transfer is
/// retried by the next run instead of being skipped.
#[must_use]
pub fn download_one(layout: &PathLayout, fetcher: &dyn Fetch, url: &str) -> DownloadOutcome {
    let Some(rel) = relative_path(url) else {
        tracing::debug!(url, "URL has fewer than three path segments");
        return DownloadOutcome::UrlError;
    };
    let dest = layout.unprocessed_dir().join(rel);
    if dest.exists() {
        return DownloadOutcome::Skipped;
    }

    let body = match fetcher.fetch(url) {
        Ok(body) => body,
        Err(FetchError::Status(code)) => {
            tracing::debug!(url, code, "non-200 response");
            return DownloadOutcome::HttpError(code);
        }
        Err(FetchError::Transport { kind, message }) => {
            tracing::debug!(url, error = %message, "request failed");
            return DownloadOutcome::Transport(kind);
        }
    };

    match store_body(body, &dest) {
        Ok(()) => DownloadOutcome::Success,
        Err(outcome) => outcome,
    }
}

fn store_body(body: Box<dyn Read + Send>, dest: &Path) -> std::result::Result<(), DownloadOutcome> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| write_failed(dest, &e))?;
    }
    let mut part_name = dest.file_name().unwrap_or_default().to_os_string();
    part_name.push(".part");
    let part = dest.with_file_name(part_name);

    let copied = write_part(body, &part, dest)
        .and_then(|()| fs::rename(&part, dest).map_err(|e| write_failed(dest, &e)));
    if copied.is_err() {
        let _ = fs::remove_file(&part);
    }
    copied
}

/// Stream `body` into `part` in fixed-size chunks.
fn write_part(
    mut body: Box<dyn Read + Send>,
    part: &Path,
    dest: &Path,
) -> std::result::Result<(), DownloadOutcome> {
    let file = File::create(part).map_err(|e| write_failed(dest, &e))?;
    let mut out = BufWriter::new(file);
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(path = %dest.display(), error = %e, "body read failed");
                let kind = if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                    TransportError::Timeout
                } else {
                    TransportError::Other
                };
                return Err(DownloadOutcome::Transport(kind));
            }
        };
        out.write_all(&buf[..n]).map_err(|e| write_failed(dest, &e))?;
    }
    out.flush().map_err(|e| write_failed(dest, &e))
}

fn write_failed(dest: &Path, err: &io::Error) -> DownloadOutcome {
    tracing::warn!(path = %dest.display(), error = %err, "failed to write download");
    DownloadOutcome::IoError
}

/// Download every URL on a pool of `workers` threads.
///
/// Individual failures are tallied and never abort the batch.
///
/// # Errors
///
/// Returns an I/O error if the unprocessed tree cannot be created, or
/// [`crate::Error::ThreadPool`] if the pool cannot start.
pub fn download_all(
    layout: &PathLayout,
    urls: &[String],
    fetcher: &dyn Fetch,
    workers: usize,
    sink: &dyn ProgressSink<DownloadOutcome>,
) -> Result<Tally<DownloadOutcome>> {
    fs::create_dir_all(layout.unprocessed_dir())?;
    tracing::info!(urls = urls.len(), workers, "downloading assets");
    run_pool(workers, urls, sink, || (), |_, url| {
        download_one(layout, fetcher, url)
    })
}
