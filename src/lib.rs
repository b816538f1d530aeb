//! Batch triage of product photos carrying a known red/white brand mark.
//!
//! The pipeline runs four resumable stages over a workspace directory:
//!
//! 1. **Download** a de-duplicated URL list into `output/unprocessed_images`.
//! 2. **Filter**: a color/geometry heuristic moves images that show no mark in
//!    their corner bands to `output/processed_images`.
//! 3. **Redact**: multi-scale ZNCC template matching finds the mark in the
//!    remaining images, covers it with an opaque rectangle and moves them too.
//! 4. **Validate**: list the URLs whose processed file is still missing.
//!
//! Every stage is idempotent: the existence of a file at its target path is
//! the "already done" check, so a stage can be re-run after a crash or with
//! new templates without extra bookkeeping.
//!
//! # Quick Start
//!
//! ```no_run
//! use brandmark_triage::{NoProgress, PathLayout, Pipeline, PipelineOptions};
//!
//! let mut pipeline = Pipeline::open(PathLayout::new("work"), PipelineOptions::default())?;
//! let fetcher = pipeline.http_fetcher();
//! println!("download: {}", pipeline.download(&fetcher, &NoProgress)?);
//! println!("filter: {}", pipeline.filter(&NoProgress)?);
//! println!("redact: {}", pipeline.redact(&NoProgress)?);
//! println!("missing: {:?}", pipeline.validate()?);
//! # Ok::<(), brandmark_triage::Error>(())
//! ```
//!
//! # Classification only
//!
//! ```no_run
//! use brandmark_triage::LogoClassifier;
//!
//! let classifier = LogoClassifier::default();
//! let img = image::open("photo.jpg").unwrap().to_rgb8();
//! println!("mark present: {}", classifier.detect(&img));
//! ```

#![deny(missing_docs)]

pub mod assets;
pub mod classify;
pub mod color;
pub mod download;
pub mod error;
pub mod imaging;
pub mod layout;
pub mod matching;
pub mod outcome;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod redact;
pub mod regions;
pub mod state;
pub mod validate;

pub use classify::{ClassifierConfig, LogoClassifier, RegionVerdict};
pub use download::{Fetch, FetchError, HttpFetcher};
pub use error::{Error, Result};
pub use layout::PathLayout;
pub use matching::{MatchCache, Template, TemplateSet};
pub use outcome::{DownloadOutcome, FilterOutcome, Outcome, RedactOutcome, Tally, TransportError};
pub use pipeline::{Pipeline, PipelineOptions};
pub use progress::{NoProgress, ProgressSink};
pub use redact::TemplateRedactor;
pub use state::{RunState, Stage};
