//! Stage orchestration over one workspace.
//!
//! [`Pipeline`] owns the run state. Stages run through it so that the record
//! is written once per stage transition, from this single context, never by
//! workers.

use std::fs;
use std::time::Duration;

use crate::assets::read_url_list;
use crate::classify::{filter_unprocessed, ClassifierConfig, LogoClassifier};
use crate::download::{
    download_all, Fetch, HttpFetcher, DEFAULT_DOWNLOAD_WORKERS, DEFAULT_TIMEOUT,
};
use crate::error::Result;
use crate::layout::PathLayout;
use crate::matching::TemplateSet;
use crate::outcome::{DownloadOutcome, FilterOutcome, RedactOutcome, Tally};
use crate::pool::default_cpu_workers;
use crate::progress::ProgressSink;
use crate::redact::redact_unprocessed;
use crate::state::{RunState, Stage};
use crate::validate::missing_assets;

/// Tunables that are not part of the persisted run state.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Download pool width.
    pub download_workers: usize,
    /// Classification and redaction pool width.
    pub cpu_workers: usize,
    /// Per-request download timeout.
    pub timeout: Duration,
    /// Classifier thresholds.
    pub classifier: ClassifierConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            cpu_workers: default_cpu_workers(),
            timeout: DEFAULT_TIMEOUT,
            classifier: ClassifierConfig::default(),
        }
    }
}

/// A workspace plus its run state.
#[derive(Debug)]
pub struct Pipeline {
    layout: PathLayout,
    state: RunState,
    options: PipelineOptions,
}

impl Pipeline {
    /// Open a workspace: create its directories and load the run state.
    ///
    /// Output trees that already hold files are never treated as
    /// unprepared, even when the state record is missing that fact (a
    /// damaged or older record), so the next download resumes instead of
    /// wiping finished work.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if directories cannot be created or the state
    /// file cannot be read.
    pub fn open(layout: PathLayout, options: PipelineOptions) -> Result<Self> {
        layout.ensure_dirs()?;
        let mut state = RunState::load(layout.state_file())?;
        if !state.outputs_prepared && layout.has_outputs() {
            tracing::info!("output trees already populated, next download resumes");
            state.outputs_prepared = true;
        }
        Ok(Self {
            layout,
            state,
            options,
        })
    }

    /// Workspace paths.
    #[must_use]
    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Active options.
    #[must_use]
    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// HTTP client configured with the options' timeout.
    #[must_use]
    pub fn http_fetcher(&self) -> HttpFetcher {
        HttpFetcher::new(self.options.timeout)
    }

    /// Change the redaction threshold and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidThreshold`] outside `[0, 1]`, or an
    /// error if the state cannot be written.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        self.state.set_threshold(threshold)?;
        self.state.save(self.layout.state_file())
    }

    /// Move the stage cursor without running anything and persist it.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written.
    pub fn set_stage(&mut self, stage: Stage) -> Result<()> {
        self.state.stage = stage;
        self.state.save(self.layout.state_file())
    }

    /// Download the URL list into the unprocessed tree.
    ///
    /// The first download after a reset wipes both output trees; later calls
    /// resume and skip files already present.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingUrlFile`] before touching anything if
    /// the URL list is absent, or an error if the outputs cannot be prepared.
    pub fn download(
        &mut self,
        fetcher: &dyn Fetch,
        sink: &dyn ProgressSink<DownloadOutcome>,
    ) -> Result<Tally<DownloadOutcome>> {
        let urls = read_url_list(self.layout.url_file())?;
        if !self.state.outputs_prepared {
            tracing::info!("first download since reset, clearing output trees");
            self.layout.wipe_outputs()?;
            self.state.outputs_prepared = true;
            self.state.save(self.layout.state_file())?;
        }

        let tally = download_all(
            &self.layout,
            &urls,
            fetcher,
            self.options.download_workers,
            sink,
        )?;
        tracing::info!(%tally, "download finished");
        self.finish(Stage::Download)?;
        Ok(tally)
    }

    /// Move images without the mark to the processed tree.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingDirectory`] if the unprocessed tree is
    /// missing, or an error if the pool or state write fails.
    pub fn filter(&mut self, sink: &dyn ProgressSink<FilterOutcome>) -> Result<Tally<FilterOutcome>> {
        self.check_order(Stage::Filter);
        let classifier = LogoClassifier::new(self.options.classifier.clone());
        let tally = filter_unprocessed(&self.layout, &classifier, self.options.cpu_workers, sink)?;
        tracing::info!(%tally, "filter finished");
        self.finish(Stage::Filter)?;
        Ok(tally)
    }

    /// Cover template matches using the persisted threshold. Templates are
    /// re-read from the store on every call.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingDirectory`] if the template store or the
    /// unprocessed tree is missing, or an error if the pool or state write
    /// fails.
    pub fn redact(&mut self, sink: &dyn ProgressSink<RedactOutcome>) -> Result<Tally<RedactOutcome>> {
        self.check_order(Stage::Redact);
        let templates = TemplateSet::load_dir(self.layout.template_dir())?;
        let tally = redact_unprocessed(
            &self.layout,
            &templates,
            self.state.threshold,
            self.options.cpu_workers,
            sink,
        )?;
        tracing::info!(%tally, "redaction finished");
        self.finish(Stage::Redact)?;
        Ok(tally)
    }

    /// URLs from the list that have no processed file yet.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingUrlFile`] if the URL list is absent, or
    /// an error if the state cannot be written.
    pub fn validate(&mut self) -> Result<Vec<String>> {
        self.check_order(Stage::Validate);
        let urls = read_url_list(self.layout.url_file())?;
        let missing = missing_assets(&self.layout, &urls);
        self.finish(Stage::Validate)?;
        Ok(missing)
    }

    /// Delete the run state and empty both output trees. The URL list and
    /// template store are left alone.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if deletion or recreation fails.
    pub fn reset(&mut self) -> Result<()> {
        let state_file = self.layout.state_file();
        if state_file.exists() {
            fs::remove_file(state_file)?;
        }
        self.layout.wipe_outputs()?;
        self.state = RunState::default();
        tracing::info!("workspace reset");
        Ok(())
    }

    /// Log when `stage` runs before its predecessor ever completed.
    fn check_order(&self, stage: Stage) {
        let previous = Stage::ALL.iter().copied().take_while(|s| *s != stage).last();
        if let Some(previous) = previous {
            if !self.state.is_complete(previous) {
                tracing::warn!(%stage, %previous, "running before the previous stage completed");
            }
        }
    }

    fn finish(&mut self, stage: Stage) -> Result<()> {
        self.state.complete(stage);
        self.state.save(self.layout.state_file())
    }
}
