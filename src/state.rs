//! Persisted run state: current stage, redaction threshold, completion flags.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default template-match threshold.
pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Bulk download into the unprocessed tree.
    Download,
    /// Color/geometry logo classification.
    Filter,
    /// Multi-scale template redaction.
    Redact,
    /// Completeness check against the URL list.
    Validate,
}

impl Stage {
    /// All stages in order.
    pub const ALL: [Stage; 4] = [Stage::Download, Stage::Filter, Stage::Redact, Stage::Validate];

    /// The stage after this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Download => Some(Stage::Filter),
            Stage::Filter => Some(Stage::Redact),
            Stage::Redact => Some(Stage::Validate),
            Stage::Validate => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Stage::Download => "download",
            Stage::Filter => "filter",
            Stage::Redact => "redact",
            Stage::Validate => "validate",
        })
    }
}

/// The on-disk run-state record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    /// Stage the operator is currently on.
    pub stage: Stage,
    /// Template-match threshold in `[0, 1]`.
    pub threshold: f32,
    /// Completion flag per stage.
    pub stage_complete: BTreeMap<Stage, bool>,
    /// Whether the first download since the last reset already wiped the
    /// output trees. Later downloads resume instead of wiping.
    pub outputs_prepared: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            stage: Stage::Download,
            threshold: DEFAULT_THRESHOLD,
            stage_complete: Stage::ALL.iter().map(|s| (*s, false)).collect(),
            outputs_prepared: false,
        }
    }
}

impl RunState {
    /// Load the record at `path`.
    ///
    /// A missing file yields the defaults. A file that exists but does not
    /// parse is logged and also replaced by the defaults, so a damaged record
    /// never blocks the pipeline. An out-of-range threshold resets only the
    /// threshold.
    ///
    /// A fallback record has `outputs_prepared` unset; callers that own the
    /// output trees must restore it from disk (see [`crate::Pipeline::open`]).
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&text) {
            Ok(state) if validate_threshold(state.threshold).is_ok() => Ok(state),
            Ok(state) => {
                tracing::warn!(
                    path = %path.display(),
                    threshold = state.threshold,
                    "run state has an invalid threshold, using the default"
                );
                Ok(Self {
                    threshold: DEFAULT_THRESHOLD,
                    ..state
                })
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt run state, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write the record atomically: serialize to a sibling temp file, then
    /// rename over `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, writing or renaming fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Set the redaction threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidThreshold`] for values outside `[0, 1]`.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        self.threshold = validate_threshold(threshold)?;
        Ok(())
    }

    /// Whether `stage` has completed at least once since the last reset.
    #[must_use]
    pub fn is_complete(&self, stage: Stage) -> bool {
        self.stage_complete.get(&stage).copied().unwrap_or(false)
    }

    /// Record that `stage` finished and move the cursor past it.
    pub fn complete(&mut self, stage: Stage) {
        self.stage_complete.insert(stage, true);
        self.stage = stage.next().unwrap_or(stage);
    }
}

/// Check that `threshold` lies in `[0, 1]`.
///
/// # Errors
///
/// Returns [`Error::InvalidThreshold`] otherwise (including NaN).
pub fn validate_threshold(threshold: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(Error::InvalidThreshold(threshold))
    }
}
