//! Fixed directory layout of a triage workspace.
//!
//! ```text
//! <root>/input/qc.txt                     URL list
//! <root>/input/state.json                 run state
//! <root>/output/unprocessed_images/...    assets awaiting triage
//! <root>/output/processed_images/...      assets done with triage
//! <root>/templates/                       template bitmaps
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;
use crate::imaging::is_supported_image;

/// Resolved paths of one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathLayout {
    input_dir: PathBuf,
    unprocessed_dir: PathBuf,
    processed_dir: PathBuf,
    template_dir: PathBuf,
    url_file: PathBuf,
    state_file: PathBuf,
}

impl PathLayout {
    /// Lay out a workspace under `root`. Nothing is created on disk.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let input_dir = root.join("input");
        let output_dir = root.join("output");
        Self {
            url_file: input_dir.join("qc.txt"),
            state_file: input_dir.join("state.json"),
            input_dir,
            unprocessed_dir: output_dir.join("unprocessed_images"),
            processed_dir: output_dir.join("processed_images"),
            template_dir: root.join("templates"),
        }
    }

    /// Directory holding the URL list and the run state.
    #[must_use]
    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Root of the unprocessed tree.
    #[must_use]
    pub fn unprocessed_dir(&self) -> &Path {
        &self.unprocessed_dir
    }

    /// Root of the processed tree.
    #[must_use]
    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    /// Template store.
    #[must_use]
    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    /// The URL list file.
    #[must_use]
    pub fn url_file(&self) -> &Path {
        &self.url_file
    }

    /// The persisted run-state record.
    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Create the input, template and both output directories if missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.input_dir,
            &self.template_dir,
            &self.unprocessed_dir,
            &self.processed_dir,
        ] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Delete both output trees and recreate them empty.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if removal or creation fails.
    pub fn wipe_outputs(&self) -> Result<()> {
        for dir in [&self.processed_dir, &self.unprocessed_dir] {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Map a file inside the unprocessed tree to the same relative location
    /// in the processed tree. Returns `None` for paths outside the tree.
    #[must_use]
    pub fn mirror_to_processed(&self, source: &Path) -> Option<PathBuf> {
        source
            .strip_prefix(&self.unprocessed_dir)
            .ok()
            .map(|rel| self.processed_dir.join(rel))
    }

    /// All supported image files currently in the unprocessed tree, sorted.
    #[must_use]
    pub fn pending_images(&self) -> Vec<PathBuf> {
        collect_images(&self.unprocessed_dir)
    }

    /// Number of files of any kind left in the unprocessed tree.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        count_files(&self.unprocessed_dir)
    }

    /// Number of files of any kind in the processed tree.
    #[must_use]
    pub fn processed_count(&self) -> usize {
        count_files(&self.processed_dir)
    }

    /// Whether either output tree holds at least one file.
    #[must_use]
    pub fn has_outputs(&self) -> bool {
        [&self.unprocessed_dir, &self.processed_dir]
            .into_iter()
            .any(|dir| files(dir).next().is_some())
    }
}

fn files(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
}

fn count_files(dir: &Path) -> usize {
    files(dir).count()
}

/// Recursively collect supported image files below `dir` in path order.
///
/// A missing directory yields an empty list.
#[must_use]
pub fn collect_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|p| is_supported_image(p))
        .collect()
}
