//! Completeness check of the processed tree against the URL list.

use crate::assets::relative_path;
use crate::layout::PathLayout;

/// URLs whose processed file is missing, in list order.
///
/// Each URL's exact three-segment relative path is looked up under the
/// processed tree only. URLs without such a path can never be satisfied and
/// are always reported. Read-only; safe to call any number of times.
#[must_use]
pub fn missing_assets(layout: &PathLayout, urls: &[String]) -> Vec<String> {
    let missing: Vec<String> = urls
        .iter()
        .filter(|url| {
            relative_path(url).is_none_or(|rel| !layout.processed_dir().join(rel).is_file())
        })
        .cloned()
        .collect();
    tracing::info!(checked = urls.len(), missing = missing.len(), "validated processed tree");
    missing
}
