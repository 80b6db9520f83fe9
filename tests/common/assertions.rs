//! Filesystem and summary assertions

use skin_dl::RunSummary;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every regular file under `root`, keyed by path relative to `root`
pub fn files_under(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("walkdir yields paths under root")
                .to_path_buf();
            let body = std::fs::read(entry.path()).expect("Failed to read file");
            (relative, body)
        })
        .collect()
}

/// Assert that no temporary publish files were left behind
pub fn assert_no_partial_files(root: &Path) {
    let leftovers: Vec<_> = files_under(root)
        .into_keys()
        .filter(|p| p.extension().is_some_and(|ext| ext == "part"))
        .collect();
    assert!(leftovers.is_empty(), "partial files left: {leftovers:?}");
}

/// Assert `attempted == succeeded + failed + skipped` and the outcome log matches
pub fn assert_counters_consistent(summary: &RunSummary) {
    assert_eq!(
        summary.attempted,
        summary.succeeded + summary.failed + summary.skipped,
        "counter invariant violated: {summary:?}"
    );
    assert_eq!(summary.attempted as usize, summary.outcomes.len());
}
