//! Output tree: classification, destination paths, dedup claims and atomic publish
//!
//! Layout is `<root>/{skins,capes,others}/<file>.png`. A file only ever appears
//! at its final path fully written: bodies go to a temporary file in the same
//! directory first and are linked into place without clobbering.

use bytes::Bytes;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::TaskError;
use crate::types::{AssetType, Category, SkinRecord};

/// Longest sanitized display name kept in a file name, in characters
const MAX_NAME_CHARS: usize = 64;

/// Characters of the content hash used in the fallback file name
const HASH_PREFIX_CHARS: usize = 8;

/// Map a texture type to its destination category
///
/// ```
/// use skin_dl::output::classify;
/// use skin_dl::types::{AssetType, Category};
///
/// assert_eq!(classify(AssetType::Alex), Category::Skins);
/// assert_eq!(classify(AssetType::Unknown), Category::Others);
/// ```
pub fn classify(asset_type: AssetType) -> Category {
    match asset_type {
        AssetType::Steve | AssetType::Alex => Category::Skins,
        AssetType::Cape => Category::Capes,
        AssetType::Unknown => Category::Others,
    }
}

/// Reduce a string to a safe file name component
///
/// Keeps Unicode alphanumerics plus `.`, `_` and `-`, drops everything else,
/// and strips leading dots so the result is never hidden or a relative path
/// component.
pub fn sanitize_component(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    kept.trim_start_matches('.').to_string()
}

/// Where one record's texture is stored
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DestinationPath {
    category: Category,
    path: PathBuf,
}

impl DestinationPath {
    /// Derive the destination for a record under `root`
    ///
    /// The file name always ends in the requested ID, so two IDs never share
    /// a path and the same record always maps to the same path.
    pub fn derive(root: &Path, record: &SkinRecord) -> Self {
        let category = classify(record.asset_type);
        let id = record.id;

        let name: String = sanitize_component(&record.name)
            .chars()
            .take(MAX_NAME_CHARS)
            .collect();

        let file_name = if name.is_empty() {
            let hash_prefix: String = record
                .content_hash
                .as_deref()
                .map(sanitize_component)
                .unwrap_or_default()
                .chars()
                .take(HASH_PREFIX_CHARS)
                .collect();
            if hash_prefix.is_empty() {
                format!("{}.png", id)
            } else {
                format!("{}_{}.png", id, hash_prefix)
            }
        } else {
            let mut kind = sanitize_component(&record.raw_type);
            if kind.is_empty() {
                kind = "unknown".to_string();
            }
            format!("{}_{}_{}.png", name, kind, id)
        };

        Self {
            category,
            path: root.join(category.dir_name()).join(file_name),
        }
    }

    /// Destination category
    pub fn category(&self) -> Category {
        self.category
    }

    /// Full path of the final file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

type InFlight = Arc<Mutex<HashSet<PathBuf>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<PathBuf>> {
    // The set stays consistent even if a holder panicked; every critical section is a single insert/remove
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Result of [`OutputTree::claim`]
#[derive(Debug)]
pub enum Claim {
    /// Nobody else produces this path; hold the guard until the task ends
    Fresh(ClaimGuard),
    /// The file exists or another worker is producing it
    Duplicate,
}

/// Exclusive right to produce one destination path within this process
///
/// Dropping the guard releases the path.
#[derive(Debug)]
pub struct ClaimGuard {
    path: PathBuf,
    in_flight: InFlight,
}

impl ClaimGuard {
    /// The claimed path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.path);
    }
}

/// What [`OutputTree::publish`] did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishResult {
    /// The body is now at the final path
    Written {
        /// Bytes written
        bytes: u64,
    },
    /// A file appeared at the final path first; it was left untouched
    AlreadyExists,
}

/// The output root shared by all workers
#[derive(Clone, Debug)]
pub struct OutputTree {
    root: PathBuf,
    in_flight: InFlight,
}

impl OutputTree {
    /// Create a handle for `root`; nothing is touched on disk yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output root (category folders are created on demand)
    pub async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    /// Destination for a record inside this tree
    pub fn destination(&self, record: &SkinRecord) -> DestinationPath {
        DestinationPath::derive(&self.root, record)
    }

    /// Reserve a destination, or report it as a duplicate
    ///
    /// The in-flight set is consulted first, then the filesystem.
    pub async fn claim(&self, dest: &DestinationPath) -> Result<Claim, TaskError> {
        let inserted = lock(&self.in_flight).insert(dest.path.clone());
        if !inserted {
            return Ok(Claim::Duplicate);
        }

        let guard = ClaimGuard {
            path: dest.path.clone(),
            in_flight: Arc::clone(&self.in_flight),
        };

        match tokio::fs::try_exists(&dest.path).await {
            Ok(false) => Ok(Claim::Fresh(guard)),
            Ok(true) => Ok(Claim::Duplicate),
            // Nothing can exist below a non-directory; publish reports the real failure
            Err(e) if e.kind() == std::io::ErrorKind::NotADirectory => Ok(Claim::Fresh(guard)),
            Err(source) => Err(TaskError::Write {
                path: dest.path.clone(),
                source,
            }),
        }
    }

    /// Atomically place `body` at the destination
    ///
    /// Never overwrites an existing file and never leaves a partial file at
    /// the final path; the temporary file is removed on every failure.
    pub async fn publish(
        &self,
        dest: &DestinationPath,
        body: Bytes,
    ) -> Result<PublishResult, TaskError> {
        let target = dest.path.clone();
        let dir = match target.parent() {
            Some(dir) => dir.to_path_buf(),
            None => self.root.clone(),
        };

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TaskError::Write {
                path: dir.clone(),
                source,
            })?;

        let join_target = target.clone();
        tokio::task::spawn_blocking(move || write_noclobber(&dir, &target, &body))
            .await
            .map_err(|e| TaskError::Write {
                path: join_target,
                source: std::io::Error::other(e),
            })?
    }
}

fn write_noclobber(dir: &Path, target: &Path, body: &[u8]) -> Result<PublishResult, TaskError> {
    let write_err = |source: std::io::Error| TaskError::Write {
        path: target.to_path_buf(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".skin-dl-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(write_err)?;
    tmp.write_all(body).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    match tmp.persist_noclobber(target) {
        Ok(_) => Ok(PublishResult::Written {
            bytes: body.len() as u64,
        }),
        // The temp file is dropped (and deleted) with the error
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
            Ok(PublishResult::AlreadyExists)
        }
        Err(e) => Err(write_err(e.error)),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SkinId;

    fn record(id: u64, name: &str, raw_type: &str, hash: Option<&str>) -> SkinRecord {
        SkinRecord {
            id: SkinId(id),
            tid: Some(id),
            name: name.to_string(),
            asset_type: AssetType::from_api(raw_type),
            raw_type: raw_type.to_string(),
            content_hash: hash.map(str::to_string),
            size_bytes: None,
        }
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn classification_is_total() {
        assert_eq!(classify(AssetType::Steve), Category::Skins);
        assert_eq!(classify(AssetType::Alex), Category::Skins);
        assert_eq!(classify(AssetType::Cape), Category::Capes);
        assert_eq!(classify(AssetType::Unknown), Category::Others);
    }

    #[test]
    fn sanitize_keeps_unicode_alphanumerics_and_safe_punctuation() {
        assert_eq!(sanitize_component("Blue Hoodie!"), "BlueHoodie");
        assert_eq!(sanitize_component("雪_fox-v1.2"), "雪_fox-v1.2");
        assert_eq!(sanitize_component("../../etc/passwd"), "etcpasswd");
        assert_eq!(sanitize_component("..."), "");
        assert_eq!(sanitize_component("a/b\\c:d*e?"), "abcde");
    }

    #[test]
    fn derive_uses_name_type_and_id() {
        let root = Path::new("/out");
        let dest = DestinationPath::derive(root, &record(42, "Cool Skin", "alex", Some("abc")));
        assert_eq!(dest.category(), Category::Skins);
        assert_eq!(dest.path(), Path::new("/out/skins/CoolSkin_alex_42.png"));

        let dest = DestinationPath::derive(root, &record(7, "wings", "elytra", Some("abc")));
        assert_eq!(dest.path(), Path::new("/out/others/wings_elytra_7.png"));
    }

    #[test]
    fn derive_falls_back_to_id_and_hash_prefix() {
        let root = Path::new("/out");
        let dest = DestinationPath::derive(
            root,
            &record(9, "???", "cape", Some("0123456789abcdef")),
        );
        assert_eq!(dest.path(), Path::new("/out/capes/9_01234567.png"));

        let dest = DestinationPath::derive(root, &record(9, "", "cape", None));
        assert_eq!(dest.path(), Path::new("/out/capes/9.png"));
    }

    #[test]
    fn colliding_names_get_distinct_paths() {
        let root = Path::new("/out");
        let a = DestinationPath::derive(root, &record(1, "Steve", "steve", Some("h1")));
        let b = DestinationPath::derive(root, &record(2, "Steve", "steve", Some("h2")));
        assert_ne!(a, b);
        assert_eq!(
            a,
            DestinationPath::derive(root, &record(1, "Steve", "steve", Some("h1"))),
            "derivation is stable"
        );
    }

    #[test]
    fn long_names_are_truncated() {
        let long = "x".repeat(300);
        let dest = DestinationPath::derive(Path::new("/o"), &record(3, &long, "steve", None));
        let file = dest.path().file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(file, format!("{}_steve_3.png", "x".repeat(MAX_NAME_CHARS)));
    }

    #[tokio::test]
    async fn second_claim_on_same_path_is_duplicate_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let tree = OutputTree::new(dir.path());
        let dest = tree.destination(&record(1, "a", "steve", Some("h")));

        let first = tree.claim(&dest).await.unwrap();
        assert!(matches!(first, Claim::Fresh(_)));
        assert!(matches!(tree.claim(&dest).await.unwrap(), Claim::Duplicate));

        drop(first);
        assert!(
            matches!(tree.claim(&dest).await.unwrap(), Claim::Fresh(_)),
            "dropping the guard releases the path"
        );
    }

    #[tokio::test]
    async fn existing_file_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let tree = OutputTree::new(dir.path());
        let dest = tree.destination(&record(5, "old", "cape", Some("h")));

        std::fs::create_dir_all(dest.path().parent().unwrap()).unwrap();
        std::fs::write(dest.path(), b"already here").unwrap();

        assert!(matches!(tree.claim(&dest).await.unwrap(), Claim::Duplicate));
        assert!(lock(&tree.in_flight).is_empty(), "claim released on duplicate");
    }

    #[tokio::test]
    async fn publish_creates_category_dir_and_writes_body() {
        let dir = tempfile::tempdir().unwrap();
        let tree = OutputTree::new(dir.path().join("imgs"));
        tree.prepare().await.unwrap();
        let dest = tree.destination(&record(11, "hoodie", "steve", Some("h")));

        let result = tree
            .publish(&dest, Bytes::from_static(b"\x89PNG-body"))
            .await
            .unwrap();

        assert_eq!(result, PublishResult::Written { bytes: 9 });
        assert_eq!(std::fs::read(dest.path()).unwrap(), b"\x89PNG-body");
        assert_eq!(
            dir_entries(dest.path().parent().unwrap()),
            vec!["hoodie_steve_11.png".to_string()],
            "no temporary file left behind"
        );
    }

    #[tokio::test]
    async fn publish_never_clobbers_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let tree = OutputTree::new(dir.path());
        let dest = tree.destination(&record(12, "x", "steve", Some("h")));

        std::fs::create_dir_all(dest.path().parent().unwrap()).unwrap();
        std::fs::write(dest.path(), b"original").unwrap();

        let result = tree
            .publish(&dest, Bytes::from_static(b"replacement"))
            .await
            .unwrap();

        assert_eq!(result, PublishResult::AlreadyExists);
        assert_eq!(std::fs::read(dest.path()).unwrap(), b"original");
        assert_eq!(dir_entries(dest.path().parent().unwrap()).len(), 1);
    }

    #[tokio::test]
    async fn publish_reports_write_error_when_category_dir_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let tree = OutputTree::new(dir.path());
        // A plain file where the category directory should be
        std::fs::write(dir.path().join("skins"), b"not a dir").unwrap();
        let dest = tree.destination(&record(13, "x", "alex", Some("h")));

        let err = tree
            .publish(&dest, Bytes::from_static(b"body"))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Write { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn claim_under_blocked_category_dir_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let tree = OutputTree::new(dir.path());
        std::fs::write(dir.path().join("skins"), b"not a dir").unwrap();
        let dest = tree.destination(&record(14, "y", "steve", Some("h")));

        assert!(matches!(tree.claim(&dest).await.unwrap(), Claim::Fresh(_)));
    }
}
