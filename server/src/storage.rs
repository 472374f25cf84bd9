//! On-disk areas and the handles that own files inside them.
//!
//! Three areas live under the data directory: `uploads` (request lifetime),
//! `converted` (until downloaded or swept) and `scratch` (one directory per
//! job). Every file name in them is a server generated [`StorageId`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

pub const UPLOADS_DIR: &str = "uploads";
pub const CONVERTED_DIR: &str = "converted";
pub const SCRATCH_DIR: &str = "scratch";

/// Opaque, collision-resistant name of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageId(Uuid);

impl StorageId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a client supplied token. Anything that is not a UUID is
    /// rejected, so a token can never name a path outside its area.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        Uuid::try_parse(token.trim()).ok().map(Self)
    }
}

impl fmt::Display for StorageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[derive(Debug, Clone)]
pub struct StorageLayout {
    uploads: PathBuf,
    converted: PathBuf,
    scratch: PathBuf,
}

impl StorageLayout {
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            uploads: root.join(UPLOADS_DIR),
            converted: root.join(CONVERTED_DIR),
            scratch: root.join(SCRATCH_DIR),
        }
    }

    /// Creates the areas, purges what a previous process left in the
    /// request-scoped ones and checks every area is writable.
    pub async fn bootstrap(root: &Path) -> io::Result<Self> {
        let layout = Self::new(root);
        for dir in [&layout.uploads, &layout.converted, &layout.scratch] {
            tokio::fs::create_dir_all(dir).await?;
            probe_writable(dir).await?;
        }
        let stale = purge(&layout.uploads).await? + purge(&layout.scratch).await?;
        if stale > 0 {
            tracing::info!("removed {stale} stale upload/scratch entries");
        }
        Ok(layout)
    }

    #[must_use]
    pub fn uploads(&self) -> &Path {
        &self.uploads
    }

    #[must_use]
    pub fn converted(&self) -> &Path {
        &self.converted
    }

    #[must_use]
    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    #[must_use]
    pub fn upload_path(&self, id: StorageId) -> PathBuf {
        self.uploads.join(id.to_string())
    }

    #[must_use]
    pub fn artifact_path(&self, id: StorageId) -> PathBuf {
        self.converted.join(id.to_string())
    }

    /// Fresh per-job scratch directory, removed when its last handle drops.
    pub fn scratch_dir(&self, id: StorageId) -> io::Result<Scratch> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("{id}-"))
            .tempdir_in(&self.scratch)?;
        Ok(Scratch::new(dir))
    }
}

/// Job scoped working directory shared with blocking workers.
///
/// Every clone keeps the directory alive, so a worker that is still writing
/// when its request goes away owns the tree until it returns. The shared
/// token tells such a worker to stop early.
#[derive(Debug, Clone)]
pub struct Scratch {
    dir: Arc<TempDir>,
    cancel: CancellationToken,
}

impl Scratch {
    #[must_use]
    pub fn new(dir: TempDir) -> Self {
        Self {
            dir: Arc::new(dir),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the job when the returned guard drops.
    #[must_use]
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }

    /// Removes the directory now when no worker holds it any more.
    ///
    /// Returns `false` when another handle is still alive; the last one to
    /// drop removes it then.
    pub fn close(self) -> io::Result<bool> {
        match Arc::try_unwrap(self.dir) {
            Ok(dir) => dir.close().map(|()| true),
            Err(_) => Ok(false),
        }
    }
}

/// A file that is deleted when the handle goes away.
///
/// Dropping covers every exit path including cancelled request futures;
/// [`OwnedFile::remove`] is the explicit asynchronous way out and
/// [`OwnedFile::keep`] hands the path over to someone else.
#[derive(Debug)]
pub struct OwnedFile {
    path: PathBuf,
    armed: bool,
}

impl OwnedFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) -> io::Result<()> {
        self.armed = false;
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for OwnedFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("file {} not removed. Error: {e}", self.path.display());
            }
        }
    }
}

async fn probe_writable(dir: &Path) -> io::Result<()> {
    let probe = dir.join(format!(".probe-{}", StorageId::generate()));
    tokio::fs::write(&probe, b"").await?;
    tokio::fs::remove_file(&probe).await
}

/// Removes every entry of a directory, returning how many were removed.
pub async fn purge(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => tracing::warn!("{} not purged. Error: {e}", path.display()),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_distinct() {
        // Act
        let ids: HashSet<StorageId> = (0..1000).map(|_| StorageId::generate()).collect();

        // Assert
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn id_round_trips_through_display() {
        // Arrange
        let id = StorageId::generate();

        // Act
        let parsed = StorageId::parse(&id.to_string());

        // Assert
        assert_eq!(parsed, Some(id));
        assert_eq!(id.to_string().len(), 32);
    }

    #[rstest]
    #[case("")]
    #[case("../uploads/secret")]
    #[case("..%2F..%2Fetc%2Fpasswd")]
    #[case("/etc/passwd")]
    #[case("0123")]
    #[trace]
    fn id_parse_rejects_non_uuid(#[case] token: &str) {
        // Act
        let parsed = StorageId::parse(token);

        // Assert
        assert!(parsed.is_none());
    }

    #[test]
    fn owned_file_removed_on_drop() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, b"x").unwrap();

        // Act
        drop(OwnedFile::new(path.clone()));

        // Assert
        assert!(!path.exists());
    }

    #[test]
    fn owned_file_kept() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        std::fs::write(&path, b"x").unwrap();

        // Act
        let kept = OwnedFile::new(path.clone()).keep();

        // Assert
        assert_eq!(kept, path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn bootstrap_creates_areas_and_purges_stale_uploads() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(root.path());
        std::fs::create_dir_all(layout.uploads()).unwrap();
        std::fs::create_dir_all(layout.converted()).unwrap();
        std::fs::write(layout.uploads().join("leftover"), b"x").unwrap();
        std::fs::write(layout.converted().join("artifact"), b"x").unwrap();

        // Act
        let layout = StorageLayout::bootstrap(root.path()).await.unwrap();

        // Assert
        assert!(layout.scratch().is_dir());
        assert!(!layout.uploads().join("leftover").exists());
        assert!(layout.converted().join("artifact").exists());
    }

    #[test]
    fn scratch_dirs_are_unique_per_job() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(root.path());
        std::fs::create_dir_all(layout.scratch()).unwrap();
        let id = StorageId::generate();

        // Act
        let first = layout.scratch_dir(id).unwrap();
        let second = layout.scratch_dir(id).unwrap();

        // Assert
        assert_ne!(first.path(), second.path());
        assert!(first.path().starts_with(layout.scratch()));
    }

    #[test]
    fn scratch_outlives_request_while_worker_holds_it() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(root.path());
        std::fs::create_dir_all(layout.scratch()).unwrap();
        let scratch = layout.scratch_dir(StorageId::generate()).unwrap();
        let path = scratch.path().to_path_buf();
        let worker = scratch.clone();
        let guard = scratch.cancel_on_drop();

        // Act
        let closed = scratch.close().unwrap();
        drop(guard);

        // Assert
        assert!(!closed);
        assert!(worker.is_cancelled());
        assert!(path.is_dir());
        drop(worker);
        assert!(!path.exists());
    }

    #[test]
    fn scratch_closed_by_last_handle() {
        // Arrange
        let root = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(root.path());
        std::fs::create_dir_all(layout.scratch()).unwrap();
        let scratch = layout.scratch_dir(StorageId::generate()).unwrap();
        let path = scratch.path().to_path_buf();

        // Act
        let closed = scratch.close().unwrap();

        // Assert
        assert!(closed);
        assert!(!path.exists());
    }
}
