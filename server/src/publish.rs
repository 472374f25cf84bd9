//! Single-use retrieval of converted artifacts and their expiry.

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use axum::body::Bytes;
use futures::Stream;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::error::ConvertError;
use crate::storage::{OwnedFile, StorageId, StorageLayout};

const CLAIMED_SUFFIX: &str = "claimed";

/// Artifact content that removes its file once the stream is gone.
pub struct ArtifactStream {
    inner: ReaderStream<tokio::fs::File>,
    _file: OwnedFile,
}

impl Stream for ArtifactStream {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

/// An artifact taken out of the converted area.
pub struct Claimed {
    pub size: u64,
    pub stream: ArtifactStream,
}

/// Takes the artifact behind `token` for exclusive delivery.
///
/// The rename is the claim: of two concurrent claimants exactly one wins,
/// the other sees `NotFound`, as does anyone asking afterwards.
pub async fn claim(layout: &StorageLayout, token: &str) -> Result<Claimed, ConvertError> {
    let id = StorageId::parse(token).ok_or(ConvertError::NotFound)?;
    let published = layout.artifact_path(id);
    let claimed = layout
        .converted()
        .join(format!("{id}.{}.{CLAIMED_SUFFIX}", Uuid::new_v4().simple()));

    match tokio::fs::rename(&published, &claimed).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ConvertError::NotFound),
        Err(e) => return Err(e.into()),
    }
    let guard = OwnedFile::new(claimed);

    let file = tokio::fs::File::open(guard.path()).await?;
    let size = file.metadata().await?.len();
    tracing::info!("artifact {id} claimed: {size} bytes");
    Ok(Claimed {
        size,
        stream: ArtifactStream {
            inner: ReaderStream::new(file),
            _file: guard,
        },
    })
}

/// Removes converted entries older than `retention`. Returns how many went.
pub async fn sweep(dir: &Path, retention: Duration) -> io::Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let age = meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < retention {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            // claimed or swept concurrently
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("{:?} not swept. Error: {e}", entry.file_name()),
        }
    }
    Ok(removed)
}

/// Periodically sweeps the converted area for the life of the process.
pub fn start_sweeper(layout: StorageLayout, every: Duration, retention: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "sweeper started (retention: {}s, interval: {}s)",
            retention.as_secs(),
            every.as_secs()
        );
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match sweep(layout.converted(), retention).await {
                Ok(0) => {}
                Ok(n) => tracing::info!("swept {n} expired artifacts"),
                Err(e) => tracing::error!("sweep failed: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn layout() -> (tempfile::TempDir, StorageLayout) {
        let root = tempfile::tempdir().unwrap();
        let layout = StorageLayout::bootstrap(root.path()).await.unwrap();
        (root, layout)
    }

    async fn publish(layout: &StorageLayout, content: &[u8]) -> StorageId {
        let id = StorageId::generate();
        tokio::fs::write(layout.artifact_path(id), content).await.unwrap();
        id
    }

    async fn drain(mut stream: ArtifactStream) -> Vec<u8> {
        let mut content = Vec::new();
        while let Some(chunk) = stream.next().await {
            content.extend_from_slice(&chunk.unwrap());
        }
        content
    }

    fn count(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn claim_delivers_once() {
        // Arrange
        let (_root, layout) = layout().await;
        let id = publish(&layout, b"converted bytes").await;

        // Act
        let first = claim(&layout, &id.to_string()).await.unwrap();
        let second = claim(&layout, &id.to_string()).await;

        // Assert
        assert!(matches!(second, Err(ConvertError::NotFound)));
        assert_eq!(first.size, 15);
        assert_eq!(drain(first.stream).await, b"converted bytes");
        assert_eq!(count(layout.converted()), 0);
    }

    #[tokio::test]
    async fn dropped_stream_removes_file() {
        // Arrange
        let (_root, layout) = layout().await;
        let id = publish(&layout, b"abc").await;
        let claimed = claim(&layout, &id.to_string()).await.unwrap();

        // Act
        drop(claimed);

        // Assert
        assert_eq!(count(layout.converted()), 0);
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        // Arrange
        let (_root, layout) = layout().await;
        let id = publish(&layout, b"abc").await;
        let token = id.to_string();

        // Act
        let results = futures::future::join_all((0..8).map(|_| claim(&layout, &token))).await;

        // Assert
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
    }

    #[rstest::rstest]
    #[case("")]
    #[case("../../etc/passwd")]
    #[case("not-a-uuid")]
    #[case("00000000000000000000000000000000")]
    #[trace]
    #[tokio::test]
    async fn unknown_tokens_not_found(#[case] token: &str) {
        // Arrange
        let (_root, layout) = layout().await;

        // Act
        let result = claim(&layout, token).await;

        // Assert
        assert!(matches!(result, Err(ConvertError::NotFound)));
    }

    #[tokio::test]
    async fn sweep_honours_retention() {
        // Arrange
        let (_root, layout) = layout().await;
        publish(&layout, b"one").await;
        publish(&layout, b"two").await;

        // Act
        let kept = sweep(layout.converted(), Duration::from_secs(3600)).await.unwrap();
        let swept = sweep(layout.converted(), Duration::ZERO).await.unwrap();

        // Assert
        assert_eq!(kept, 0);
        assert_eq!(swept, 2);
        assert_eq!(count(layout.converted()), 0);
    }
}
