//! Upload intake: size and declared-type checks, then a private copy.

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::AsyncWriteExt;

use crate::domain::UploadedFile;
use crate::error::ConvertError;
use crate::formats;
use crate::storage::{OwnedFile, StorageId, StorageLayout};

const MAX_NAME_CHARS: usize = 200;
const FALLBACK_NAME: &str = "file";

/// Persists one uploaded stream under a fresh storage id.
///
/// The declared type is checked before anything touches the disk. A stream
/// exceeding `max_bytes` or failing midway leaves nothing behind.
pub async fn accept<S, E>(
    layout: &StorageLayout,
    max_bytes: u64,
    original_name: Option<&str>,
    declared_type: Option<&str>,
    stream: S,
) -> Result<UploadedFile, ConvertError>
where
    S: Stream<Item = Result<Bytes, E>>,
    ConvertError: From<E>,
{
    let declared = declared_type.map(formats::normalize).unwrap_or_default();
    if !formats::is_allowed(&declared) {
        return Err(ConvertError::UnsupportedType(declared));
    }

    let id = StorageId::generate();
    let path = layout.upload_path(id);
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await?;
    let owned = OwnedFile::new(path);

    let mut writer = tokio::io::BufWriter::new(file);
    let mut size: u64 = 0;
    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        if size > max_bytes {
            return Err(ConvertError::PayloadTooLarge { limit: max_bytes });
        }
        writer.write_all(&chunk).await?;
    }
    writer.flush().await?;

    if size == 0 {
        return Err(ConvertError::NoFileProvided);
    }

    let name = sanitize_name(original_name.unwrap_or_default());
    tracing::info!("file: {name} read: {size} declared: {declared} id: {id}");
    Ok(UploadedFile::new(id, name, declared, size, owned))
}

/// Reduces a client supplied file name to a display-safe last component.
///
/// Path separators, control characters and quotes never survive, so the
/// result is safe both as a single path component and inside a header.
#[must_use]
pub fn sanitize_name(raw: &str) -> String {
    let last = match raw.rfind(['\\', '/']) {
        Some(ix) => &raw[ix + 1..],
        None => raw,
    };
    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '"' | ':' | '*' | '?' | '<' | '>' | '|'))
        .take(MAX_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        FALLBACK_NAME.to_owned()
    } else {
        cleaned.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io;

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, io::Error>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    async fn layout() -> (tempfile::TempDir, StorageLayout) {
        let root = tempfile::tempdir().unwrap();
        let layout = StorageLayout::bootstrap(root.path()).await.unwrap();
        (root, layout)
    }

    fn uploads_count(layout: &StorageLayout) -> usize {
        std::fs::read_dir(layout.uploads()).unwrap().count()
    }

    #[rstest]
    #[case("photo.jpg", "photo.jpg")]
    #[case("../../etc/passwd", "passwd")]
    #[case("C:\\Users\\me\\report.docx", "report.docx")]
    #[case("dir/sub/", "file")]
    #[case("..", "file")]
    #[case("", "file")]
    #[case("evil\"\r\nX-Header: 1.png", "evilX-Header 1.png")]
    #[case("  .bashrc ", "bashrc")]
    #[trace]
    fn sanitize_name_cases(#[case] raw: &str, #[case] expected: &str) {
        // Act
        let name = sanitize_name(raw);

        // Assert
        assert_eq!(name, expected);
    }

    #[test]
    fn sanitize_name_truncates() {
        // Arrange
        let raw = "a".repeat(1000);

        // Act
        let name = sanitize_name(&raw);

        // Assert
        assert_eq!(name.chars().count(), MAX_NAME_CHARS);
    }

    #[tokio::test]
    async fn accept_persists_stream() {
        // Arrange
        let (_root, layout) = layout().await;

        // Act
        let upload = accept(
            &layout,
            1024,
            Some("../secret/photo.png"),
            Some("image/png"),
            chunks(vec![b"\x89PNG".as_slice(), b"\r\n\x1a\n".as_slice()]),
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(upload.size, 8);
        assert_eq!(upload.original_name, "photo.png");
        assert_eq!(upload.declared_type, "image/png");
        assert!(upload.path().starts_with(layout.uploads()));
        assert_eq!(std::fs::read(upload.path()).unwrap(), b"\x89PNG\r\n\x1a\n");
    }

    #[tokio::test]
    async fn dropped_upload_removes_file() {
        // Arrange
        let (_root, layout) = layout().await;
        let upload = accept(&layout, 1024, None, Some("audio/x-wav"), chunks(vec![b"RIFF".as_slice()]))
            .await
            .unwrap();
        let path = upload.path().to_path_buf();

        // Act
        drop(upload);

        // Assert
        assert!(!path.exists());
        assert_eq!(uploads_count(&layout), 0);
    }

    #[tokio::test]
    async fn oversized_upload_rejected_and_removed() {
        // Arrange
        let (_root, layout) = layout().await;

        // Act
        let result = accept(
            &layout,
            8,
            Some("big.zip"),
            Some("application/zip"),
            chunks(vec![b"PK\x03\x04".as_slice(), b"0123".as_slice(), b"4567".as_slice()]),
        )
        .await;

        // Assert
        assert!(matches!(
            result,
            Err(ConvertError::PayloadTooLarge { limit: 8 })
        ));
        assert_eq!(uploads_count(&layout), 0);
    }

    #[tokio::test]
    async fn disallowed_type_rejected_before_writing() {
        // Arrange
        let (_root, layout) = layout().await;

        // Act
        let result = accept(
            &layout,
            1024,
            Some("run.sh"),
            Some("application/x-sh"),
            chunks(vec![b"#!/bin/sh".as_slice()]),
        )
        .await;

        // Assert
        assert!(matches!(result, Err(ConvertError::UnsupportedType(_))));
        assert_eq!(uploads_count(&layout), 0);
    }

    #[tokio::test]
    async fn missing_declared_type_rejected() {
        // Arrange
        let (_root, layout) = layout().await;

        // Act
        let result = accept(&layout, 1024, Some("x"), None, chunks(vec![b"x".as_slice()])).await;

        // Assert
        assert!(matches!(result, Err(ConvertError::UnsupportedType(_))));
    }

    #[tokio::test]
    async fn empty_upload_is_no_file() {
        // Arrange
        let (_root, layout) = layout().await;

        // Act
        let result = accept(&layout, 1024, Some("x.png"), Some("image/png"), chunks(vec![])).await;

        // Assert
        assert!(matches!(result, Err(ConvertError::NoFileProvided)));
        assert_eq!(uploads_count(&layout), 0);
    }

    #[tokio::test]
    async fn broken_stream_leaves_nothing() {
        // Arrange
        let (_root, layout) = layout().await;
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"\xFF\xD8\xFF")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        // Act
        let result = accept(&layout, 1024, Some("a.jpg"), Some("image/jpeg"), stream).await;

        // Assert
        assert!(matches!(result, Err(ConvertError::Io(_))));
        assert_eq!(uploads_count(&layout), 0);
    }
}
