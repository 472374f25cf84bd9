use std::path::Path;

use kernel::Category;

use crate::error::ConvertError;
use crate::sniff::Resolution;
use crate::storage::{OwnedFile, StorageId};

/// A received file waiting for conversion.
///
/// Owns its stored copy: the file disappears when the record is dropped or
/// discarded, so it can never outlive the request that created it.
#[derive(Debug)]
pub struct UploadedFile {
    pub id: StorageId,
    /// Client supplied, sanitised, only ever displayed
    pub original_name: String,
    /// Client supplied and normalised, never used for dispatch
    pub declared_type: String,
    pub resolution: Option<Resolution>,
    pub size: u64,
    file: OwnedFile,
}

impl UploadedFile {
    #[must_use]
    pub fn new(
        id: StorageId,
        original_name: String,
        declared_type: String,
        size: u64,
        file: OwnedFile,
    ) -> Self {
        Self {
            id,
            original_name,
            declared_type,
            resolution: None,
            size,
            file,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Detected type once resolution ran.
    #[must_use]
    pub fn detected_type(&self) -> Option<&str> {
        self.resolution.as_ref().map(|r| r.mime.as_str())
    }

    pub async fn discard(self) -> std::io::Result<()> {
        self.file.remove().await
    }
}

/// Lifecycle of one conversion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Resolved,
    Converting,
    Completed,
    Failed,
}

impl JobState {
    /// Transitions only move forward; both terminal states are final.
    #[must_use]
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Received, Resolved)
                | (Resolved, Converting)
                | (Converting, Completed)
                | (Received | Resolved | Converting, Failed)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// One requested transform of one upload.
#[derive(Debug)]
pub struct ConversionJob {
    /// Storage id the artifact is published under
    pub output_id: StorageId,
    pub source_id: StorageId,
    pub category: Category,
    pub target: String,
    state: JobState,
    error: Option<String>,
}

impl ConversionJob {
    #[must_use]
    pub fn new(source_id: StorageId, category: Category, target: &str) -> Self {
        Self {
            output_id: StorageId::generate(),
            source_id,
            category,
            target: target.trim().to_ascii_lowercase(),
            state: JobState::Received,
            error: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Present only in the failed state.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn advance(&mut self, next: JobState) {
        debug_assert!(
            next != JobState::Failed,
            "use fail() to record the error"
        );
        if self.state.can_advance_to(next) {
            tracing::debug!("job {}: {:?} -> {:?}", self.output_id, self.state, next);
            self.state = next;
        } else {
            tracing::error!(
                "job {}: illegal transition {:?} -> {:?}",
                self.output_id,
                self.state,
                next
            );
        }
    }

    pub fn fail(&mut self, error: &ConvertError) {
        if self.state.can_advance_to(JobState::Failed) {
            self.state = JobState::Failed;
            self.error = Some(error.to_string());
        }
    }
}

/// Output of a successful conversion, retrievable once.
#[derive(Debug, Clone)]
pub struct ConvertedArtifact {
    /// Retrieval token and file name in the converted area
    pub id: StorageId,
    pub display_name: String,
}

impl ConvertedArtifact {
    #[must_use]
    pub fn new(id: StorageId, original_name: &str, target: &str) -> Self {
        Self {
            id,
            display_name: display_name(original_name, target),
        }
    }

    #[must_use]
    pub fn download_url(&self) -> String {
        format!(
            "/download?file={}&name={}",
            self.id,
            urlencoding::encode(&self.display_name)
        )
    }
}

/// Original name with its last extension replaced by the requested target,
/// spelled the way the client asked for it.
#[must_use]
pub fn display_name(original_name: &str, target: &str) -> String {
    let stem = match original_name.rfind('.') {
        Some(ix) if ix > 0 => &original_name[..ix],
        _ => original_name,
    };
    format!("{stem}.{}", target.trim_start_matches('.'))
}
