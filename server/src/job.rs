//! One conversion from stored upload to published artifact.

use kernel::Category;

use crate::dispatch::{ConvertRequest, Dispatcher};
use crate::domain::{ConversionJob, ConvertedArtifact, JobState, UploadedFile};
use crate::error::ConvertError;
use crate::formats;
use crate::sniff::{self, Resolution};
use crate::storage::StorageLayout;

/// Resolves, converts and publishes one upload.
///
/// The upload is consumed: its stored copy is gone when this returns,
/// whatever the outcome. Nothing is published on failure.
pub async fn execute(
    layout: &StorageLayout,
    dispatcher: &Dispatcher,
    mut upload: UploadedFile,
    category: Category,
    target: &str,
) -> Result<ConvertedArtifact, ConvertError> {
    let mut job = ConversionJob::new(upload.id, category, target);
    let outcome = convert(layout, dispatcher, &mut upload, &mut job).await;

    let source = upload.id;
    if let Err(e) = upload.discard().await {
        tracing::error!("upload {source} not removed. Error: {e}");
    }

    match outcome {
        Ok(artifact) => {
            tracing::info!(
                "job {} {category} -> {}: completed",
                job.output_id,
                job.target
            );
            Ok(artifact)
        }
        Err(e) => {
            job.fail(&e);
            tracing::warn!(
                "job {} {category} -> {}: {:?} {}",
                job.output_id,
                job.target,
                job.state(),
                job.error().unwrap_or_default()
            );
            Err(e)
        }
    }
}

async fn convert(
    layout: &StorageLayout,
    dispatcher: &Dispatcher,
    upload: &mut UploadedFile,
    job: &mut ConversionJob,
) -> Result<ConvertedArtifact, ConvertError> {
    let resolution = sniff::resolve(upload.path(), &upload.declared_type).await?;
    tracing::info!(
        "upload {} declared: {} detected: {} verified: {}",
        upload.id,
        upload.declared_type,
        resolution.mime,
        resolution.verified
    );
    admit(job.category, &resolution)?;
    upload.resolution = Some(resolution);
    job.advance(JobState::Resolved);

    let (target, strategy) = dispatcher.select(job.category, &job.target)?;
    tracing::debug!("job {} dispatched to {}", job.output_id, strategy.name());
    job.advance(JobState::Converting);

    let scratch = layout.scratch_dir(job.output_id)?;
    // a dropped request stops whatever still works in its scratch
    let _cancel = scratch.cancel_on_drop();
    let request = ConvertRequest {
        input: upload.path(),
        detected_type: upload.detected_type().unwrap_or_default(),
        original_name: &upload.original_name,
        target,
        scratch: &scratch,
    };
    let result = strategy.convert(&request).await;
    let published = match result {
        Ok(output) => tokio::fs::rename(&output, layout.artifact_path(job.output_id))
            .await
            .map_err(ConvertError::from),
        Err(e) => Err(e),
    };

    let scratch_path = scratch.path().to_path_buf();
    match tokio::task::spawn_blocking(move || scratch.close()).await {
        Ok(Ok(true)) => {}
        Ok(Ok(false)) => tracing::debug!("scratch {} left to its worker", scratch_path.display()),
        _ => tracing::warn!("scratch {} not removed", scratch_path.display()),
    }

    published?;
    job.advance(JobState::Completed);
    Ok(ConvertedArtifact::new(
        job.output_id,
        &upload.original_name,
        &job.target,
    ))
}

/// Checks the detected type against what the category converts from.
fn admit(category: Category, resolution: &Resolution) -> Result<(), ConvertError> {
    if !resolution.verified && !formats::accepts_unverified(category) {
        return Err(ConvertError::TypeMismatch {
            category,
            detail: "content type could not be verified".to_owned(),
        });
    }
    if !formats::admits(category, &resolution.mime) {
        return Err(ConvertError::TypeMismatch {
            category,
            detail: format!("content is {}", resolution.mime),
        });
    }
    Ok(())
}
