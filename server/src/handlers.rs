#![allow(clippy::unused_async)]
use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use kernel::{Capability, Category, ConvertReply, ErrorReply};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use crate::domain::UploadedFile;
use crate::error::ConvertError;
use crate::file_reply::ArtifactReply;
use crate::{intake, job, pages, publish, Gateway};

/// Room for multipart boundaries and the text fields around the file.
pub const MULTIPART_OVERHEAD: u64 = 64 * 1024;

const FILE_FIELD: &str = "file";
const TARGET_FIELD: &str = "targetFormat";
const CATEGORY_FIELD: &str = "conversionType";

/// Multipart body of a conversion request.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)]
pub struct ConvertForm {
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    file: String,
    /// Target format, e.g. png, mp3, zip
    target_format: String,
    conversion_type: Category,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DownloadQuery {
    /// Retrieval token from the download URL
    file: Option<String>,
    /// Display name for the saved file
    name: Option<String>,
}

/// Uploads a file and converts it.
#[utoipa::path(
    post,
    path = "/convert",
    request_body(content = ConvertForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "File converted", body = ConvertReply),
        (status = 400, description = "No file or malformed request", body = ErrorReply),
        (status = 413, description = "File too large", body = ErrorReply),
        (status = 415, description = "File type not allowed", body = ErrorReply),
        (status = 422, description = "Conversion not possible", body = ErrorReply),
        (status = 500, description = "Conversion or storage failure", body = ErrorReply)
    ),
    tag = "convert",
)]
pub async fn convert(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ConvertReply>, ConvertError> {
    let limit = gateway.config.max_upload_bytes;
    if let Some(length) = content_length(&headers) {
        if length > limit + MULTIPART_OVERHEAD {
            return Err(ConvertError::PayloadTooLarge { limit });
        }
    }

    let mut multipart = multipart?;
    let mut upload: Option<UploadedFile> = None;
    let mut target: Option<String> = None;
    let mut category: Option<String> = None;
    let broken = |e: MultipartError| ConvertError::from_multipart(&e, limit);

    while let Some(field) = multipart.next_field().await.map_err(broken)? {
        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            FILE_FIELD => {
                // browsers send an empty unnamed part when nothing was picked
                if field.file_name() == Some("") {
                    continue;
                }
                if upload.is_some() {
                    return Err(ConvertError::InvalidRequest(
                        "only one file per request".to_owned(),
                    ));
                }
                let original_name = field.file_name().map(str::to_owned);
                let declared_type = field.content_type().map(str::to_owned);
                upload = Some(
                    intake::accept(
                        &gateway.layout,
                        limit,
                        original_name.as_deref(),
                        declared_type.as_deref(),
                        field.map(|chunk| chunk.map_err(broken)),
                    )
                    .await?,
                );
            }
            TARGET_FIELD => target = Some(field.text().await.map_err(broken)?),
            CATEGORY_FIELD => category = Some(field.text().await.map_err(broken)?),
            other => tracing::debug!("ignored form field {other}"),
        }
    }

    let upload = upload.ok_or(ConvertError::NoFileProvided)?;
    let target = target
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ConvertError::InvalidRequest(format!("missing {TARGET_FIELD}")))?;
    let category = category
        .ok_or_else(|| ConvertError::InvalidRequest(format!("missing {CATEGORY_FIELD}")))?
        .parse::<Category>()
        .map_err(ConvertError::InvalidRequest)?;

    let artifact = job::execute(
        &gateway.layout,
        &gateway.dispatcher,
        upload,
        category,
        &target,
    )
    .await?;

    Ok(Json(ConvertReply {
        success: true,
        download_url: artifact.download_url(),
    }))
}

/// Downloads a converted file. Every token works exactly once.
#[utoipa::path(
    get,
    path = "/download",
    params(DownloadQuery),
    responses(
        (status = 200, response = ArtifactReply),
        (status = 404, description = "Unknown, expired or already downloaded", body = ErrorReply)
    ),
    tag = "convert",
)]
pub async fn download(
    State(gateway): State<Arc<Gateway>>,
    Query(query): Query<DownloadQuery>,
) -> Result<ArtifactReply, ConvertError> {
    let token = query.file.ok_or(ConvertError::NotFound)?;
    let claimed = publish::claim(&gateway.layout, &token).await?;
    Ok(ArtifactReply::new(claimed, query.name.as_deref()))
}

/// Lists target formats per category.
#[utoipa::path(
    get,
    path = "/capabilities",
    responses(
        (status = 200, description = "Capability table", body = [Capability]),
    ),
    tag = "convert",
)]
pub async fn capabilities(State(gateway): State<Arc<Gateway>>) -> Json<Vec<Capability>> {
    Json(gateway.dispatcher.capabilities())
}

pub async fn index() -> Html<&'static str> {
    Html(pages::INDEX)
}

pub async fn page(Path(slug): Path<String>) -> Response {
    if pages::is_known(&slug) {
        Html(pages::INDEX).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case(Some("1024"), Some(1024))]
    #[case(Some("abc"), None)]
    #[case(None, None)]
    #[trace]
    fn content_length_cases(#[case] value: Option<&'static str>, #[case] expected: Option<u64>) {
        // Arrange
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static(v));
        }

        // Act
        let actual = content_length(&headers);

        // Assert
        assert_eq!(actual, expected);
    }
}
