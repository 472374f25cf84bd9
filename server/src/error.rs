use std::io;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kernel::{Category, ErrorKind, ErrorReply};

/// Everything a conversion or download can fail with.
///
/// Messages are shown to clients: they must never carry server paths.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("No file uploaded")]
    NoFileProvided,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("File exceeds the {limit} bytes upload limit")]
    PayloadTooLarge { limit: u64 },

    #[error("File type '{0}' is not allowed")]
    UnsupportedType(String),

    #[error("Type mismatch for {category} conversion: {detail}")]
    TypeMismatch { category: Category, detail: String },

    #[error("Unsupported {category} conversion: {detail}")]
    UnsupportedConversion { category: Category, detail: String },

    #[error("Unsupported {category} format '{target}'")]
    UnsupportedFormat { category: Category, target: String },

    #[error("{category} conversion failed: {detail}")]
    ConversionFailed { category: Category, detail: String },

    #[error("File not found")]
    NotFound,

    #[error("Storage error: {}", .0.kind())]
    Io(#[from] io::Error),
}

impl ConvertError {
    pub fn unsupported(category: Category, detail: impl Into<String>) -> Self {
        Self::UnsupportedConversion {
            category,
            detail: detail.into(),
        }
    }

    pub fn failed(category: Category, detail: impl ToString) -> Self {
        Self::ConversionFailed {
            category,
            detail: detail.to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::NoFileProvided => ErrorKind::NoFileProvided,
            ConvertError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ConvertError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ConvertError::UnsupportedType(_) => ErrorKind::UnsupportedType,
            ConvertError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            ConvertError::UnsupportedConversion { .. } => ErrorKind::UnsupportedConversion,
            ConvertError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ConvertError::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            ConvertError::NotFound => ErrorKind::NotFound,
            ConvertError::Io(_) => ErrorKind::InternalIOError,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NoFileProvided | ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::UnsupportedType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorKind::TypeMismatch
            | ErrorKind::UnsupportedConversion
            | ErrorKind::UnsupportedFormat => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ConversionFailed | ErrorKind::InternalIOError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl ConvertError {
    /// Maps a broken multipart stream; `limit` is the upload ceiling in
    /// force for the request.
    #[must_use]
    pub fn from_multipart(e: &MultipartError, limit: u64) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ConvertError::PayloadTooLarge { limit }
        } else {
            ConvertError::InvalidRequest(e.body_text())
        }
    }
}

impl From<MultipartRejection> for ConvertError {
    fn from(_: MultipartRejection) -> Self {
        ConvertError::NoFileProvided
    }
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::info!("request rejected: {self}");
        }
        let reply = ErrorReply {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(reply)).into_response()
    }
}
