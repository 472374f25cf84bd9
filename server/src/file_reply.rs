use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use utoipa::{
    openapi::{self, content, ObjectBuilder, RefOr, ResponseBuilder, Type},
    ToResponse,
};

use crate::intake::sanitize_name;
use crate::publish::Claimed;

const OCTET_STREAM: &str = "application/octet-stream";

/// Streams a claimed artifact as an attachment.
pub struct ArtifactReply {
    claimed: Claimed,
    file_name: String,
}

impl ArtifactReply {
    /// `requested_name` comes from the query string and is only displayed.
    #[must_use]
    pub fn new(claimed: Claimed, requested_name: Option<&str>) -> Self {
        Self {
            claimed,
            file_name: sanitize_name(requested_name.unwrap_or_default()),
        }
    }

    fn content_type(&self) -> String {
        mime_guess::from_path(&self.file_name)
            .first_or_octet_stream()
            .to_string()
    }

    fn disposition(&self) -> String {
        let ascii: String = self
            .file_name
            .chars()
            .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
            .collect();
        format!(
            r#"attachment; filename="{ascii}"; filename*=UTF-8''{}"#,
            urlencoding::encode(&self.file_name)
        )
    }
}

impl IntoResponse for ArtifactReply {
    fn into_response(self) -> Response {
        let content_type = self.content_type();
        let disposition = self.disposition();
        let size = self.claimed.size;
        let mut res = Body::from_stream(self.claimed.stream).into_response();
        let headers = res.headers_mut();
        if let Ok(val) = HeaderValue::from_str(&content_type) {
            headers.insert(header::CONTENT_TYPE, val);
        }
        if let Ok(val) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, val);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));

        res
    }
}

impl ToResponse<'static> for ArtifactReply {
    fn response() -> (&'static str, RefOr<openapi::Response>) {
        let object = ObjectBuilder::new()
            .schema_type(Type::String)
            .format(Some(openapi::SchemaFormat::KnownFormat(
                openapi::KnownFormat::Binary,
            )))
            .build();
        let content = content::Content::new(Some(RefOr::T(openapi::Schema::Object(object))));
        (
            "ArtifactReply",
            ResponseBuilder::new()
                .description("Converted file, retrievable once")
                .content(OCTET_STREAM, content)
                .build()
                .into(),
        )
    }
}
