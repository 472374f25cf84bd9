#![warn(clippy::unwrap_in_result)]
#![warn(clippy::unwrap_used)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Groups conversions that share one external tool family.
///
/// The category is chosen by the client but it never decides on its own which
/// tool runs: the detected content type must be admitted by the category first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Document,
    Image,
    Video,
    Audio,
    Archive,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Document,
        Category::Image,
        Category::Video,
        Category::Audio,
        Category::Archive,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Document => "document",
            Category::Image => "image",
            Category::Video => "video",
            Category::Audio => "audio",
            Category::Archive => "archive",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown conversion type '{s}'"))
    }
}

/// Machine-checkable failure kind carried by every error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum ErrorKind {
    NoFileProvided,
    InvalidRequest,
    PayloadTooLarge,
    UnsupportedType,
    TypeMismatch,
    UnsupportedConversion,
    UnsupportedFormat,
    ConversionFailed,
    NotFound,
    InternalIOError,
}

/// Successful conversion reply.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConvertReply {
    /// Always `true`; failures are reported with [`ErrorReply`]
    pub success: bool,
    /// Relative single-use URL of the converted artifact
    pub download_url: String,
}

/// Failure reply of any endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorReply {
    /// Human readable message, free of server filesystem paths
    pub error: String,
    pub kind: ErrorKind,
}

/// One row of the capability table.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Capability {
    pub category: Category,
    /// Target formats accepted for the category
    pub targets: Vec<String>,
}
