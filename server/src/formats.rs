//! Declared-type allow-list and category admission.
//!
//! The allow-list is the union of the per-category MIME sets below. Dispatch
//! never looks at the declared type, only at the detected one, but both must
//! pass through [`normalize`] so aliases compare equal.

use kernel::Category;

pub const PDF: &str = "application/pdf";
pub const DOC: &str = "application/msword";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const ODT: &str = "application/vnd.oasis.opendocument.text";
pub const XLS: &str = "application/vnd.ms-excel";
pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const PPT: &str = "application/vnd.ms-powerpoint";
pub const PPTX: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
/// OLE compound file whose flavour could not be pinned down.
pub const OLE_STORAGE: &str = "application/x-ole-storage";

pub const JPEG: &str = "image/jpeg";
pub const PNG: &str = "image/png";
pub const GIF: &str = "image/gif";
pub const WEBP: &str = "image/webp";
pub const BMP: &str = "image/bmp";
pub const TIFF: &str = "image/tiff";
pub const SVG: &str = "image/svg+xml";
pub const HEIC: &str = "image/heic";

pub const MP4: &str = "video/mp4";
pub const MOV: &str = "video/quicktime";
pub const AVI: &str = "video/x-msvideo";
pub const MKV: &str = "video/x-matroska";
pub const WEBM: &str = "video/webm";

pub const MP3: &str = "audio/mpeg";
pub const WAV: &str = "audio/wav";
pub const FLAC: &str = "audio/flac";
pub const OGG: &str = "audio/ogg";
pub const AAC: &str = "audio/aac";
pub const M4A: &str = "audio/mp4";

pub const ZIP: &str = "application/zip";
pub const RAR: &str = "application/x-rar-compressed";
pub const TAR: &str = "application/x-tar";
pub const SEVEN_Z: &str = "application/x-7z-compressed";
pub const GZIP: &str = "application/gzip";

const DOCUMENT_TYPES: &[&str] = &[PDF, DOC, DOCX, ODT, XLS, XLSX, PPT, PPTX];
const IMAGE_TYPES: &[&str] = &[JPEG, PNG, GIF, WEBP, BMP, TIFF, SVG, HEIC];
const VIDEO_TYPES: &[&str] = &[MP4, MOV, AVI, MKV, WEBM, GIF];
const AUDIO_TYPES: &[&str] = &[MP3, WAV, FLAC, OGG, AAC, M4A];
const ARCHIVE_TYPES: &[&str] = &[ZIP, RAR, TAR, SEVEN_Z, GZIP];

const ALIASES: &[(&str, &str)] = &[
    ("image/jpg", JPEG),
    ("image/pjpeg", JPEG),
    ("image/x-ms-bmp", BMP),
    ("audio/x-wav", WAV),
    ("audio/wave", WAV),
    ("audio/vnd.wave", WAV),
    ("audio/mp3", MP3),
    ("audio/x-flac", FLAC),
    ("audio/x-m4a", M4A),
    ("application/x-zip-compressed", ZIP),
    ("application/x-gzip", GZIP),
    ("application/x-rar", RAR),
    ("application/vnd.rar", RAR),
];

/// Lowercases, drops parameters and maps known aliases to the canonical type.
#[must_use]
pub fn normalize(mime: &str) -> String {
    let essence = mime
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == essence)
        .map_or(essence, |(_, canonical)| (*canonical).to_owned())
}

/// MIME types a category is willing to convert from.
#[must_use]
pub fn admitted(category: Category) -> &'static [&'static str] {
    match category {
        Category::Document => DOCUMENT_TYPES,
        Category::Image => IMAGE_TYPES,
        Category::Video => VIDEO_TYPES,
        Category::Audio => AUDIO_TYPES,
        Category::Archive => ARCHIVE_TYPES,
    }
}

#[must_use]
pub fn admits(category: Category, mime: &str) -> bool {
    admitted(category).contains(&mime)
}

/// Whether a declared type passes upload intake.
#[must_use]
pub fn is_allowed(mime: &str) -> bool {
    let mime = normalize(mime);
    Category::ALL.into_iter().any(|c| admits(c, &mime))
}

/// Whether content that no signature recognised may still be converted.
///
/// Only categories backed by a transcoder that probes its own input accept
/// unverified content.
#[must_use]
pub fn accepts_unverified(category: Category) -> bool {
    matches!(category, Category::Video | Category::Audio)
}
