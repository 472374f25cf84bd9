//! Content type detection from leading bytes.
//!
//! [`identify`] is a pure signature lookup. [`resolve`] reads a stored file,
//! refines container formats that share a signature (ZIP based office files,
//! OLE compound files) and falls back to the declared type, marked
//! unverified, when nothing matches.

use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use crate::formats::{self, *};

/// Enough to reach the `ustar` magic at offset 257 and an SVG root element.
const HEAD_LEN: usize = 1024;

const OLE_FAMILY: &[&str] = &[DOC, XLS, PPT];

/// Outcome of type resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub mime: String,
    /// `false` when no signature matched and the declared type was taken
    pub verified: bool,
}

/// Looks the leading bytes of a file up in the signature table.
#[must_use]
pub fn identify(head: &[u8]) -> Option<&'static str> {
    let at = |offset: usize, magic: &[u8]| head.get(offset..offset + magic.len()) == Some(magic);

    if at(0, b"%PDF-") {
        return Some(PDF);
    }
    if at(0, &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]) {
        return Some(OLE_STORAGE);
    }
    if at(0, b"PK\x03\x04") || at(0, b"PK\x05\x06") || at(0, b"PK\x07\x08") {
        return Some(ZIP);
    }
    if at(0, &[0xFF, 0xD8, 0xFF]) {
        return Some(JPEG);
    }
    if at(0, b"\x89PNG\r\n\x1a\n") {
        return Some(PNG);
    }
    if at(0, b"GIF87a") || at(0, b"GIF89a") {
        return Some(GIF);
    }
    if at(0, b"RIFF") {
        if at(8, b"WEBP") {
            return Some(WEBP);
        }
        if at(8, b"WAVE") {
            return Some(WAV);
        }
        if at(8, b"AVI ") {
            return Some(AVI);
        }
    }
    if at(0, b"BM") && at(6, &[0, 0, 0, 0]) {
        return Some(BMP);
    }
    if at(0, b"II*\0") || at(0, b"MM\0*") {
        return Some(TIFF);
    }
    if at(4, b"ftyp") {
        return Some(match head.get(8..12) {
            Some(b"qt  ") => MOV,
            Some(b"M4A " | b"M4B ") => M4A,
            Some(b"heic" | b"heix" | b"hevc" | b"mif1" | b"msf1") => HEIC,
            _ => MP4,
        });
    }
    if at(0, &[0x1A, 0x45, 0xDF, 0xA3]) {
        let window = &head[..head.len().min(64)];
        let webm = window.windows(4).any(|w| w == b"webm");
        return Some(if webm { WEBM } else { MKV });
    }
    if at(0, b"ID3") {
        return Some(MP3);
    }
    if at(0, b"fLaC") {
        return Some(FLAC);
    }
    if at(0, b"OggS") {
        return Some(OGG);
    }
    if at(0, b"Rar!\x1a\x07") {
        return Some(RAR);
    }
    if at(0, &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
        return Some(SEVEN_Z);
    }
    if at(0, &[0x1F, 0x8B]) {
        return Some(GZIP);
    }
    if at(257, b"ustar") {
        return Some(TAR);
    }
    if let [0xFF, second, ..] = head {
        // ADTS: 12 sync bits, layer 00
        if second & 0xF6 == 0xF0 {
            return Some(AAC);
        }
        // MPEG audio frame: 11 sync bits, layer not reserved
        if second & 0xE0 == 0xE0 && (second >> 1) & 0x03 != 0 {
            return Some(MP3);
        }
    }
    if looks_like_svg(head) {
        return Some(SVG);
    }
    None
}

fn looks_like_svg(head: &[u8]) -> bool {
    let text = head.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(head);
    let start = text
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(text.len());
    let text = &text[start..];
    if text.starts_with(b"<svg") {
        return true;
    }
    (text.starts_with(b"<?xml") || text.starts_with(b"<!DOCTYPE svg"))
        && text.windows(4).any(|w| w == b"<svg")
}

/// Detects the content type of a stored file.
pub async fn resolve(path: &Path, declared: &str) -> io::Result<Resolution> {
    let head = read_head(path).await?;
    let declared = formats::normalize(declared);

    let resolution = match identify(&head) {
        Some(ZIP) => Resolution {
            mime: refine_zip(path.to_path_buf()).await.to_owned(),
            verified: true,
        },
        Some(OLE_STORAGE) => Resolution {
            mime: if OLE_FAMILY.contains(&declared.as_str()) {
                declared
            } else {
                OLE_STORAGE.to_owned()
            },
            verified: true,
        },
        Some(mime) => Resolution {
            mime: mime.to_owned(),
            verified: true,
        },
        None => Resolution {
            mime: declared,
            verified: false,
        },
    };
    Ok(resolution)
}

async fn read_head(path: &Path) -> io::Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(HEAD_LEN);
    file.take(HEAD_LEN as u64).read_to_end(&mut head).await?;
    Ok(head)
}

/// Tells office documents apart from plain zip archives by their parts.
async fn refine_zip(path: PathBuf) -> &'static str {
    tokio::task::spawn_blocking(move || zip_flavour(&path))
        .await
        .unwrap_or(ZIP)
}

fn zip_flavour(path: &Path) -> &'static str {
    let Ok(file) = std::fs::File::open(path) else {
        return ZIP;
    };
    let Ok(mut archive) = zip::ZipArchive::new(file) else {
        return ZIP;
    };

    if let Ok(mut entry) = archive.by_name("mimetype") {
        let mut declared = String::new();
        if entry.by_ref().take(128).read_to_string(&mut declared).is_ok()
            && declared.trim() == ODT
        {
            return ODT;
        }
    }

    let has_content_types = archive.file_names().any(|n| n == "[Content_Types].xml");
    if !has_content_types {
        return ZIP;
    }
    let prefix = |p: &str| archive.file_names().any(|n| n.starts_with(p));
    if prefix("word/") {
        DOCX
    } else if prefix("xl/") {
        XLSX
    } else if prefix("ppt/") {
        PPTX
    } else {
        ZIP
    }
}
