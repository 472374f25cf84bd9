//! The browser front page and its per-converter aliases.

pub const INDEX: &str = include_str!("../static/index.html");

/// Converter landing pages; each serves the same shell.
pub const SLUGS: &[&str] = &[
    "pdf-to-word",
    "word-to-pdf",
    "pdf-to-excel",
    "excel-to-pdf",
    "pdf-to-ppt",
    "ppt-to-pdf",
    "jpg-to-png",
    "png-to-jpg",
    "webp-to-jpg",
    "svg-to-png",
    "heic-to-jpg",
    "bmp-to-jpg",
    "mp4-to-mov",
    "mov-to-mp4",
    "avi-to-mp4",
    "mkv-to-mp4",
    "webm-to-mp4",
    "gif-to-mp4",
    "mp3-to-wav",
    "wav-to-mp3",
    "flac-to-mp3",
    "ogg-to-mp3",
    "aac-to-mp3",
    "m4a-to-mp3",
    "zip-to-rar",
    "rar-to-zip",
    "tar-to-zip",
    "7z-to-zip",
    "gzip-to-zip",
];

#[must_use]
pub fn is_known(slug: &str) -> bool {
    SLUGS.contains(&slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("png-to-jpg", true)]
    #[case("gzip-to-zip", true)]
    #[case("PNG-TO-JPG", false)]
    #[case("exe-to-zip", false)]
    #[case("", false)]
    #[trace]
    fn known_slugs(#[case] slug: &str, #[case] expected: bool) {
        // Act
        let known = is_known(slug);

        // Assert
        assert_eq!(known, expected);
    }

    #[test]
    fn index_posts_to_convert() {
        // Assert
        assert!(INDEX.contains("/convert"));
        assert!(INDEX.contains("conversionType"));
    }
}
