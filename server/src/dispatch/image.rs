use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use ::image::{DynamicImage, ImageFormat, ImageReader};
use async_trait::async_trait;
use kernel::Category;

use super::{ensure_output, output_path, ConvertRequest, Strategy};
use crate::error::ConvertError;
use crate::formats;
use crate::storage::Scratch;

const TARGETS: &[(&str, ImageFormat)] = &[
    ("jpeg", ImageFormat::Jpeg),
    ("png", ImageFormat::Png),
    ("webp", ImageFormat::WebP),
];

/// Pixel re-encoding through the `image` codecs on a blocking worker.
pub struct ImageStrategy;

fn source_format(mime: &str) -> Option<ImageFormat> {
    match mime {
        formats::JPEG => Some(ImageFormat::Jpeg),
        formats::PNG => Some(ImageFormat::Png),
        formats::GIF => Some(ImageFormat::Gif),
        formats::WEBP => Some(ImageFormat::WebP),
        formats::BMP => Some(ImageFormat::Bmp),
        formats::TIFF => Some(ImageFormat::Tiff),
        _ => None,
    }
}

fn cancelled(scratch: &Scratch) -> Result<(), ::image::ImageError> {
    if scratch.is_cancelled() {
        let e = io::Error::new(io::ErrorKind::Interrupted, "cancelled");
        return Err(::image::ImageError::IoError(e));
    }
    Ok(())
}

fn transcode(
    input: &Path,
    source: ImageFormat,
    target: ImageFormat,
    output: &Path,
    scratch: &Scratch,
) -> Result<(), ::image::ImageError> {
    cancelled(scratch)?;
    let mut reader = ImageReader::new(BufReader::new(std::fs::File::open(input)?));
    reader.set_format(source);
    let img = reader.decode()?;
    tracing::debug!("decoded {}x{} {:?}", img.width(), img.height(), img.color());
    cancelled(scratch)?;

    // the jpeg encoder has no alpha channel and the webp one wants 8 bit
    let img = match target {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        ImageFormat::WebP => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => img,
    };
    img.save_with_format(output, target)
}

#[async_trait]
impl Strategy for ImageStrategy {
    fn name(&self) -> &'static str {
        "image"
    }

    fn category(&self) -> Category {
        Category::Image
    }

    fn targets(&self) -> Vec<&'static str> {
        TARGETS.iter().map(|(t, _)| *t).collect()
    }

    async fn convert(&self, request: &ConvertRequest<'_>) -> Result<PathBuf, ConvertError> {
        let Some((_, target)) = TARGETS.iter().find(|(t, _)| *t == request.target) else {
            return Err(ConvertError::UnsupportedFormat {
                category: Category::Image,
                target: request.target.to_owned(),
            });
        };
        let Some(source) = source_format(request.detected_type) else {
            return Err(ConvertError::unsupported(
                Category::Image,
                format!("cannot decode {}", request.detected_type),
            ));
        };

        let target = *target;
        let input = request.input.to_path_buf();
        let output = output_path(request.scratch.path(), request.target);
        let destination = output.clone();
        let scratch = request.scratch.clone();
        tokio::task::spawn_blocking(move || transcode(&input, source, target, &destination, &scratch))
            .await
            .map_err(|e| ConvertError::failed(Category::Image, e))?
            .map_err(|e| ConvertError::failed(Category::Image, e))?;

        ensure_output(Category::Image, &output).await?;
        Ok(output)
    }
}
