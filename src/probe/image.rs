//! Image dimension sources.
//!
//! [`ImageHeaderReader`] asks the decoder for dimensions without decoding
//! pixel data. [`ImageDecodeReader`] decodes the whole image and is the
//! fallback for files whose headers the first reader rejects.

use ::image::{ImageError, ImageReader};
use std::path::Path;

use super::{MetadataSource, ProbeError};
use crate::media::Metadata;

/// Header-only dimension read with content-sniffed format detection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageHeaderReader;

impl MetadataSource for ImageHeaderReader {
    fn name(&self) -> &'static str {
        "image-header"
    }

    fn try_read(&self, path: &Path) -> Result<Metadata, ProbeError> {
        let reader = ImageReader::open(path)
            .map_err(|e| ProbeError::io(path, e))?
            .with_guessed_format()
            .map_err(|e| ProbeError::io(path, e))?;

        if reader.format().is_none() {
            return Err(ProbeError::Unsupported(path.to_path_buf()));
        }

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| from_image_error(path, e))?;
        dimensions(path, width, height)
    }
}

/// Full decode, reading dimensions from the decoded buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecodeReader;

impl MetadataSource for ImageDecodeReader {
    fn name(&self) -> &'static str {
        "image-decode"
    }

    fn try_read(&self, path: &Path) -> Result<Metadata, ProbeError> {
        let img = ::image::open(path).map_err(|e| from_image_error(path, e))?;
        dimensions(path, img.width(), img.height())
    }
}

fn dimensions(path: &Path, width: u32, height: u32) -> Result<Metadata, ProbeError> {
    if width == 0 || height == 0 {
        return Err(ProbeError::corrupt(
            path,
            format!("reported empty dimensions {width}x{height}"),
        ));
    }
    Ok(Metadata::image(width, height))
}

fn from_image_error(path: &Path, err: ImageError) -> ProbeError {
    match err {
        ImageError::Unsupported(_) => ProbeError::Unsupported(path.to_path_buf()),
        ImageError::IoError(e) => ProbeError::io(path, e),
        other => ProbeError::corrupt(path, other.to_string()),
    }
}
