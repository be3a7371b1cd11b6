//! Media kinds and the metadata values derived from them.
//!
//! [`Metadata`] is what a probe produces and what the cache persists.
//! [`DisplayMetadata`] is the flattened, structured value handed to a
//! file-manager integration; it never carries formatted strings.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extensions (lowercase, without the dot) treated as videos.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "avi", "webm", "m4v"];

/// Extensions (lowercase, without the dot) treated as images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tiff"];

/// Capability class of a file, selecting which probe chain applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video container.
    Video,
}

impl MediaKind {
    /// Classify a path by its extension (case-insensitive).
    ///
    /// Returns `None` for extensions the list columns do not handle.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Image)
        } else {
            None
        }
    }

    /// Integer tag used in the database.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Image => 0,
            Self::Video => 1,
        }
    }

    /// Inverse of [`MediaKind::as_i64`].
    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Image),
            1 => Some(Self::Video),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Pixel dimensions of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Width in pixels (positive).
    pub width: u32,
    /// Height in pixels (positive).
    pub height: u32,
}

/// Container and stream facts for a video.
///
/// `None` means the discoverer could not report the field. Zero is never
/// used as a stand-in for unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Width of the first video stream.
    pub width: Option<u32>,
    /// Height of the first video stream.
    pub height: Option<u32>,
    /// Container duration in seconds.
    pub duration_secs: Option<f64>,
    /// Frame rate rounded to the nearest whole frame.
    pub frame_rate: Option<u32>,
}

/// Metadata computed by a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Metadata {
    /// Image dimensions.
    Image(ImageMetadata),
    /// Video facts.
    Video(VideoMetadata),
}

impl Metadata {
    /// Shorthand for an image result.
    #[must_use]
    pub fn image(width: u32, height: u32) -> Self {
        Self::Image(ImageMetadata { width, height })
    }

    /// The capability class this metadata belongs to.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Image(_) => MediaKind::Image,
            Self::Video(_) => MediaKind::Video,
        }
    }
}

/// Structured per-file values for the list columns.
///
/// Every field is independently optional; an all-`None` value is the
/// "unknown" result returned whenever stat, probe or store fails.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DisplayMetadata {
    /// `(width, height)` in pixels.
    pub dimensions: Option<(u32, u32)>,
    /// Duration in seconds.
    pub duration_secs: Option<f64>,
    /// Whole frames per second.
    pub frame_rate: Option<u32>,
}

impl DisplayMetadata {
    /// The "unknown" value.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Returns true when no field is known.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.dimensions.is_none() && self.duration_secs.is_none() && self.frame_rate.is_none()
    }
}

impl From<Metadata> for DisplayMetadata {
    fn from(metadata: Metadata) -> Self {
        match metadata {
            Metadata::Image(image) => Self {
                dimensions: Some((image.width, image.height)),
                ..Self::default()
            },
            Metadata::Video(video) => Self {
                dimensions: video.width.zip(video.height),
                duration_secs: video.duration_secs,
                frame_rate: video.frame_rate,
            },
        }
    }
}
