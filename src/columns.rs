//! List-view column definitions and cell formatting.
//!
//! A file-manager integration registers [`COLUMNS`] once and fills each
//! row from [`ColumnValues`]. Unknown values render as empty cells.

use serde::Serialize;

use crate::media::DisplayMetadata;

/// One list-view column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    /// Attribute key the integration stores the cell under.
    pub attribute: &'static str,
    /// Column header.
    pub label: &'static str,
    /// Tooltip / column chooser description.
    pub description: &'static str,
}

/// The media columns, in display order.
pub const COLUMNS: [ColumnSpec; 3] = [
    ColumnSpec {
        attribute: "media_dimensions",
        label: "Dimensions",
        description: "Image/video dimensions",
    },
    ColumnSpec {
        attribute: "media_duration",
        label: "Duration",
        description: "Video duration",
    },
    ColumnSpec {
        attribute: "media_fps",
        label: "FPS",
        description: "Video framerate",
    },
];

/// Formatted cells for one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnValues {
    /// `"{width}x{height}"`
    pub dimensions: String,
    /// `"m:ss"` or `"h:mm:ss"`
    pub duration: String,
    /// Whole frames per second
    pub fps: String,
}

impl ColumnValues {
    /// Cell text for a column attribute; `None` for attributes not in [`COLUMNS`].
    #[must_use]
    pub fn get(&self, attribute: &str) -> Option<&str> {
        match attribute {
            "media_dimensions" => Some(&self.dimensions),
            "media_duration" => Some(&self.duration),
            "media_fps" => Some(&self.fps),
            _ => None,
        }
    }

    /// `(attribute, text)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        COLUMNS
            .iter()
            .map(move |column| (column.attribute, self.get(column.attribute).unwrap_or("")))
    }
}

impl From<DisplayMetadata> for ColumnValues {
    fn from(display: DisplayMetadata) -> Self {
        Self {
            dimensions: display
                .dimensions
                .map(|(w, h)| format_dimensions(w, h))
                .unwrap_or_default(),
            duration: display.duration_secs.map(format_duration).unwrap_or_default(),
            fps: display.frame_rate.map(|fps| fps.to_string()).unwrap_or_default(),
        }
    }
}

/// `"{width}x{height}"`.
#[must_use]
pub fn format_dimensions(width: u32, height: u32) -> String {
    format!("{width}x{height}")
}

/// Round to whole seconds and render `h:mm:ss`, or `m:ss` under an hour.
///
/// Non-positive and non-finite durations render empty.
#[must_use]
pub fn format_duration(secs: f64) -> String {
    if !secs.is_finite() || secs <= 0.0 {
        return String::new();
    }
    let total = secs.round() as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
