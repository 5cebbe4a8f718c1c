//! Font loading for labels and metadata overlays.

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use tilecast_common::error::{TilecastError, TilecastResult};

/// Well-known locations probed when no font is configured.
const SYSTEM_FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// A parsed font face.
#[derive(Clone)]
pub struct FontFace {
    font: FontArc,
    path: PathBuf,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FontFace").field("path", &self.path).finish()
    }
}

impl FontFace {
    /// Parse a TrueType/OpenType file.
    pub fn load(path: impl AsRef<Path>) -> TilecastResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            TilecastError::environment(format!("Failed to read font {}: {e}", path.display()))
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| {
            TilecastError::environment(format!("Invalid font {}: {e}", path.display()))
        })?;
        Ok(Self {
            font,
            path: path.to_path_buf(),
        })
    }

    /// The configured font if it loads, otherwise the first system font found.
    pub fn discover(configured: Option<&Path>) -> Option<Self> {
        if let Some(path) = configured {
            match Self::load(path) {
                Ok(face) => return Some(face),
                Err(e) => tracing::warn!(error = %e, "Configured font unavailable"),
            }
        }
        let found = SYSTEM_FONT_CANDIDATES
            .iter()
            .map(Path::new)
            .filter(|path| path.exists())
            .find_map(|path| Self::load(path).ok());
        if found.is_none() {
            tracing::debug!("No font available; labels and overlays will be drawn without text");
        }
        found
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn font(&self) -> &FontArc {
        &self.font
    }

    /// Advance width of `text` at `px` pixels.
    pub fn measure(&self, text: &str, px: f32) -> f32 {
        let scaled = self.font.as_scaled(PxScale::from(px));
        let mut width = 0.0;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }
        width
    }

    /// Ascent at `px` pixels.
    pub fn ascent(&self, px: f32) -> f32 {
        self.font.as_scaled(PxScale::from(px)).ascent()
    }

    /// Longest prefix of `text` that fits in `max_width`, with an ellipsis
    /// when truncated.
    pub fn truncate_to_width(&self, text: &str, px: f32, max_width: f32) -> String {
        if self.measure(text, px) <= max_width {
            return text.to_string();
        }
        let mut out = String::new();
        for c in text.chars() {
            out.push(c);
            if self.measure(&format!("{out}…"), px) > max_width {
                out.pop();
                break;
            }
        }
        format!("{}…", out.trim_end())
    }
}
