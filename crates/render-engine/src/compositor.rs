//! Frame compositor: rasterizes one frame of a composition.
//!
//! Rendering is a pure function of the project snapshot, the layout and the
//! per-cell frames handed in. Drawing order within a frame is fixed:
//!
//! 1. canvas background, then the optional inner background
//! 2. cell fills in row-major order (tint, media or placeholder)
//! 3. metadata overlays and cell borders
//! 4. the outer composition border

use std::collections::BTreeMap;
use std::sync::Arc;

use image::RgbaImage;
use tilecast_project_model::project::{
    AssetKind, AssetMetadata, CellBinding, CompositionStyle, FitMode, Project,
};

use crate::color::Color;
use crate::font::FontFace;
use crate::layout::{Layout, Rect};
use crate::surface::{GradientDirection, Surface};

/// Tint laid under every cell before its content.
const CELL_TINT: Color = Color::rgba(255, 255, 255, 0.04);

/// Extra tint for cells with no track.
const EMPTY_CELL_TINT: Color = Color::rgba(255, 255, 255, 0.03);

const AUDIO_PLACEHOLDER: (Color, Color) = (
    Color::rgba(0x3b, 0x1d, 0x6e, 1.0),
    Color::rgba(0xb4, 0x3f, 0x8c, 1.0),
);
const VIDEO_PLACEHOLDER: (Color, Color) = (
    Color::rgba(0x0f, 0x2a, 0x4a, 1.0),
    Color::rgba(0x1f, 0x7a, 0x8c, 1.0),
);

const OVERLAY_TOOL: Color = Color::rgba(0x7d, 0xd3, 0xfc, 1.0);
const OVERLAY_FORMAT: Color = Color::rgba(0xc4, 0xb5, 0xfd, 1.0);
const OVERLAY_PROMPT: Color = Color::rgba(0xf8, 0xfa, 0xfc, 1.0);
const OVERLAY_TAGS: Color = Color::rgba(0xfc, 0xd3, 0x4d, 1.0);
const OVERLAY_MAX_LINES: usize = 4;
const OVERLAY_MAX_PROMPT_CHARS: usize = 140;

/// What the frame is rendered for. Metadata overlays are drawn for stills only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget {
    Still,
    Video,
}

/// The pixels to draw for one cell in the current frame.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub bitmap: Arc<RgbaImage>,
    /// Intrinsic media size used for fit computations. May differ from the
    /// bitmap size when frames are decoded at reduced resolution.
    pub intrinsic: (u32, u32),
}

impl MediaFrame {
    pub fn new(bitmap: Arc<RgbaImage>, intrinsic: (u32, u32)) -> Self {
        Self { bitmap, intrinsic }
    }
}

/// Frames keyed by cell index.
pub type CellFrames = BTreeMap<usize, MediaFrame>;

/// Where media lands inside a cell for a fit mode, track scale and pan.
///
/// Returns `None` when the media has no size.
pub fn placement(
    fit: FitMode,
    media_size: (f64, f64),
    cell: Rect,
    scale: f64,
    pan: (f64, f64),
) -> Option<Rect> {
    let (mw, mh) = media_size;
    if mw <= 0.0 || mh <= 0.0 || cell.width <= 0.0 || cell.height <= 0.0 {
        return None;
    }
    let sx = cell.width / mw;
    let sy = cell.height / mh;
    let fit_scale = match fit {
        FitMode::Cover => sx.max(sy),
        FitMode::Contain => sx.min(sy),
    };
    let track_scale = if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        1.0
    };
    let factor = fit_scale * track_scale;
    let (width, height) = (mw * factor, mh * factor);
    let (cx, cy) = cell.center();
    Some(Rect::new(
        cx - width / 2.0 + pan.0,
        cy - height / 2.0 + pan.1,
        width,
        height,
    ))
}

/// Draws frames of a composition.
#[derive(Debug, Clone)]
pub struct Compositor {
    font: Option<FontFace>,
    target: RenderTarget,
}

impl Compositor {
    pub fn new(target: RenderTarget) -> Self {
        Self { font: None, target }
    }

    /// Attach a font for labels and overlays. Without one, text is skipped.
    pub fn with_font(mut self, font: Option<FontFace>) -> Self {
        self.font = font;
        self
    }

    pub fn target(&self) -> RenderTarget {
        self.target
    }

    /// Render one frame into `surface`.
    pub fn render_frame(
        &self,
        surface: &mut Surface,
        project: &Project,
        layout: &Layout,
        frames: &CellFrames,
    ) {
        let composition = &project.composition;
        let style = &composition.style;

        surface.clear(Color::opaque(&style.background_color));

        let inner = layout.inner_rect();
        if let Some(background) = composition
            .background_color
            .as_deref()
            .filter(|c| !c.trim().is_empty())
        {
            surface.fill_rounded_rect(inner, style.corner_radius, Color::opaque(background));
        }

        let cells: Vec<(usize, Rect)> = (0..layout.cell_count())
            .filter_map(|index| layout.cell_rect(index).map(|rect| (index, rect)))
            .collect();

        for &(index, rect) in &cells {
            surface.push_clip(rect, style.corner_radius);
            surface.fill_rect(rect, CELL_TINT);

            match project.binding(index) {
                Some(binding) => self.draw_cell_content(surface, &binding, rect, frames.get(&index)),
                None => surface.fill_rect(rect, EMPTY_CELL_TINT),
            }

            surface.pop_clip();
        }

        for &(index, rect) in &cells {
            if self.target == RenderTarget::Still {
                if let Some(metadata) = project
                    .binding(index)
                    .and_then(|binding| binding.asset.metadata.as_ref())
                    .filter(|metadata| metadata.has_content())
                {
                    surface.push_clip(rect, style.corner_radius);
                    self.draw_metadata_overlay(surface, metadata, rect);
                    surface.pop_clip();
                }
            }
            stroke_border(surface, style, rect);
        }

        stroke_border(surface, style, inner);
    }

    fn draw_cell_content(
        &self,
        surface: &mut Surface,
        binding: &CellBinding<'_>,
        rect: Rect,
        frame: Option<&MediaFrame>,
    ) {
        let kind = binding.asset.kind;
        let frame = frame.filter(|_| kind.is_visual());
        let Some(frame) = frame else {
            self.draw_placeholder(surface, kind, rect);
            return;
        };

        let track = binding.track;
        let media_size = (frame.intrinsic.0 as f64, frame.intrinsic.1 as f64);
        let Some(dest) = placement(
            track.fit,
            media_size,
            rect,
            track.scale,
            (track.pan_x, track.pan_y),
        ) else {
            self.draw_placeholder(surface, kind, rect);
            return;
        };

        match track.fit {
            FitMode::Cover => surface.draw_image(&frame.bitmap, dest),
            FitMode::Contain => {
                surface.push_clip(rect, 0.0);
                surface.draw_image(&frame.bitmap, dest);
                surface.pop_clip();
            }
        }
    }

    fn draw_placeholder(&self, surface: &mut Surface, kind: AssetKind, rect: Rect) {
        let (start, end) = match kind {
            AssetKind::Audio => AUDIO_PLACEHOLDER,
            _ => VIDEO_PLACEHOLDER,
        };
        surface.fill_gradient(rect, 0.0, start, end, GradientDirection::Diagonal);

        let Some(font) = &self.font else {
            return;
        };
        let label = kind.as_str().to_uppercase();
        let px = (rect.height.min(rect.width) * 0.08).clamp(10.0, 36.0) as f32;
        let width = font.measure(&label, px) as f64;
        let (cx, cy) = rect.center();
        surface.draw_text(
            font,
            &label,
            cx - width / 2.0,
            cy - px as f64 / 2.0,
            px,
            Color::WHITE.with_alpha(0.85),
        );
    }

    fn draw_metadata_overlay(&self, surface: &mut Surface, metadata: &AssetMetadata, rect: Rect) {
        let px = (rect.height * 0.045).clamp(10.0, 28.0);
        let lines = overlay_lines(metadata);
        if lines.is_empty() {
            return;
        }
        let line_height = px * 1.35;
        let pad = px * 0.75;
        let height = (lines.len() as f64 * line_height + pad * 2.0).min(rect.height);
        let strip = Rect::new(rect.x, rect.bottom() - height, rect.width, height);
        surface.fill_gradient(
            strip,
            0.0,
            Color::BLACK.with_alpha(0.15),
            Color::BLACK.with_alpha(0.78),
            GradientDirection::Vertical,
        );

        let Some(font) = &self.font else {
            return;
        };
        let max_width = (rect.width - pad * 2.0).max(0.0) as f32;
        let mut y = strip.y + pad;
        for (text, color) in lines {
            let text = font.truncate_to_width(&text, px as f32, max_width);
            surface.draw_text(font, &text, rect.x + pad, y, px as f32, color);
            y += line_height;
        }
    }
}

/// Overlay text lines in display order: tool, prompt format, prompt, tags.
fn overlay_lines(metadata: &AssetMetadata) -> Vec<(String, Color)> {
    let mut lines = Vec::with_capacity(OVERLAY_MAX_LINES);
    let tools: Vec<&str> = metadata
        .ai_tools
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if !tools.is_empty() {
        lines.push((tools.join(" · "), OVERLAY_TOOL));
    }
    if let Some(format) = non_empty(metadata.prompt_format.as_deref()) {
        lines.push((format.to_uppercase(), OVERLAY_FORMAT));
    }
    if let Some(prompt) = non_empty(metadata.prompt.as_deref()) {
        lines.push((truncate_chars(prompt, OVERLAY_MAX_PROMPT_CHARS), OVERLAY_PROMPT));
    }
    let tags: Vec<String> = metadata
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| format!("#{}", t.trim_start_matches('#')))
        .collect();
    if !tags.is_empty() {
        lines.push((tags.join(" "), OVERLAY_TAGS));
    }
    lines.truncate(OVERLAY_MAX_LINES);
    lines
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

fn stroke_border(surface: &mut Surface, style: &CompositionStyle, rect: Rect) {
    if style.border_width <= 0.0 {
        return;
    }
    let color = Color::from_hex(&style.border_color, style.border_opacity);
    surface.stroke_rounded_rect(rect, style.corner_radius, style.border_width, color);
}
