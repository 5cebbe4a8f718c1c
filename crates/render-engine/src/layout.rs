//! Canvas and cell geometry for grid compositions.
//!
//! All functions here are pure. The uniform layout divides the padded inner
//! area evenly; the widened layout lets individual columns and rows grow to
//! the footprint of their content and recomputes the canvas from the union.

use tilecast_common::error::{TilecastError, TilecastResult};
use tilecast_project_model::project::{Composition, Grid};

/// Upper bound on how far a column or row may grow past the uniform size.
const MAX_WIDEN_FACTOR: f64 = 2.0;

/// Parsed `"W:H"` aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AspectRatio {
    pub width: f64,
    pub height: f64,
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1.0,
        height: 1.0,
    };

    /// Parse `"W:H"`. Anything malformed, non-positive, or with a zero
    /// height yields a 1:1 square.
    pub fn parse(value: &str) -> Self {
        let Some((w, h)) = value.trim().split_once(':') else {
            return Self::SQUARE;
        };
        match (w.trim().parse::<f64>(), h.trim().parse::<f64>()) {
            (Ok(w), Ok(h)) if w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0 => Self {
                width: w,
                height: h,
            },
            _ => Self::SQUARE,
        }
    }

    pub fn value(&self) -> f64 {
        self.width / self.height
    }
}

/// Axis-aligned rectangle in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Corner radius clamped so it never exceeds half the shorter side.
    pub fn clamp_radius(&self, radius: f64) -> f64 {
        radius
            .max(0.0)
            .min(self.width.min(self.height).max(0.0) / 2.0)
    }
}

/// Resolved pixel geometry of a composition.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub padding: f64,
    pub gap: f64,
    pub inner_width: f64,
    pub inner_height: f64,
    /// Uniform cell size before any widening.
    pub cell_width: f64,
    pub cell_height: f64,
    /// Per-column widths; all equal to `cell_width` for uniform layouts.
    pub column_widths: Vec<f64>,
    /// Per-row heights; all equal to `cell_height` for uniform layouts.
    pub row_heights: Vec<f64>,
}

/// Layout of `composition` with its own aspect ratio.
pub fn calculate_layout(composition: &Composition, max_dimension: u32) -> TilecastResult<Layout> {
    calculate_layout_with_aspect(
        composition,
        AspectRatio::parse(&composition.aspect_ratio),
        max_dimension,
    )
}

/// Layout of `composition` using `aspect` in place of the project's.
pub fn calculate_layout_with_aspect(
    composition: &Composition,
    aspect: AspectRatio,
    max_dimension: u32,
) -> TilecastResult<Layout> {
    let (canvas_width, canvas_height) = canvas_size(aspect, max_dimension);
    uniform_layout(
        &composition.grid,
        canvas_width,
        canvas_height,
        composition.style.padding.max(0.0),
        composition.style.gap.max(0.0),
    )
}

/// Canvas size whose long edge equals `max_dimension`.
pub fn canvas_size(aspect: AspectRatio, max_dimension: u32) -> (u32, u32) {
    let long = max_dimension as f64;
    if aspect.width >= aspect.height {
        let short = (long * aspect.height / aspect.width).round();
        (max_dimension, short as u32)
    } else {
        let short = (long * aspect.width / aspect.height).round();
        (short as u32, max_dimension)
    }
}

fn uniform_layout(
    grid: &Grid,
    canvas_width: u32,
    canvas_height: u32,
    padding: f64,
    gap: f64,
) -> TilecastResult<Layout> {
    let inner_width = canvas_width as f64 - 2.0 * padding;
    let inner_height = canvas_height as f64 - 2.0 * padding;
    if inner_width <= 0.0 || inner_height <= 0.0 {
        return Err(TilecastError::size(format!(
            "padding {padding} leaves no drawable area on a {canvas_width}x{canvas_height} canvas"
        )));
    }

    let cols = grid.cols.max(1) as usize;
    let rows = grid.rows.max(1) as usize;
    let cell_width = (inner_width - gap * (cols as f64 - 1.0)) / cols as f64;
    let cell_height = (inner_height - gap * (rows as f64 - 1.0)) / rows as f64;
    if cell_width <= 0.0 || cell_height <= 0.0 {
        return Err(TilecastError::size(format!(
            "gap {gap} leaves no room for a {rows}x{cols} grid in {inner_width}x{inner_height}"
        )));
    }

    Ok(Layout {
        canvas_width,
        canvas_height,
        padding,
        gap,
        inner_width,
        inner_height,
        cell_width,
        cell_height,
        column_widths: vec![cell_width; cols],
        row_heights: vec![cell_height; rows],
    })
}

impl Layout {
    pub fn cols(&self) -> usize {
        self.column_widths.len()
    }

    pub fn rows(&self) -> usize {
        self.row_heights.len()
    }

    pub fn cell_count(&self) -> usize {
        self.cols() * self.rows()
    }

    /// The padded area that holds every cell.
    pub fn inner_rect(&self) -> Rect {
        Rect::new(self.padding, self.padding, self.inner_width, self.inner_height)
    }

    /// Pixel rectangle of a row-major cell index.
    pub fn cell_rect(&self, index: usize) -> Option<Rect> {
        let cols = self.cols();
        if cols == 0 || index >= self.cell_count() {
            return None;
        }
        let (row, col) = (index / cols, index % cols);
        let x = self.padding
            + self.column_widths[..col].iter().sum::<f64>()
            + col as f64 * self.gap;
        let y = self.padding + self.row_heights[..row].iter().sum::<f64>() + row as f64 * self.gap;
        Some(Rect::new(
            x,
            y,
            self.column_widths[col],
            self.row_heights[row],
        ))
    }

    /// Grow columns and rows to the largest content footprint they hold,
    /// then recompute the canvas from the union of column widths and row
    /// heights. `footprints[i]` is the content size for cell `i`; growth is
    /// capped at twice the uniform size per axis.
    pub fn widened(&self, footprints: &[Option<(f64, f64)>]) -> Layout {
        let cols = self.cols();
        let mut column_widths = self.column_widths.clone();
        let mut row_heights = self.row_heights.clone();

        for (index, footprint) in footprints.iter().enumerate().take(self.cell_count()) {
            let Some((w, h)) = footprint else {
                continue;
            };
            let (row, col) = (index / cols, index % cols);
            let w = w.min(self.cell_width * MAX_WIDEN_FACTOR);
            let h = h.min(self.cell_height * MAX_WIDEN_FACTOR);
            column_widths[col] = column_widths[col].max(w);
            row_heights[row] = row_heights[row].max(h);
        }

        let inner_width =
            column_widths.iter().sum::<f64>() + self.gap * (column_widths.len() as f64 - 1.0);
        let inner_height =
            row_heights.iter().sum::<f64>() + self.gap * (row_heights.len() as f64 - 1.0);

        Layout {
            canvas_width: (inner_width + 2.0 * self.padding).round() as u32,
            canvas_height: (inner_height + 2.0 * self.padding).round() as u32,
            padding: self.padding,
            gap: self.gap,
            inner_width,
            inner_height,
            cell_width: self.cell_width,
            cell_height: self.cell_height,
            column_widths,
            row_heights,
        }
    }

    /// Round canvas dimensions up to even pixel counts for yuv420 encoders.
    /// The extra pixel is background; cells do not move.
    pub fn with_even_canvas(mut self) -> Layout {
        self.canvas_width += self.canvas_width % 2;
        self.canvas_height += self.canvas_height % 2;
        self
    }
}

/// Size of an asset scaled to cover a cell.
pub fn cover_footprint(asset_size: (f64, f64), cell_size: (f64, f64)) -> Option<(f64, f64)> {
    let (aw, ah) = asset_size;
    let (cw, ch) = cell_size;
    if aw <= 0.0 || ah <= 0.0 {
        return None;
    }
    let scale = (cw / aw).max(ch / ah);
    Some((aw * scale, ah * scale))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tilecast_project_model::project::Composition;

    fn composition(aspect: &str, rows: u32, cols: u32, padding: f64, gap: f64) -> Composition {
        let mut composition = Composition::new("test", rows, cols);
        composition.aspect_ratio = aspect.to_string();
        composition.style.padding = padding;
        composition.style.gap = gap;
        composition
    }

    #[test]
    fn test_malformed_aspect_falls_back_to_square() {
        for value in ["", "abc", "4:0", "4", "0:3", "-1:2", "a:b", "16:9:1"] {
            assert_eq!(AspectRatio::parse(value), AspectRatio::SQUARE, "{value:?}");
            let layout = calculate_layout(&composition(value, 1, 1, 0.0, 0.0), 1000).unwrap();
            assert_eq!((layout.canvas_width, layout.canvas_height), (1000, 1000));
        }
    }

    #[test]
    fn test_wide_and_tall_canvas() {
        assert_eq!(canvas_size(AspectRatio::parse("16:9"), 1920), (1920, 1080));
        assert_eq!(canvas_size(AspectRatio::parse("9:16"), 1920), (1080, 1920));
        assert_eq!(canvas_size(AspectRatio::parse("4:3"), 1000), (1000, 750));
    }

    #[test]
    fn test_sixteen_nine_two_cells_exact_arithmetic() {
        let layout = calculate_layout(&composition("16:9", 1, 2, 24.0, 12.0), 1920).unwrap();
        assert_eq!(layout.canvas_width, 1920);
        assert_eq!(layout.canvas_height, 1080);
        assert_eq!(layout.inner_width, 1872.0);
        assert_eq!(layout.inner_height, 1032.0);
        assert_eq!(layout.cell_width, (1920.0 - 48.0 - 12.0) / 2.0);
        assert_eq!(layout.cell_width, 930.0);
        assert_eq!(layout.cell_height, 1032.0);

        let second = layout.cell_rect(1).unwrap();
        assert_eq!(second, Rect::new(24.0 + 930.0 + 12.0, 24.0, 930.0, 1032.0));
        assert_eq!(layout.cell_rect(2), None);
    }

    #[test]
    fn test_padding_too_large_is_size_error() {
        let err = calculate_layout(&composition("1:1", 2, 2, 600.0, 0.0), 1000).unwrap_err();
        assert!(matches!(err, TilecastError::Size { .. }));
    }

    #[test]
    fn test_widened_layout_grows_to_content() {
        let layout = calculate_layout(&composition("2:1", 1, 2, 10.0, 10.0), 420).unwrap();
        // canvas 420x210, inner 400x190, cells 195x190
        assert_eq!(layout.cell_width, 195.0);
        let footprints = vec![Some((300.0, 190.0)), None];
        let widened = layout.widened(&footprints);
        assert_eq!(widened.column_widths, vec![300.0, 195.0]);
        assert_eq!(widened.canvas_width, (300.0 + 195.0 + 10.0 + 20.0) as u32);
        assert_eq!(widened.canvas_height, 210);
        assert_eq!(widened.cell_rect(1).unwrap().x, 10.0 + 300.0 + 10.0);
    }

    #[test]
    fn test_widening_is_capped() {
        let layout = calculate_layout(&composition("1:1", 1, 1, 0.0, 0.0), 100).unwrap();
        let widened = layout.widened(&[Some((1000.0, 1000.0))]);
        assert_eq!((widened.canvas_width, widened.canvas_height), (200, 200));
    }

    #[test]
    fn test_even_canvas() {
        let layout = calculate_layout(&composition("3:2", 1, 1, 0.0, 0.0), 1001).unwrap();
        assert_eq!((layout.canvas_width, layout.canvas_height), (1001, 667));
        let even = layout.with_even_canvas();
        assert_eq!((even.canvas_width, even.canvas_height), (1002, 668));
    }

    #[test]
    fn test_radius_clamp() {
        let rect = Rect::new(0.0, 0.0, 40.0, 10.0);
        assert_eq!(rect.clamp_radius(16.0), 5.0);
        assert_eq!(rect.clamp_radius(-3.0), 0.0);
    }

    #[test]
    fn test_cover_footprint() {
        assert_eq!(
            cover_footprint((1920.0, 1080.0), (100.0, 100.0)),
            Some((1920.0 * 100.0 / 1080.0, 100.0))
        );
        assert_eq!(cover_footprint((0.0, 10.0), (100.0, 100.0)), None);
    }

    proptest! {
        #[test]
        fn prop_canvas_matches_aspect(w in 1u32..64, h in 1u32..64, max_dim in 256u32..4096) {
            let layout = calculate_layout(&composition(&format!("{w}:{h}"), 1, 1, 0.0, 0.0), max_dim).unwrap();
            let expected = w as f64 / h as f64;
            let actual = layout.canvas_width as f64 / layout.canvas_height as f64;
            // one pixel of rounding on the short edge
            let short = layout.canvas_width.min(layout.canvas_height) as f64;
            prop_assert!((actual - expected).abs() <= expected * (1.0 / (short - 0.5)) + 1e-9);
            prop_assert_eq!(layout.canvas_width.max(layout.canvas_height), max_dim);
        }

        #[test]
        fn prop_inner_and_cells_partition_canvas(
            rows in 1u32..6,
            cols in 1u32..6,
            padding in 0.0f64..40.0,
            gap in 0.0f64..20.0,
        ) {
            let layout = calculate_layout(&composition("16:9", rows, cols, padding, gap), 1920).unwrap();
            prop_assert!((layout.inner_width - (layout.canvas_width as f64 - 2.0 * padding)).abs() < 1e-9);
            prop_assert!((layout.inner_height - (layout.canvas_height as f64 - 2.0 * padding)).abs() < 1e-9);
            let total_w = layout.cell_width * cols as f64 + gap * (cols as f64 - 1.0);
            let total_h = layout.cell_height * rows as f64 + gap * (rows as f64 - 1.0);
            prop_assert!((total_w - layout.inner_width).abs() < 1e-6);
            prop_assert!((total_h - layout.inner_height).abs() < 1e-6);

            let last = layout.cell_rect(layout.cell_count() - 1).unwrap();
            prop_assert!((last.right() - (padding + layout.inner_width)).abs() < 1e-6);
            prop_assert!((last.bottom() - (padding + layout.inner_height)).abs() < 1e-6);
        }
    }
}
