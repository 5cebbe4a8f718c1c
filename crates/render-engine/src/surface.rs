//! CPU raster surface with a clip stack.
//!
//! Coverage is computed from signed distances at pixel centers, so every
//! primitive is anti-aliased and the output depends only on the inputs.

use std::io::Cursor;

use ab_glyph::{point, Font, PxScale, ScaleFont};
use image::{ImageFormat, Rgba, RgbaImage};
use tilecast_common::error::{TilecastError, TilecastResult};

use crate::color::Color;
use crate::font::FontFace;
use crate::layout::Rect;

/// A clip region: a rectangle with rounded corners (radius 0 for plain).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub rect: Rect,
    pub radius: f64,
}

/// Direction of a two-stop gradient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradientDirection {
    Vertical,
    Diagonal,
}

/// An owned RGBA pixel surface.
#[derive(Debug, Clone)]
pub struct Surface {
    pixels: RgbaImage,
    clips: Vec<Clip>,
}

impl Surface {
    /// Allocate a transparent surface, refusing sizes beyond the raster limit.
    pub fn allocate(width: u32, height: u32, max_pixels: u64) -> TilecastResult<Self> {
        let requested = width as u64 * height as u64;
        if width == 0 || height == 0 {
            return Err(TilecastError::environment(format!(
                "Cannot allocate a {width}x{height} surface"
            )));
        }
        if requested > max_pixels {
            return Err(TilecastError::environment(format!(
                "Surface {width}x{height} exceeds the raster limit of {max_pixels} pixels"
            )));
        }
        Ok(Self {
            pixels: RgbaImage::new(width, height),
            clips: Vec::new(),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    /// Replace every pixel with `color` and drop all clips.
    pub fn clear(&mut self, color: Color) {
        self.clips.clear();
        let px = to_pixel(color);
        for p in self.pixels.pixels_mut() {
            *p = px;
        }
    }

    /// Intersect subsequent drawing with a rounded rectangle.
    pub fn push_clip(&mut self, rect: Rect, radius: f64) {
        self.clips.push(Clip {
            rect,
            radius: rect.clamp_radius(radius),
        });
    }

    pub fn pop_clip(&mut self) {
        self.clips.pop();
    }

    pub fn clip_depth(&self) -> usize {
        self.clips.len()
    }

    pub fn fill_rect(&mut self, rect: Rect, color: Color) {
        self.fill_rounded_rect(rect, 0.0, color);
    }

    pub fn fill_rounded_rect(&mut self, rect: Rect, radius: f64, color: Color) {
        let radius = rect.clamp_radius(radius);
        self.paint_region(rect, |x, y| {
            let coverage = rounded_rect_coverage(&rect, radius, x, y);
            (coverage > 0.0).then_some((color, coverage))
        });
    }

    /// Fill with a two-stop gradient from `start` to `end`.
    pub fn fill_gradient(
        &mut self,
        rect: Rect,
        radius: f64,
        start: Color,
        end: Color,
        direction: GradientDirection,
    ) {
        let radius = rect.clamp_radius(radius);
        self.paint_region(rect, |x, y| {
            let coverage = rounded_rect_coverage(&rect, radius, x, y);
            if coverage <= 0.0 {
                return None;
            }
            let t = match direction {
                GradientDirection::Vertical => (y - rect.y) / rect.height.max(1e-9),
                GradientDirection::Diagonal => {
                    ((x - rect.x) + (y - rect.y)) / (rect.width + rect.height).max(1e-9)
                }
            };
            Some((start.lerp(end, t), coverage))
        });
    }

    /// Stroke centered on the rounded rectangle's edge.
    pub fn stroke_rounded_rect(&mut self, rect: Rect, radius: f64, width: f64, color: Color) {
        if width <= 0.0 {
            return;
        }
        let half = width / 2.0;
        let radius = rect.clamp_radius(radius);
        let outer = Rect::new(
            rect.x - half,
            rect.y - half,
            rect.width + width,
            rect.height + width,
        );
        let outer_radius = if radius > 0.0 { radius + half } else { 0.0 };
        let inner = Rect::new(
            rect.x + half,
            rect.y + half,
            (rect.width - width).max(0.0),
            (rect.height - width).max(0.0),
        );
        let inner_radius = (radius - half).max(0.0);
        self.paint_region(outer, |x, y| {
            let outer_cov = rounded_rect_coverage(&outer, outer_radius, x, y);
            if outer_cov <= 0.0 {
                return None;
            }
            let inner_cov = if inner.width > 0.0 && inner.height > 0.0 {
                rounded_rect_coverage(&inner, inner_radius, x, y)
            } else {
                0.0
            };
            let coverage = outer_cov * (1.0 - inner_cov);
            (coverage > 0.0).then_some((color, coverage))
        });
    }

    /// Draw `image` scaled into `dest` with bilinear sampling.
    pub fn draw_image(&mut self, image: &RgbaImage, dest: Rect) {
        let (src_w, src_h) = image.dimensions();
        if src_w == 0 || src_h == 0 || dest.width <= 0.0 || dest.height <= 0.0 {
            return;
        }
        let sx = src_w as f64 / dest.width;
        let sy = src_h as f64 / dest.height;
        self.paint_region(dest, |x, y| {
            let coverage = rounded_rect_coverage(&dest, 0.0, x, y);
            if coverage <= 0.0 {
                return None;
            }
            let u = (x - dest.x) * sx - 0.5;
            let v = (y - dest.y) * sy - 0.5;
            Some((sample_bilinear(image, u, v), coverage))
        });
    }

    /// Draw a single line of text with its top-left corner at `(x, y)`.
    pub fn draw_text(&mut self, font: &FontFace, text: &str, x: f64, y: f64, px: f32, color: Color) {
        let scale = PxScale::from(px);
        let scaled = font.font().as_scaled(scale);
        let baseline = y as f32 + scaled.ascent();
        let mut caret = x as f32;
        let mut previous = None;
        for c in text.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, point(caret, baseline));
            caret += scaled.h_advance(id);
            previous = Some(id);

            let Some(outlined) = font.font().outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            let mut coverage_map = Vec::new();
            outlined.draw(|gx, gy, c| {
                coverage_map.push((
                    bounds.min.x as i64 + gx as i64,
                    bounds.min.y as i64 + gy as i64,
                    c as f64,
                ));
            });
            for (px_x, px_y, coverage) in coverage_map {
                self.blend_pixel(px_x, px_y, color, coverage);
            }
        }
    }

    /// Encode the surface as PNG.
    pub fn encode_png(&self) -> TilecastResult<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        self.pixels
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|e| TilecastError::serialization(format!("PNG encoding failed: {e}")))?;
        let bytes = out.into_inner();
        if bytes.is_empty() {
            return Err(TilecastError::serialization("PNG encoder produced no data"));
        }
        Ok(bytes)
    }

    /// Visit every pixel whose center lies near `bounds`, asking `shade` for a
    /// color and coverage, then blend through the active clips.
    fn paint_region<F>(&mut self, bounds: Rect, mut shade: F)
    where
        F: FnMut(f64, f64) -> Option<(Color, f64)>,
    {
        let (width, height) = (self.width() as i64, self.height() as i64);
        let x0 = (bounds.x.floor() as i64 - 1).clamp(0, width);
        let y0 = (bounds.y.floor() as i64 - 1).clamp(0, height);
        let x1 = (bounds.right().ceil() as i64 + 1).clamp(0, width);
        let y1 = (bounds.bottom().ceil() as i64 + 1).clamp(0, height);

        for py in y0..y1 {
            for px in x0..x1 {
                let (cx, cy) = (px as f64 + 0.5, py as f64 + 0.5);
                let clip = self.clip_coverage(cx, cy);
                if clip <= 0.0 {
                    continue;
                }
                if let Some((color, coverage)) = shade(cx, cy) {
                    blend(
                        self.pixels.get_pixel_mut(px as u32, py as u32),
                        color,
                        coverage * clip,
                    );
                }
            }
        }
    }

    fn blend_pixel(&mut self, x: i64, y: i64, color: Color, coverage: f64) {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return;
        }
        let clip = self.clip_coverage(x as f64 + 0.5, y as f64 + 0.5);
        if clip > 0.0 {
            blend(
                self.pixels.get_pixel_mut(x as u32, y as u32),
                color,
                coverage * clip,
            );
        }
    }

    fn clip_coverage(&self, x: f64, y: f64) -> f64 {
        self.clips.iter().fold(1.0, |acc, clip| {
            if acc <= 0.0 {
                0.0
            } else {
                acc * rounded_rect_coverage(&clip.rect, clip.radius, x, y)
            }
        })
    }
}

/// Anti-aliased coverage of a pixel center by a rounded rectangle.
fn rounded_rect_coverage(rect: &Rect, radius: f64, x: f64, y: f64) -> f64 {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return 0.0;
    }
    let (cx, cy) = rect.center();
    let qx = (x - cx).abs() - (rect.width / 2.0 - radius);
    let qy = (y - cy).abs() - (rect.height / 2.0 - radius);
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    let inside = qx.max(qy).min(0.0);
    let distance = outside + inside - radius;
    (0.5 - distance).clamp(0.0, 1.0)
}

fn sample_bilinear(image: &RgbaImage, u: f64, v: f64) -> Color {
    let (w, h) = image.dimensions();
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    let u = u.clamp(0.0, max_x);
    let v = v.clamp(0.0, max_y);
    let (x0, y0) = (u.floor(), v.floor());
    let (fx, fy) = (u - x0, v - y0);
    let (x0, y0) = (x0 as u32, y0 as u32);
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);

    let p = |x: u32, y: u32| image.get_pixel(x, y).0;
    let (a, b, c, d) = (p(x0, y0), p(x1, y0), p(x0, y1), p(x1, y1));
    let mix = |i: usize| {
        let top = a[i] as f64 * (1.0 - fx) + b[i] as f64 * fx;
        let bottom = c[i] as f64 * (1.0 - fx) + d[i] as f64 * fx;
        top * (1.0 - fy) + bottom * fy
    };
    Color::rgba(
        mix(0).round() as u8,
        mix(1).round() as u8,
        mix(2).round() as u8,
        mix(3) / 255.0,
    )
}

/// Source-over blend of a straight-alpha color.
fn blend(dst: &mut Rgba<u8>, color: Color, coverage: f64) {
    let sa = (color.a * coverage).clamp(0.0, 1.0);
    if sa <= 0.0 {
        return;
    }
    let da = dst.0[3] as f64 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    let channel = |s: u8, d: u8| {
        ((s as f64 * sa + d as f64 * da * (1.0 - sa)) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    *dst = Rgba([
        channel(color.r, dst.0[0]),
        channel(color.g, dst.0[1]),
        channel(color.b, dst.0[2]),
        (out_a * 255.0).round() as u8,
    ]);
}

fn to_pixel(color: Color) -> Rgba<u8> {
    Rgba([
        color.r,
        color.g,
        color.b,
        (color.a.clamp(0.0, 1.0) * 255.0).round() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(w: u32, h: u32) -> Surface {
        let mut s = Surface::allocate(w, h, u64::MAX).unwrap();
        s.clear(Color::BLACK);
        s
    }

    #[test]
    fn test_allocate_rejects_oversized_surface() {
        let err = Surface::allocate(100, 100, 5_000).unwrap_err();
        assert!(matches!(err, TilecastError::Environment { .. }));
        assert!(Surface::allocate(0, 10, u64::MAX).is_err());
    }

    #[test]
    fn test_fill_rect_is_pixel_exact_on_integer_bounds() {
        let mut s = surface(10, 10);
        s.fill_rect(Rect::new(2.0, 2.0, 4.0, 4.0), Color::WHITE);
        assert_eq!(s.pixels().get_pixel(2, 2).0, [255, 255, 255, 255]);
        assert_eq!(s.pixels().get_pixel(5, 5).0, [255, 255, 255, 255]);
        assert_eq!(s.pixels().get_pixel(6, 6).0, [0, 0, 0, 255]);
        assert_eq!(s.pixels().get_pixel(1, 2).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_rounded_corners_leave_background() {
        let mut s = surface(20, 20);
        s.fill_rounded_rect(Rect::new(0.0, 0.0, 20.0, 20.0), 10.0, Color::WHITE);
        assert_eq!(s.pixels().get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(s.pixels().get_pixel(10, 10).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_clip_restricts_drawing() {
        let mut s = surface(10, 10);
        s.push_clip(Rect::new(0.0, 0.0, 5.0, 10.0), 0.0);
        s.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), Color::WHITE);
        s.pop_clip();
        assert_eq!(s.pixels().get_pixel(4, 4).0, [255, 255, 255, 255]);
        assert_eq!(s.pixels().get_pixel(5, 4).0, [0, 0, 0, 255]);
        assert_eq!(s.clip_depth(), 0);
    }

    #[test]
    fn test_translucent_fill_blends() {
        let mut s = surface(4, 4);
        s.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), Color::WHITE.with_alpha(0.5));
        let p = s.pixels().get_pixel(1, 1).0;
        assert!((127..=128).contains(&p[0]));
        assert_eq!(p[3], 255);
    }

    #[test]
    fn test_stroke_leaves_interior_untouched() {
        let mut s = surface(20, 20);
        s.stroke_rounded_rect(Rect::new(4.0, 4.0, 12.0, 12.0), 0.0, 2.0, Color::WHITE);
        assert_eq!(s.pixels().get_pixel(4, 10).0, [255, 255, 255, 255]);
        assert_eq!(s.pixels().get_pixel(10, 10).0, [0, 0, 0, 255]);
        assert_eq!(s.pixels().get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_draw_image_scales_solid_source() {
        let source = RgbaImage::from_pixel(2, 2, Rgba([10, 200, 30, 255]));
        let mut s = surface(8, 8);
        s.draw_image(&source, Rect::new(0.0, 0.0, 8.0, 4.0));
        assert_eq!(s.pixels().get_pixel(3, 2).0, [10, 200, 30, 255]);
        assert_eq!(s.pixels().get_pixel(3, 6).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_gradient_runs_between_stops() {
        let mut s = surface(1, 100);
        s.fill_gradient(
            Rect::new(0.0, 0.0, 1.0, 100.0),
            0.0,
            Color::BLACK,
            Color::WHITE,
            GradientDirection::Vertical,
        );
        let top = s.pixels().get_pixel(0, 0).0[0];
        let bottom = s.pixels().get_pixel(0, 99).0[0];
        assert!(top < 5);
        assert!(bottom > 250);
    }

    #[test]
    fn test_png_encoding_produces_signature() {
        let s = surface(3, 3);
        let png = s.encode_png().unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
