//! Hex color parsing shared by the compositor and the filter-graph builder.

/// Straight-alpha RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// Opacity in `[0, 1]`.
    pub a: f64,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 1.0);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0.0);

    pub const fn rgba(r: u8, g: u8, b: u8, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Parse a 6-digit hex color (leading `#` optional) with the given
    /// opacity. Anything else degrades to opaque white.
    pub fn from_hex(hex: &str, opacity: f64) -> Self {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Self::WHITE;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&digits[range], 16);
        match (channel(0..2), channel(2..4), channel(4..6)) {
            (Ok(r), Ok(g), Ok(b)) => Self::rgba(r, g, b, opacity.clamp(0.0, 1.0)),
            _ => Self::WHITE,
        }
    }

    /// Opaque color from hex.
    pub fn opaque(hex: &str) -> Self {
        Self::from_hex(hex, 1.0)
    }

    pub fn with_alpha(self, a: f64) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            ..self
        }
    }

    /// CSS form, `rgba(r,g,b,a)`.
    pub fn css(&self) -> String {
        format!("rgba({},{},{},{})", self.r, self.g, self.b, self.a)
    }

    /// ffmpeg color syntax, `0xRRGGBB@a`.
    pub fn ffmpeg(&self) -> String {
        format!("0x{:02X}{:02X}{:02X}@{:.3}", self.r, self.g, self.b, self.a)
    }

    /// Linear interpolation between two colors.
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Color {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: self.a + (other.a - self.a) * t,
        }
    }
}
