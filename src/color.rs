//! Linear RGB colors for instance tinting.
//!
//! The shared color buffer stores three floats per slot, so [`Color`] carries
//! no alpha. Colors written from hex strings are treated as sRGB and
//! converted to linear space, which is what the instanced shader expects when
//! rendering into an sRGB surface.

use thiserror::Error;

/// Errors produced when parsing a hex color string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ColorParseError {
    /// The string was not `#rrggbb` or `#rgb` (leading `#` optional).
    #[error("expected 3 or 6 hex digits, got {0:?}")]
    Length(String),
    /// A character outside `0-9a-fA-F` was found.
    #[error("invalid hex digit in {0:?}")]
    Digit(String),
}

/// A linear RGB color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parse an sRGB hex string (`#ff7675`, `74b9ff`, `#fff`) into a linear color.
    ///
    /// ```
    /// use herd::Color;
    ///
    /// let white = Color::from_hex("#ffffff").unwrap();
    /// assert_eq!(white, Color::WHITE);
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, ColorParseError> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        let expanded: String = match digits.len() {
            6 => digits.to_string(),
            3 => digits.chars().flat_map(|c| [c, c]).collect(),
            _ => return Err(ColorParseError::Length(hex.to_string())),
        };

        if !expanded.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ColorParseError::Digit(hex.to_string()));
        }
        let value = u32::from_str_radix(&expanded, 16)
            .map_err(|_| ColorParseError::Digit(hex.to_string()))?;

        let channel = |shift: u32| ((value >> shift) & 0xff) as f32 / 255.0;
        Ok(Self::from_srgb(channel(16), channel(8), channel(0)))
    }

    /// Build a linear color from gamma-encoded sRGB components in `[0, 1]`.
    pub fn from_srgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgb(srgb_to_linear(r), srgb_to_linear(g), srgb_to_linear(b))
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    pub fn from_array(rgb: [f32; 3]) -> Self {
        Self::rgb(rgb[0], rgb[1], rgb[2])
    }
}

impl From<[f32; 3]> for Color {
    fn from(rgb: [f32; 3]) -> Self {
        Self::from_array(rgb)
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c >= 1.0 {
        1.0
    } else if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_six_and_three_digit_hex() {
        assert_eq!(Color::from_hex("#000000").unwrap(), Color::BLACK);
        assert_eq!(Color::from_hex("fff").unwrap(), Color::WHITE);
        assert_eq!(
            Color::from_hex("#F79F1F").unwrap(),
            Color::from_hex("#f79f1f").unwrap()
        );
    }

    #[test]
    fn converts_to_linear() {
        let c = Color::from_hex("#808080").unwrap();
        // sRGB 0.502 is roughly 0.216 in linear space
        assert!((c.r - 0.2158).abs() < 0.001);
        assert_eq!(c.r, c.g);
        assert_eq!(c.g, c.b);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            Color::from_hex("#12345"),
            Err(ColorParseError::Length("#12345".into()))
        );
        assert_eq!(
            Color::from_hex("#zzzzzz"),
            Err(ColorParseError::Digit("#zzzzzz".into()))
        );
    }
}
