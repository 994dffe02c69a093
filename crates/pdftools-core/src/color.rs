//! RGB colours as used by text runs and annotations

use crate::error::{PdfToolsError, Result};
use lopdf::Object;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An sRGB colour, 0-255 per channel.
///
/// Serializes as a `#rrggbb` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const YELLOW: Rgb = Rgb::new(255, 255, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb`, `rrggbb` or the short `#rgb` form
    pub fn from_hex(color: &str) -> Result<Self> {
        let hex = color.trim().trim_start_matches('#');
        let invalid = || PdfToolsError::InvalidParameter(format!("Invalid colour: {}", color));
        if !hex.is_ascii() {
            return Err(invalid());
        }

        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(Self::new(
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            )),
            3 => {
                let short = |s: &str| channel(s).map(|v| v * 17);
                Ok(Self::new(
                    short(&hex[0..1])?,
                    short(&hex[1..2])?,
                    short(&hex[2..3])?,
                ))
            }
            _ => Err(invalid()),
        }
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Channels scaled to the 0.0-1.0 range PDF colour operators expect
    pub fn components(self) -> [f32; 3] {
        [
            f32::from(self.r) / 255.0,
            f32::from(self.g) / 255.0,
            f32::from(self.b) / 255.0,
        ]
    }

    /// Operands for `rg`/`RG`, or the value of an annotation `/C` entry
    pub fn to_pdf_array(self) -> Vec<Object> {
        self.components().iter().map(|c| Object::Real(*c)).collect()
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = PdfToolsError;

    fn try_from(value: String) -> Result<Self> {
        Rgb::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex_long_and_short() {
        assert_eq!(Rgb::from_hex("#ff6b6b").unwrap(), Rgb::new(255, 107, 107));
        assert_eq!(Rgb::from_hex("4ecdc4").unwrap(), Rgb::new(0x4e, 0xcd, 0xc4));
        assert_eq!(Rgb::from_hex("#fff").unwrap(), Rgb::WHITE);
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(Rgb::from_hex("#ff00").is_err());
        assert!(Rgb::from_hex("#gg0000").is_err());
        assert!(Rgb::from_hex("#ffé000").is_err());
    }

    #[test]
    fn test_components_scale() {
        assert_eq!(Rgb::BLACK.components(), [0.0, 0.0, 0.0]);
        assert_eq!(Rgb::YELLOW.components(), [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&Rgb::new(0x45, 0xb7, 0xd1)).unwrap();
        assert_eq!(json, "\"#45b7d1\"");
        let back: Rgb = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Rgb::new(0x45, 0xb7, 0xd1));
        assert!(serde_json::from_str::<Rgb>("\"red\"").is_err());
    }
}
