//! Toolkit configuration
//!
//! Every tool reads its defaults from a [`ToolkitConfig`], loaded from TOML.
//! Missing sections and keys fall back to the built-in defaults.

use crate::color::Rgb;
use crate::compress::CompressOptions;
use crate::coords::Zoom;
use crate::error::{PdfToolsError, Result};
use crate::raster::{RasterFormat, RasterOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    pub text: TextConfig,
    pub image: ImageConfig,
    pub signature: SignatureConfig,
    pub viewer: ViewerConfig,
    pub raster: RasterConfig,
    pub security: SecurityConfig,
    pub compress: CompressConfig,
}

impl ToolkitConfig {
    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PdfToolsError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)
            .map_err(|e| PdfToolsError::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| PdfToolsError::Config(e.to_string()))
    }

    /// Check ranges and cross-field constraints
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: f64) -> Result<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(PdfToolsError::Config(format!(
                    "{} must be positive, got {}",
                    name, value
                )))
            }
        }

        positive("text.font_size", self.text.font_size)?;
        positive("image.width", self.image.width)?;
        positive("image.height", self.image.height)?;
        positive("signature.width", self.signature.width)?;
        positive("signature.height", self.signature.height)?;
        positive("signature.pen_width", self.signature.pen_width)?;

        let viewer = &self.viewer;
        positive("viewer.min_zoom", viewer.min_zoom)?;
        positive("viewer.zoom_step", viewer.zoom_step)?;
        if viewer.min_zoom > viewer.max_zoom {
            return Err(PdfToolsError::Config(format!(
                "viewer.min_zoom {} exceeds viewer.max_zoom {}",
                viewer.min_zoom, viewer.max_zoom
            )));
        }
        if !(viewer.min_zoom..=viewer.max_zoom).contains(&viewer.initial_zoom) {
            return Err(PdfToolsError::Config(format!(
                "viewer.initial_zoom {} outside {}-{}",
                viewer.initial_zoom, viewer.min_zoom, viewer.max_zoom
            )));
        }

        let raster = &self.raster;
        positive("raster.min_scale", raster.min_scale)?;
        if raster.min_scale > raster.max_scale {
            return Err(PdfToolsError::Config(format!(
                "raster.min_scale {} exceeds raster.max_scale {}",
                raster.min_scale, raster.max_scale
            )));
        }
        raster
            .check_scale(raster.scale)
            .map_err(|e| PdfToolsError::Config(format!("raster.scale: {}", e)))?;
        if !(1..=100).contains(&raster.jpeg_quality) {
            return Err(PdfToolsError::Config(format!(
                "raster.jpeg_quality must be 1-100, got {}",
                raster.jpeg_quality
            )));
        }

        if self.security.min_password_length == 0 {
            return Err(PdfToolsError::Config(
                "security.min_password_length must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Defaults for text runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub font_size: f64,
    pub color: Rgb,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            font_size: 16.0,
            color: Rgb::BLACK,
        }
    }
}

/// Default box for placed images, in points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 200.0,
            height: 200.0,
        }
    }
}

/// Signature pad and placement defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub width: f64,
    pub height: f64,
    pub pen_width: f64,
    pub pen_color: Rgb,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            width: 200.0,
            height: 80.0,
            pen_width: 2.0,
            pen_color: Rgb::BLACK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub initial_zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub zoom_step: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            initial_zoom: 1.0,
            min_zoom: 0.5,
            max_zoom: 2.0,
            zoom_step: 0.25,
        }
    }
}

impl ViewerConfig {
    pub fn zoom(&self) -> Zoom {
        Zoom::new(self.initial_zoom, self.min_zoom, self.max_zoom, self.zoom_step)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterConfig {
    pub format: RasterFormat,
    pub scale: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub jpeg_quality: u8,
    /// Zip a one-page result too, instead of delivering the image directly
    pub archive_single_page: bool,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            format: RasterFormat::Png,
            scale: 2.0,
            min_scale: 1.0,
            max_scale: 3.0,
            jpeg_quality: crate::raster::DEFAULT_JPEG_QUALITY,
            archive_single_page: true,
        }
    }
}

impl RasterConfig {
    /// Scales outside `min_scale..=max_scale` are rejected
    pub fn check_scale(&self, scale: f64) -> Result<()> {
        if (self.min_scale..=self.max_scale).contains(&scale) {
            Ok(())
        } else {
            Err(PdfToolsError::InvalidParameter(format!(
                "Scale {} outside {}-{}",
                scale, self.min_scale, self.max_scale
            )))
        }
    }

    /// Options for `format` at `scale`, or the configured defaults
    pub fn options(&self, format: Option<RasterFormat>, scale: Option<f64>) -> Result<RasterOptions> {
        let scale = scale.unwrap_or(self.scale);
        self.check_scale(scale)?;
        Ok(RasterOptions::new(format.unwrap_or(self.format), scale)
            .with_jpeg_quality(self.jpeg_quality))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub min_password_length: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_password_length: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressConfig {
    pub strip_metadata: bool,
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            strip_metadata: true,
        }
    }
}

impl CompressConfig {
    pub fn options(&self) -> CompressOptions {
        CompressOptions {
            strip_metadata: self.strip_metadata,
        }
    }
}
