use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::error::ConfigError;
use crate::geometry::{FitPolicy, LayoutOptions, Orientation, Spacing};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomBounds {
    pub min: f32,
    pub mid: f32,
    pub max: f32,
}

impl Default for ZoomBounds {
    fn default() -> Self {
        Self {
            min: 1.0,
            mid: 1.75,
            max: 3.0,
        }
    }
}

impl ZoomBounds {
    pub fn clamp(&self, zoom: f32) -> f32 {
        zoom.clamp(self.min, self.max)
    }
}

/// Sizes and budgets of the tile engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineLimits {
    /// Edge of a grid cell in output pixels.
    pub part_size: u32,
    /// Thumbnail size relative to the unzoomed page.
    pub thumbnail_ratio: f32,
    pub printing_thumbnail_ratio: f32,
    /// Extra document pixels planned beyond both ends of the viewport.
    pub preload_margin: f32,
    pub cache_size: usize,
    pub thumbnail_cache_size: usize,
    /// Longest side of any full-page raster.
    pub max_bitmap_dimension: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            part_size: 256,
            thumbnail_ratio: 0.3,
            printing_thumbnail_ratio: 0.75,
            preload_margin: 20.0,
            cache_size: 120,
            thumbnail_cache_size: 8,
            max_bitmap_dimension: 4096,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub orientation: Orientation,
    pub fit_policy: FitPolicy,
    /// Fit every page on its own instead of sharing one scale.
    pub fit_each_page: bool,
    pub spacing: Spacing,
    pub zoom: ZoomBounds,
    pub render_annotations: bool,
    pub password: Option<String>,
    pub default_page: usize,
    pub limits: EngineLimits,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            orientation: Orientation::Vertical,
            fit_policy: FitPolicy::Width,
            fit_each_page: false,
            spacing: Spacing::default(),
            zoom: ZoomBounds::default(),
            render_annotations: false,
            password: None,
            default_page: 0,
            limits: EngineLimits::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: ViewerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&source)
            .with_context(|| format!("failed to load config file {:?}", path))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.part_size == 0 {
            return Err(ConfigError::Invalid("part_size must be positive".into()));
        }
        if limits.cache_size == 0 || limits.thumbnail_cache_size == 0 {
            return Err(ConfigError::Invalid("cache sizes must be positive".into()));
        }
        if limits.max_bitmap_dimension < limits.part_size {
            return Err(ConfigError::Invalid(
                "max_bitmap_dimension must not be smaller than part_size".into(),
            ));
        }
        for (name, ratio) in [
            ("thumbnail_ratio", limits.thumbnail_ratio),
            ("printing_thumbnail_ratio", limits.printing_thumbnail_ratio),
        ] {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(ConfigError::Invalid(format!("{name} must be in (0, 1]")));
            }
        }
        if !(limits.preload_margin >= 0.0) {
            return Err(ConfigError::Invalid("preload_margin must not be negative".into()));
        }
        let zoom = &self.zoom;
        if !(zoom.min > 0.0 && zoom.min <= zoom.mid && zoom.mid <= zoom.max) {
            return Err(ConfigError::Invalid(format!(
                "zoom bounds must satisfy 0 < min <= mid <= max (got {} / {} / {})",
                zoom.min, zoom.mid, zoom.max
            )));
        }
        let spacing = &self.spacing;
        if spacing.page_separator < 0.0 || spacing.start < 0.0 || spacing.end < 0.0 {
            return Err(ConfigError::Invalid("spacing must not be negative".into()));
        }
        Ok(())
    }

    pub fn layout_options(&self) -> LayoutOptions {
        LayoutOptions {
            orientation: self.orientation,
            fit_policy: self.fit_policy,
            fit_each_page: self.fit_each_page,
            spacing: self.spacing,
        }
    }
}
