//! Tunable parameters for an analysis run.
//!
//! Every constant of the detection pipeline lives here so that it can be
//! adjusted per deployment instead of being baked into the algorithms. All
//! sections deserialize with defaults, so a config file only needs to name the
//! values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::models::AnalysisMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub detection: DetectionConfig,
    pub tiling: TilingConfig,
    pub batch: BatchConfig,
    pub consolidation: ConsolidationConfig,
    pub gemini: GeminiConfig,
}

/// Change-mask quantization and region padding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Side of a grid cell in pixels
    pub cell_size: u32,
    /// Only every n-th pixel in each axis is sampled
    pub sample_stride: u32,
    /// Lower bound of the per-pixel difference threshold
    pub min_threshold: u32,
    /// Margin added around each merged region
    pub roi_padding: u32,
    pub macro_sensitivity: u8,
    pub micro_sensitivity: u8,
}

impl DetectionConfig {
    pub fn sensitivity_for(&self, mode: AnalysisMode) -> u8 {
        match mode {
            AnalysisMode::Macro => self.macro_sensitivity,
            AnalysisMode::Micro => self.micro_sensitivity,
        }
    }

    /// Per-pixel threshold: `max(min_threshold, 100 - sensitivity)`
    pub fn threshold(&self, sensitivity: u8) -> u32 {
        let sensitivity = sensitivity.min(100) as u32;
        self.min_threshold.max(100 - sensitivity)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cell_size: 40,
            sample_stride: 2,
            min_threshold: 10,
            roi_padding: 60,
            macro_sensitivity: 50,
            micro_sensitivity: 85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile_size: u32,
    pub overlap: u32,
}

impl TilingConfig {
    /// Step between tile origins. Falls back to `tile_size` (no overlap) when
    /// `overlap` is not below `tile_size`, and is never zero.
    pub fn stride(&self) -> u32 {
        self.tile_size
            .checked_sub(self.overlap)
            .filter(|s| *s > 0)
            .unwrap_or(self.tile_size)
            .max(1)
    }
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_size: 900,
            overlap: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of annotation calls in flight
    pub batch_size: usize,
    /// JPEG quality of the tile crops sent for annotation
    pub jpeg_quality: u8,
    /// Upper end of the normalized coordinate space used by the service
    pub coordinate_range: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            jpeg_quality: 80,
            coordinate_range: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Detections overlapping an accepted one by more than this IoU are dropped
    pub iou_threshold: f64,
    /// Vertical distance under which two detections share a reading row
    pub row_tolerance: f64,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            row_tolerance: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    /// Falls back to the `GEMINI_API_KEY` environment variable
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub thinking_budget: u32,
    /// Language the titles and descriptions are written in
    pub language: String,
}

impl GeminiConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-3-pro-preview".to_string(),
            api_key: None,
            timeout_secs: 300,
            thinking_budget: 2048,
            language: "English".to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Load from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: AnalysisConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.cell_size == 0 {
            return Err(invalid("detection.cell_size", "must be positive"));
        }
        if self.detection.sample_stride == 0 {
            return Err(invalid("detection.sample_stride", "must be positive"));
        }
        if self.detection.macro_sensitivity > 100 || self.detection.micro_sensitivity > 100 {
            return Err(invalid("detection.*_sensitivity", "must be within 0-100"));
        }
        if self.tiling.tile_size == 0 {
            return Err(invalid("tiling.tile_size", "must be positive"));
        }
        if self.tiling.overlap >= self.tiling.tile_size {
            return Err(invalid(
                "tiling.overlap",
                format!("{} must be smaller than tile_size {}", self.tiling.overlap, self.tiling.tile_size),
            ));
        }
        if self.batch.batch_size == 0 {
            return Err(invalid("batch.batch_size", "must be positive"));
        }
        if !(1..=100).contains(&self.batch.jpeg_quality) {
            return Err(invalid("batch.jpeg_quality", "must be within 1-100"));
        }
        if !(self.batch.coordinate_range > 0.0) {
            return Err(invalid("batch.coordinate_range", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.consolidation.iou_threshold) {
            return Err(invalid("consolidation.iou_threshold", "must be within 0-1"));
        }
        if !(self.consolidation.row_tolerance >= 0.0) {
            return Err(invalid("consolidation.row_tolerance", "must not be negative"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
