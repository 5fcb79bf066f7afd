//! Engine tunables.
//!
//! Every constant that shapes loading, motion or frame budgets lives here so a
//! host can override it from a JSON file without recompiling.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MosaicError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of images per pack job; larger requests are sliced.
    pub atlas_batch_size: usize,
    /// On-screen size over loaded size at which a higher resolution is fetched.
    pub load_size_threshold: f32,
    /// Over-fetch multiplier applied to the on-screen size of an upgrade.
    pub load_size_factor: f32,
    /// Edge length requested for images missing from the static atlas.
    pub placeholder_size: u32,
    /// Pan speed, in viewport extents per second.
    pub move_step: f32,
    /// Zoom speed: extents shrink by `zoom_base` per second of zoom-in.
    pub zoom_base: f32,
    /// Smallest world extent the short side of the viewport can zoom in to.
    pub min_extent: f32,
    /// Largest world extent the long side of the viewport can zoom out to.
    pub max_extent: f32,
    pub visible_throttle_ms: u64,
    pub load_throttle_ms: u64,
    /// Sub-image uploads performed per frame while an atlas is being filled.
    pub uploads_per_frame: usize,
    pub timing_threshold_ms: f64,
    pub fit_on_layout_change: bool,
    pub clear_color: [f64; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            atlas_batch_size: 500,
            load_size_threshold: 2.0,
            load_size_factor: 8.0,
            placeholder_size: 20,
            move_step: 1.0,
            zoom_base: 2.0,
            min_extent: 1.0,
            max_extent: 1.0e8,
            visible_throttle_ms: 5,
            load_throttle_ms: 10,
            uploads_per_frame: 64,
            timing_threshold_ms: 1.0,
            fit_on_layout_change: true,
            clear_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(data).map_err(|e| MosaicError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.atlas_batch_size == 0 {
            return Err(MosaicError::Config("atlas_batch_size must be > 0".into()));
        }
        if self.uploads_per_frame == 0 {
            return Err(MosaicError::Config("uploads_per_frame must be > 0".into()));
        }
        if self.zoom_base <= 1.0 {
            return Err(MosaicError::Config("zoom_base must be > 1".into()));
        }
        if !(self.min_extent > 0.0 && self.min_extent < self.max_extent && self.max_extent.is_finite())
        {
            return Err(MosaicError::Config(
                "need 0 < min_extent < max_extent < inf".into(),
            ));
        }
        if self.load_size_threshold <= 0.0 || self.load_size_factor <= 0.0 {
            return Err(MosaicError::Config(
                "load size threshold and factor must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn visible_throttle(&self) -> Duration {
        Duration::from_millis(self.visible_throttle_ms)
    }

    pub fn load_throttle(&self) -> Duration {
        Duration::from_millis(self.load_throttle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "atlas_batch_size": 32 }"#).unwrap();
        assert_eq!(config.atlas_batch_size, 32);
        assert_eq!(config.load_size_factor, 8.0);
        assert_eq!(config.uploads_per_frame, 64);
    }

    #[test]
    fn rejects_zoom_base_below_one() {
        let err = EngineConfig::from_json_str(r#"{ "zoom_base": 0.5 }"#).unwrap_err();
        assert!(matches!(err, MosaicError::Config(_)));
    }

    #[test]
    fn rejects_inverted_zoom_extents() {
        let err = EngineConfig::from_json_str(r#"{ "min_extent": 10.0, "max_extent": 5.0 }"#)
            .unwrap_err();
        assert!(matches!(err, MosaicError::Config(_)));
    }
}
