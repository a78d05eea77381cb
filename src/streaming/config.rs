//! Streaming configuration, loaded from and saved to JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::core::types::ALL_LAYERS;

use super::quality::QualityConfig;

/// Which built-in spatial index backs admission queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialStrategy {
    /// Distance-filter every candidate
    #[default]
    BruteForce,
    /// Per-axis sorted extent lists
    SortedAxis,
}

/// Configuration for the streaming engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Admission radius R0 in meters
    pub stream_radius: f32,
    /// Extra distance beyond R0 before eviction (R1 = R0 + buffer)
    pub hysteresis_buffer: f32,
    /// Layers considered by spatial queries
    pub layer_mask: u32,
    /// Seconds between movement batches (independent of frame rate)
    pub movement_send_interval: f32,
    /// Seconds between admissibility re-validation passes
    pub revalidate_interval: f32,
    /// New hierarchies started per session per tick; the rest wait
    pub max_starts_per_tick: usize,
    pub spatial_strategy: SpatialStrategy,
    pub quality: QualityConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            stream_radius: 15.0,
            hysteresis_buffer: 5.0,
            layer_mask: ALL_LAYERS,
            movement_send_interval: 1.0 / 30.0,
            revalidate_interval: 1.0,
            max_starts_per_tick: 64,
            spatial_strategy: SpatialStrategy::BruteForce,
            quality: QualityConfig::default(),
        }
    }
}

impl StreamingConfig {
    /// Outer (eviction) radius R1.
    pub fn outer_radius(&self) -> f32 {
        self.stream_radius + self.hysteresis_buffer
    }

    /// Check invariants: R1 >= R0 >= 0, positive intervals, a usable tier table.
    pub fn validate(&self) -> Result<()> {
        if !(self.stream_radius >= 0.0) {
            return Err(Error::Config(format!("stream_radius must be >= 0, got {}", self.stream_radius)));
        }
        if !(self.hysteresis_buffer >= 0.0) {
            return Err(Error::Config(format!(
                "hysteresis_buffer must be >= 0, got {}",
                self.hysteresis_buffer
            )));
        }
        if !(self.movement_send_interval > 0.0) {
            return Err(Error::Config("movement_send_interval must be > 0".into()));
        }
        if !(self.revalidate_interval >= self.movement_send_interval) {
            return Err(Error::Config(
                "revalidate_interval must not be shorter than movement_send_interval".into(),
            ));
        }
        if self.max_starts_per_tick == 0 {
            return Err(Error::Config("max_starts_per_tick must be > 0".into()));
        }
        self.quality.validate().map_err(Error::Config)
    }

    /// Load and validate from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: StreamingConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = StreamingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.outer_radius(), 20.0);
    }

    #[test]
    fn test_rejects_negative_radius() {
        let config = StreamingConfig {
            stream_radius: -1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_nan_buffer() {
        let config = StreamingConfig {
            hysteresis_buffer: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_revalidation_faster_than_movement() {
        let config = StreamingConfig {
            movement_send_interval: 0.5,
            revalidate_interval: 0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg").join("streaming.json");
        let config = StreamingConfig {
            stream_radius: 30.0,
            spatial_strategy: SpatialStrategy::SortedAxis,
            ..Default::default()
        };

        config.save(&path).unwrap();
        let loaded = StreamingConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{ "stream_radius": 8.0, "hysteresis_buffer": 2.0 }"#).unwrap();

        let loaded = StreamingConfig::load(&path).unwrap();
        assert_eq!(loaded.stream_radius, 8.0);
        assert_eq!(loaded.outer_radius(), 10.0);
        assert_eq!(loaded.max_starts_per_tick, StreamingConfig::default().max_starts_per_tick);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "stream_radius": -5.0 }"#).unwrap();
        assert!(matches!(StreamingConfig::load(&path), Err(Error::Config(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(StreamingConfig::load(&path), Err(Error::Json(_))));
    }
}
