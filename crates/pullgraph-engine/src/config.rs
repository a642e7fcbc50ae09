//! Engine configuration stored as RON.

use pullgraph_core::{Format, FormatError, Frames, PcmFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stream format and slice size the engine renders with
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: f64,
    pub channel_count: u32,
    pub pcm_format: PcmFormat,
    pub interleaved: bool,
    /// Frames rendered per offline slice
    pub frames_per_slice: Frames,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            channel_count: 2,
            pcm_format: PcmFormat::Float32,
            interleaved: false,
            frames_per_slice: 512,
        }
    }
}

impl EngineConfig {
    /// The render format described by this configuration
    pub fn format(&self) -> Result<Format, ConfigError> {
        Ok(Format::new(
            self.sample_rate,
            self.channel_count,
            self.pcm_format,
            self.interleaved,
        )?)
    }

    /// Check every field
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.format()?;
        if self.frames_per_slice == 0 {
            return Err(ConfigError::InvalidFramesPerSlice);
        }
        Ok(())
    }

    /// Save configuration to a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be written or serialization fails
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))?;

        std::fs::write(path.as_ref(), ron_string)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Load and validate configuration from a RON file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read, deserialization fails or a
    /// field is out of range
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let ron_string = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Self = ron::from_str(&ron_string)
            .map_err(|e| ConfigError::DeserializationFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }
}

/// Errors that can occur loading or saving a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(#[from] FormatError),

    #[error("Frames per slice must be greater than zero")]
    InvalidFramesPerSlice,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format() {
        let format = EngineConfig::default().format().unwrap();
        assert_eq!(format, Format::standard(48000.0, 2).unwrap());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");

        let config = EngineConfig {
            sample_rate: 44100.0,
            channel_count: 1,
            pcm_format: PcmFormat::Int16,
            interleaved: true,
            frames_per_slice: 256,
        };
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(loaded.format().unwrap().is_interleaved());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");

        let config = EngineConfig {
            channel_count: 0,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::InvalidFormat(FormatError::InvalidChannelCount))
        ));

        let config = EngineConfig {
            frames_per_slice: 0,
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::InvalidFramesPerSlice)
        ));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EngineConfig::load(dir.path().join("missing.ron")),
            Err(ConfigError::IoError(_))
        ));

        let path = dir.path().join("garbage.ron");
        std::fs::write(&path, "not a config").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::DeserializationFailed(_))
        ));
    }
}
