//! Engine configuration
//!
//! The host supplies an [`EngineConfig`] before initialization begins, either
//! constructed in code or deserialized from a TOML file. Validation mirrors
//! the checks the embedding layer is expected to perform: a non-empty
//! application name, a positive screen resolution, and a positive FPS cap.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configuration value violates its contract
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Application version reported to the graphics API
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AppVersion {
    /// Major version component
    pub major: u32,
    /// Minor version component
    pub minor: u32,
    /// Patch version component
    pub patch: u32,
}

/// Locations of the pre-compiled SPIR-V shader blobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex_shader_path: "shaders/vert.spv".to_string(),
            fragment_shader_path: "shaders/frag.spv".to_string(),
        }
    }
}

/// Configuration supplied by the host before initialization begins
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Enable validation layers and verbose device logging
    pub debug: bool,
    /// Application name passed to the graphics API and suitable for a window
    /// title
    pub application_name: String,
    /// Application version passed to the graphics API
    pub application_version: AppVersion,
    /// Presentation surface width in pixels
    pub screen_width: u32,
    /// Presentation surface height in pixels
    pub screen_height: u32,
    /// Target maximum frames per second; converted internally to a minimum
    /// per-frame duration in milliseconds
    pub max_fps: u32,
    /// Shader blob locations
    pub shaders: ShaderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug: false,
            application_name: "kestrel application".to_string(),
            application_version: AppVersion::default(),
            screen_width: 800,
            screen_height: 600,
            max_fps: 60,
            shaders: ShaderConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check every configuration value against its contract
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid(
                "application_name must not be empty".to_string(),
            ));
        }
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(ConfigError::Invalid(format!(
                "screen resolution must be positive, got {}x{}",
                self.screen_width, self.screen_height
            )));
        }
        if self.max_fps == 0 {
            return Err(ConfigError::Invalid(
                "max_fps must be an integer bigger than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn parses_a_complete_toml_document() {
        let config = EngineConfig::from_toml_str(
            r#"
            debug = true
            application_name = "demo"
            screen_width = 1280
            screen_height = 720
            max_fps = 144

            [application_version]
            major = 1
            minor = 2
            patch = 3

            [shaders]
            vertex_shader_path = "data/vert.spv"
            fragment_shader_path = "data/frag.spv"
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.application_name, "demo");
        assert_eq!(config.screen_width, 1280);
        assert_eq!(config.screen_height, 720);
        assert_eq!(config.max_fps, 144);
        assert_eq!(config.application_version.minor, 2);
        assert_eq!(config.shaders.vertex_shader_path, "data/vert.spv");
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let config = EngineConfig::from_toml_str("application_name = \"demo\"").unwrap();
        assert_eq!(config.screen_width, 800);
        assert_eq!(config.max_fps, 60);
        assert!(!config.debug);
    }

    #[test]
    fn zero_resolution_is_rejected() {
        let result = EngineConfig::from_toml_str("screen_width = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_fps_cap_is_rejected() {
        let result = EngineConfig::from_toml_str("max_fps = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_application_name_is_rejected() {
        let result = EngineConfig::from_toml_str("application_name = \"\"");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let result = EngineConfig::from_toml_str("max_fps = \"not a number\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
