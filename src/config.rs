// Configuration - load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.
// There are no CLI flags; the config file is the only tuning surface.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
    pub debug: DebugConfig,
}

/// Window settings. The client area is fixed for the process lifetime;
/// there is no resize support.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello Triangle".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// RGBA clear color, 0-1 range. Defaults to RGB(32, 103, 178).
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [32.0 / 255.0, 103.0 / 255.0, 178.0 / 255.0, 1.0],
        }
    }
}

/// Shader source locations, compiled once at initialization.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: String,
    pub fragment: String,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: "shaders/triangle.vert.wgsl".to_string(),
            fragment: "shaders/triangle.frag.wgsl".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Enable Vulkan validation layers (debug builds only).
    pub validation_layers: bool,
    /// Emit debug symbols into the compiled SPIR-V.
    pub shader_debug_info: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            shader_debug_info: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_window() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
    }

    #[test]
    fn default_clear_color_is_rgb_32_103_178() {
        let [r, g, b, a] = Config::default().graphics.clear_color;
        assert!((r - 32.0 / 255.0).abs() < f32::EPSILON);
        assert!((g - 103.0 / 255.0).abs() < f32::EPSILON);
        assert!((b - 178.0 / 255.0).abs() < f32::EPSILON);
        assert_eq!(a, 1.0);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            title = "custom"

            [debug]
            shader_debug_info = false
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "custom");
        assert_eq!(config.window.width, 1280);
        assert!(!config.debug.shader_debug_info);
        assert!(config.debug.validation_layers);
        assert_eq!(config.shaders.vertex, "shaders/triangle.vert.wgsl");
    }
}
