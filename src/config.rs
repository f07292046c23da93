// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Backend and harness settings. Every section falls back to defaults, so a
// missing or partial config.toml is fine.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

/// Upper bound on frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
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
            title: "Inferno".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Graphics settings consumed by the Backend
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub vsync: bool,
    /// Explicit present mode; overrides `vsync` when the surface supports it
    pub present_mode: Option<String>,
    pub max_frames_in_flight: usize,
    /// Case-insensitive substring of the GPU name to prefer
    pub preferred_gpu: Option<String>,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            present_mode: None,
            max_frames_in_flight: 2,
            preferred_gpu: None,
            clear_color: [0.1, 0.2, 0.8, 1.0],
        }
    }
}

impl GraphicsConfig {
    /// Requested present mode as Vulkan enum, `None` when unset or unknown
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        let name = self.present_mode.as_deref()?;
        match name.to_lowercase().as_str() {
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            _ => {
                log::warn!("Unknown present mode '{}', ignoring", name);
                None
            }
        }
    }

    /// Frames in flight, clamped to `1..=MAX_FRAMES_IN_FLIGHT`
    pub fn frames_in_flight(&self) -> usize {
        self.max_frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    /// env_logger filter string, e.g. "info" or "inferno=debug,warn"
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "inferno.log".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
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

        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert!(config.graphics.vsync);
        assert_eq!(config.graphics.frames_in_flight(), 2);
        assert_eq!(config.graphics.present_mode(), None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            [graphics]
            vsync = false
            present_mode = "Mailbox"
            preferred_gpu = "radeon"
            "#,
        )
        .unwrap();

        assert!(!config.graphics.vsync);
        assert_eq!(config.graphics.present_mode(), Some(vk::PresentModeKHR::MAILBOX));
        assert_eq!(config.graphics.preferred_gpu.as_deref(), Some("radeon"));
        assert_eq!(config.window.title, "Inferno");
        assert_eq!(config.debug.log_level, "info");
    }

    #[test]
    fn unknown_present_mode_is_ignored() {
        let graphics = GraphicsConfig {
            present_mode: Some("triple".to_string()),
            ..Default::default()
        };
        assert_eq!(graphics.present_mode(), None);
    }

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut graphics = GraphicsConfig::default();
        graphics.max_frames_in_flight = 0;
        assert_eq!(graphics.frames_in_flight(), 1);
        graphics.max_frames_in_flight = 8;
        assert_eq!(graphics.frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window\nwidth = ").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.height, 720);
    }
}
