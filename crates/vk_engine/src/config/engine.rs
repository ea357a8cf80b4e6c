//! # Engine Configuration
//!
//! Window, shader, texture and frame pacing settings consumed by [`crate::render::Renderer`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Config, ConfigError};

/// Shader binary locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), String> {
        if !Path::new(&self.vertex_shader_path).exists() {
            return Err(format!("Vertex shader not found: {}", self.vertex_shader_path));
        }
        if !Path::new(&self.fragment_shader_path).exists() {
            return Err(format!("Fragment shader not found: {}", self.fragment_shader_path));
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new("target/shaders/quad.vert.spv", "target/shaders/quad.frag.spv")
    }
}

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "window".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// How the frame loop keeps GPU work to a single frame in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FramePacing {
    /// Wait for the graphics queue to go idle before every frame
    #[default]
    QueueIdle,
    /// Wait on the previous frame's submission fence
    Fence,
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Frame pacing strategy
    pub frame_pacing: FramePacing,
    /// Texture bound to the fragment stage
    pub texture_path: String,
    /// Window settings
    pub window: WindowConfig,
    /// Shader settings
    pub shaders: ShaderConfig,
}

impl EngineConfig {
    /// Create a new configuration with defaults for everything but the name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            enable_validation: None,
            frame_pacing: FramePacing::default(),
            texture_path: "resources/texture.png".to_string(),
            window: WindowConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }

    /// Set application version
    #[must_use]
    pub const fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set window title and size
    #[must_use]
    pub fn with_window(mut self, title: impl Into<String>, width: u32, height: u32) -> Self {
        self.window = WindowConfig {
            title: title.into(),
            width,
            height,
        };
        self
    }

    /// Set custom shader configuration
    #[must_use]
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set the texture source
    #[must_use]
    pub fn with_texture(mut self, path: impl Into<String>) -> Self {
        self.texture_path = path.into();
        self
    }

    /// Set frame pacing
    #[must_use]
    pub const fn with_frame_pacing(mut self, pacing: FramePacing) -> Self {
        self.frame_pacing = pacing;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Vulkan-packed application version
    pub const fn packed_version(&self) -> u32 {
        let (major, minor, patch) = self.application_version;
        ash::vk::make_api_version(0, major, minor, patch)
    }

    /// Check values that serde accepts but the renderer cannot use
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }
        self.shaders.validate().map_err(ConfigError::Invalid)?;
        if !Path::new(&self.texture_path).exists() {
            return Err(ConfigError::Invalid(format!("Texture not found: {}", self.texture_path)));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("vk_engine application")
    }
}

impl Config for EngineConfig {}
