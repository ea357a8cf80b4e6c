//! # vk_engine
//!
//! Vulkan resource lifecycle and frame orchestration.
//!
//! The crate drives a GPU through device selection, memory-backed resource allocation,
//! staged host-to-device transfers, descriptor binding, pipeline (re)compilation and a
//! single-frame-in-flight acquire/submit/present loop.
//!
//! ## Layout
//!
//! - [`render::vulkan`]: owned wrappers over device objects (context, buffers, images,
//!   descriptors, pipeline, swapchain) plus the transfer engine
//! - [`render::frame`]: the draw loop state machine and its recovery protocol
//! - [`render::Renderer`]: wires everything together for a window
//! - [`config`] and [`foundation`]: configuration files, logging and frame timing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vk_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     vk_engine::foundation::logging::init();
//!     let config = EngineConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let mut renderer = Renderer::new(&mut window, &config, &QuadScene::default())?;
//!     while !window.should_close() {
//!         renderer.draw()?;
//!         window.poll_events();
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, EngineConfig, FramePacing, ShaderConfig, WindowConfig},
        foundation::time::{Clock, FpsCounter, Stopwatch, SystemClock},
        render::{
            frame::{FrameOrchestrator, FrameOutcome},
            scene::QuadScene,
            vulkan::{VulkanError, VulkanResult, Window, WindowError},
            Renderer,
        },
    };
}
