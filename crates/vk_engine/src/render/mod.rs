//! Rendering
//!
//! [`vulkan`] holds the device object wrappers, [`frame`] the per-frame state machine and
//! [`Renderer`] ties both to a window and a [`scene::QuadScene`].

pub mod frame;
pub mod renderer;
pub mod scene;
pub mod vulkan;

pub use renderer::Renderer;
