//! Logging utilities
//!
//! Components log through the `log` facade under their own target, so the sink (and its
//! filtering) is chosen by whoever installs the logger. Tests run with no sink at all.

pub use log::{debug, error, info, trace, warn};

/// Log targets, one per component
pub mod targets {
    /// Instance, device and queue selection
    pub const CONTEXT: &str = "vk_engine::context";
    /// Buffer and image allocation
    pub const ALLOCATOR: &str = "vk_engine::allocator";
    /// Staged uploads and layout transitions
    pub const TRANSFER: &str = "vk_engine::transfer";
    /// Descriptor set state machine
    pub const DESCRIPTOR: &str = "vk_engine::descriptor";
    /// Render pass, layout and pipeline compilation
    pub const PIPELINE: &str = "vk_engine::pipeline";
    /// Swapchain creation and framebuffers
    pub const SWAPCHAIN: &str = "vk_engine::swapchain";
    /// Draw loop
    pub const FRAME: &str = "vk_engine::frame";
    /// Validation layer messages
    pub const VALIDATION: &str = "vk_engine::validation";
    /// Configuration loading
    pub const CONFIG: &str = "vk_engine::config";
}

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default filter used when `RUST_LOG` is unset
pub fn init_with_default(filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();
}
