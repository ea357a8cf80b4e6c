//! Two textured quads
//!
//! Opens a window, uploads the quad scene and draws until the window is closed. Settings come
//! from `quad_app.toml` (or `.ron`) in the working directory when present.

use vk_engine::prelude::*;

const CONFIG_PATH: &str = "quad_app.toml";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    vk_engine::foundation::logging::init_with_default("info");

    let config = EngineConfig::load_or_default(CONFIG_PATH)?;
    config.validate()?;

    let init_timer = Stopwatch::start_new();
    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let mut renderer = Renderer::new(&mut window, &config, &QuadScene::default())?;
    log::info!("Initialized in {} ms", init_timer.elapsed().as_millis());

    while !window.should_close() {
        if window.is_minimized() {
            window.wait_events();
            continue;
        }
        if window.take_resized() {
            renderer.handle_resize(window.framebuffer_extent());
        }

        renderer.draw()?;
        window.poll_events();
    }

    renderer.wait_idle()?;
    log::info!(
        "Closed after {} frames and {} swapchain rebuilds",
        renderer.frame_count(),
        renderer.rebuild_count()
    );
    Ok(())
}
