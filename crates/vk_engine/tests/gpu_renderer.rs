//! Window-backed renderer tests
//!
//! These need a display, a Vulkan driver and compiled shaders under `target/shaders`.
//! Run with `cargo test -- --ignored`.

use vk_engine::prelude::*;

fn workspace_path(relative: &str) -> String {
    format!("{}/../../{relative}", env!("CARGO_MANIFEST_DIR"))
}

fn test_config() -> EngineConfig {
    EngineConfig::new("vk_engine renderer tests")
        .with_validation(false)
        .with_texture(workspace_path("resources/texture.png"))
        .with_shaders(ShaderConfig::new(
            workspace_path("target/shaders/quad.vert.spv"),
            workspace_path("target/shaders/quad.frag.spv"),
        ))
}

fn assert_counts_in_step(renderer: &Renderer) {
    let (images, framebuffers, command_buffers) = renderer.frame_resource_counts();
    assert!(images > 0);
    assert_eq!(images, framebuffers);
    assert_eq!(framebuffers, command_buffers);
    assert_eq!(images, renderer.image_count());
}

#[test]
#[ignore = "requires a display and a Vulkan driver"]
fn rebuild_keeps_frame_resources_in_step() {
    let config = test_config();
    let mut window = Window::new("renderer test", 320, 240).unwrap();
    let mut renderer = Renderer::new(&mut window, &config, &QuadScene::default()).unwrap();
    assert_counts_in_step(&renderer);

    renderer.draw().unwrap();
    window.poll_events();

    renderer.handle_resize(window.framebuffer_extent());
    renderer.draw().unwrap();

    assert!(renderer.rebuild_count() >= 1);
    assert_counts_in_step(&renderer);

    for _ in 0..3 {
        renderer.handle_resize(window.framebuffer_extent());
        renderer.draw().unwrap();
    }
    assert!(renderer.rebuild_count() >= 4);
    assert_counts_in_step(&renderer);

    renderer.wait_idle().unwrap();
}
