// build.rs
// Compiles GLSL shaders under resources/shaders into SPIR-V under target/shaders

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed=../resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let glslc = match env::var("VULKAN_SDK") {
        Ok(sdk) if cfg!(target_os = "windows") => PathBuf::from(sdk).join("Bin").join("glslc.exe"),
        Ok(sdk) => PathBuf::from(sdk).join("bin").join("glslc"),
        Err(_) => {
            println!("cargo:warning=VULKAN_SDK not set, shader compilation skipped");
            return;
        }
    };
    if !glslc.exists() {
        panic!("glslc not found at {}", glslc.display());
    }

    let shader_dir = Path::new("../resources/shaders");
    let target_dir = Path::new("../target/shaders");
    std::fs::create_dir_all(target_dir).expect("failed to create target/shaders");

    let entries = match std::fs::read_dir(shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at {}", shader_dir.display());
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_STAGES.contains(&ext));
        if !is_stage {
            continue;
        }

        let file_name = path.file_name().and_then(|name| name.to_str()).expect("non-UTF-8 shader name");
        let out_file = target_dir.join(format!("{file_name}.spv"));
        let status = Command::new(&glslc)
            .arg(&path)
            .arg("-o")
            .arg(&out_file)
            .status()
            .expect("failed to run glslc");
        assert!(status.success(), "glslc failed for {}", path.display());
        eprintln!("info: Compiled {} -> {}", path.display(), out_file.display());
    }
}
