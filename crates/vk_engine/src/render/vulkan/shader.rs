//! SPIR-V loading and shader modules

use std::io::Cursor;
use std::path::{Path, PathBuf};

use ash::{vk, Device};

use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// Supplies raw SPIR-V bytes by logical path
pub trait ShaderSource {
    /// Read the blob stored under `path`
    fn read(&self, path: &Path) -> VulkanResult<Vec<u8>>;
}

/// Reads shader blobs from the filesystem, relative to a root directory
#[derive(Debug, Clone, Default)]
pub struct FileShaderSource {
    root: PathBuf,
}

impl FileShaderSource {
    /// Resolve paths against `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderSource for FileShaderSource {
    fn read(&self, path: &Path) -> VulkanResult<Vec<u8>> {
        let full_path = self.root.join(path);
        std::fs::read(&full_path)
            .map_err(|e| VulkanError::Asset(format!("Failed to read shader {}: {e}", full_path.display())))
    }
}

/// Decode SPIR-V bytes into words, checking length and magic number
pub fn parse_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| VulkanError::Asset(format!("Malformed SPIR-V: {e}")))
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create shader module from SPIR-V bytecode
    pub fn from_bytes(device: Device, bytes: &[u8]) -> VulkanResult<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.create_shader_module(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, module })
    }

    /// Load a shader through a source
    pub fn load(device: Device, source: &dyn ShaderSource, path: &Path) -> VulkanResult<Self> {
        let bytes = source.read(path)?;
        log::debug!(
            target: targets::PIPELINE,
            "Loaded shader {} ({} bytes)",
            path.display(),
            bytes.len()
        );
        Self::from_bytes(device, &bytes)
    }

    /// Get shader module handle
    pub const fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_parse_valid_words() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: &[u8] = bytemuck::cast_slice(&words);
        assert_eq!(parse_spirv(bytes).unwrap(), words.to_vec());
    }

    #[test]
    fn test_parse_rejects_partial_word() {
        let bytes = [0x03, 0x02, 0x23, 0x07, 0x00];
        assert!(matches!(parse_spirv(&bytes), Err(VulkanError::Asset(_))));
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let words = [0xdead_beef_u32, 0];
        assert!(parse_spirv(bytemuck::cast_slice(&words)).is_err());
    }

    #[test]
    fn test_file_source_reads_relative_to_root() {
        let dir = std::env::temp_dir().join(format!("vk_engine_shader_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("blob.spv"), [1u8, 2, 3, 4]).unwrap();

        let source = FileShaderSource::new(&dir);
        assert_eq!(source.read(Path::new("blob.spv")).unwrap(), vec![1, 2, 3, 4]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_shader_is_asset_error() {
        let source = FileShaderSource::new("does/not/exist");
        assert!(matches!(source.read(Path::new("vert.spv")), Err(VulkanError::Asset(_))));
    }
}
