//! Vertex input descriptions derived from attribute declarations
//!
//! Each attribute is a run of 32-bit floats. Strides and offsets are computed per binding in
//! declaration order.

use ash::vk;

use super::{VulkanError, VulkanResult};

/// Size of one attribute component in bytes
pub const COMPONENT_SIZE: u32 = std::mem::size_of::<f32>() as u32;

/// One declared vertex attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Vertex buffer binding
    pub binding: u32,
    /// Shader input location
    pub location: u32,
    /// Number of 32-bit float components
    pub components: u32,
}

impl VertexAttribute {
    /// Declare an attribute
    pub const fn new(binding: u32, location: u32, components: u32) -> Self {
        Self {
            binding,
            location,
            components,
        }
    }
}

/// Float format for a component count
pub fn format_for_components(components: u32) -> VulkanResult<vk::Format> {
    match components {
        2 => Ok(vk::Format::R32G32_SFLOAT),
        3 => Ok(vk::Format::R32G32B32_SFLOAT),
        4 => Ok(vk::Format::R32G32B32A32_SFLOAT),
        other => Err(VulkanError::UnsupportedVertexFormat { components: other }),
    }
}

/// Binding and attribute descriptions for pipeline creation
#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    /// One entry per distinct binding, in first-seen order
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    /// One entry per attribute, in declaration order
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    /// Derive descriptions from attribute declarations
    pub fn derive(declarations: &[VertexAttribute]) -> VulkanResult<Self> {
        let mut layout = Self::default();

        for decl in declarations {
            let format = format_for_components(decl.components)?;
            let size = decl.components * COMPONENT_SIZE;

            let index = match layout.bindings.iter().position(|b| b.binding == decl.binding) {
                Some(index) => index,
                None => {
                    layout.bindings.push(vk::VertexInputBindingDescription {
                        binding: decl.binding,
                        stride: 0,
                        input_rate: vk::VertexInputRate::VERTEX,
                    });
                    layout.bindings.len() - 1
                }
            };
            let binding = &mut layout.bindings[index];

            // Running stride doubles as the offset of the next attribute.
            layout.attributes.push(vk::VertexInputAttributeDescription {
                location: decl.location,
                binding: decl.binding,
                format,
                offset: binding.stride,
            });
            binding.stride += size;
        }

        Ok(layout)
    }

    /// Stride of a binding, if declared
    pub fn stride(&self, binding: u32) -> Option<u32> {
        self.bindings.iter().find(|b| b.binding == binding).map(|b| b.stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_and_uv() {
        let layout = VertexLayout::derive(&[VertexAttribute::new(0, 0, 3), VertexAttribute::new(0, 1, 2)]).unwrap();

        assert_eq!(layout.bindings.len(), 1);
        assert_eq!(layout.stride(0), Some(20));
        assert_eq!(layout.attributes[0].offset, 0);
        assert_eq!(layout.attributes[1].offset, 12);
        assert_eq!(layout.attributes[0].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(layout.attributes[1].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn test_offsets_follow_declaration_order_not_location() {
        let layout = VertexLayout::derive(&[
            VertexAttribute::new(0, 2, 2),
            VertexAttribute::new(0, 0, 3),
            VertexAttribute::new(0, 1, 3),
        ])
        .unwrap();

        let offsets: Vec<u32> = layout.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 8, 20]);
        assert_eq!(layout.stride(0), Some(32));
    }

    #[test]
    fn test_bindings_accumulate_separately() {
        let layout = VertexLayout::derive(&[
            VertexAttribute::new(1, 0, 4),
            VertexAttribute::new(0, 1, 2),
            VertexAttribute::new(1, 2, 3),
        ])
        .unwrap();

        let order: Vec<u32> = layout.bindings.iter().map(|b| b.binding).collect();
        assert_eq!(order, vec![1, 0]);
        assert_eq!(layout.stride(1), Some(28));
        assert_eq!(layout.stride(0), Some(8));
        assert_eq!(layout.attributes[1].offset, 0);
        assert_eq!(layout.attributes[2].offset, 16);
    }

    #[test]
    fn test_unsupported_component_counts() {
        for components in [0, 1, 5] {
            let result = VertexLayout::derive(&[VertexAttribute::new(0, 0, components)]);
            assert!(matches!(
                result,
                Err(VulkanError::UnsupportedVertexFormat { components: c }) if c == components
            ));
        }
    }

    #[test]
    fn test_quad_vertex_layout() {
        let layout = VertexLayout::derive(&[
            VertexAttribute::new(0, 0, 3),
            VertexAttribute::new(0, 1, 3),
            VertexAttribute::new(0, 2, 2),
        ])
        .unwrap();
        assert_eq!(layout.stride(0), Some(32));
        assert_eq!(layout.attributes[2].offset, 24);
    }
}
