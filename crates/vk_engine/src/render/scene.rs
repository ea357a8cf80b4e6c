//! Scene data: vertices, indices and the camera uniform

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Point3, Vector3};

use crate::render::vulkan::vertex_layout::VertexAttribute;

/// Interleaved vertex: position, color, texture coordinates
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Vertex color
    pub color: [f32; 3],
    /// Texture coordinates
    pub uv: [f32; 2],
}

impl Vertex {
    /// Build a vertex
    pub const fn new(position: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, color, uv }
    }

    /// Attribute declarations matching the struct layout, all on binding 0
    pub const ATTRIBUTES: [VertexAttribute; 3] = [
        VertexAttribute::new(0, 0, 3),
        VertexAttribute::new(0, 1, 3),
        VertexAttribute::new(0, 2, 2),
    ];
}

/// Indexed triangle geometry
#[derive(Debug, Clone, PartialEq)]
pub struct QuadScene {
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Triangle list indices into `vertices`
    pub indices: Vec<u32>,
}

impl QuadScene {
    /// Geometry from explicit vertices and indices
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Size of one vertex in bytes
    pub const fn vertex_size() -> vk::DeviceSize {
        std::mem::size_of::<Vertex>() as vk::DeviceSize
    }
}

impl Default for QuadScene {
    /// Two stacked textured quads, half a unit apart in depth
    fn default() -> Self {
        let corners = [
            ([-0.5, -0.5], [1.0, 0.0, 0.0], [0.0, 0.0]),
            ([0.5, -0.5], [0.0, 1.0, 0.0], [1.0, 0.0]),
            ([0.5, 0.5], [0.0, 0.0, 1.0], [1.0, 1.0]),
            ([-0.5, 0.5], [1.0, 1.0, 1.0], [0.0, 1.0]),
        ];
        let vertices = [0.0_f32, -0.5]
            .iter()
            .flat_map(|&z| {
                corners
                    .iter()
                    .map(move |&([x, y], color, uv)| Vertex::new([x, y, z], color, uv))
            })
            .collect();

        Self::new(vertices, vec![0, 1, 2, 2, 3, 0, 4, 5, 6, 6, 7, 4])
    }
}

/// Right-handed perspective projection with depth mapped to `[0, 1]`
pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Matrix4<f32> {
    let tan_half_fovy = (fov_y * 0.5).tan();

    let mut result = Matrix4::zeros();
    result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
    result[(1, 1)] = 1.0 / tan_half_fovy;
    result[(2, 2)] = far / (near - far);
    result[(2, 3)] = -(far * near) / (far - near);
    result[(3, 2)] = -1.0;
    result
}

/// Model, view and projection matrices in column-major order
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Object to world
    pub model: [[f32; 4]; 4],
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip, Y flipped for Vulkan
    pub proj: [[f32; 4]; 4],
}

impl UniformBufferObject {
    /// Camera eye position
    pub const EYE: [f32; 3] = [-0.25, 1.0, 1.0];
    /// Vertical field of view in degrees
    pub const FOV_Y_DEGREES: f32 = 90.0;
    /// Near clip distance
    pub const NEAR: f32 = 0.1;
    /// Far clip distance
    pub const FAR: f32 = 10.0;

    /// Fixed camera looking at the origin with +Z up
    pub fn for_extent(extent: vk::Extent2D) -> Self {
        let [x, y, z] = Self::EYE;
        let view = Matrix4::look_at_rh(&Point3::new(x, y, z), &Point3::origin(), &Vector3::z());

        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let mut proj = perspective(Self::FOV_Y_DEGREES.to_radians(), aspect, Self::NEAR, Self::FAR);
        proj[(1, 1)] *= -1.0;

        Self {
            model: Matrix4::<f32>::identity().into(),
            view: view.into(),
            proj: proj.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vulkan::vertex_layout::VertexLayout;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_default_scene_shape() {
        let scene = QuadScene::default();
        assert_eq!(scene.vertices.len(), 8);
        assert_eq!(scene.indices.len(), 12);
        assert!(scene.indices.iter().all(|&i| (i as usize) < scene.vertices.len()));
        assert_eq!(scene.vertices[4].position, [-0.5, -0.5, -0.5]);
        assert_eq!(scene.vertex_bytes().len(), 8 * 32);
    }

    #[test]
    fn test_attributes_match_struct_layout() {
        let layout = VertexLayout::derive(&Vertex::ATTRIBUTES).unwrap();
        assert_eq!(layout.stride(0), Some(QuadScene::vertex_size() as u32));
        assert_eq!(layout.attributes[1].offset as usize, std::mem::offset_of!(Vertex, color));
        assert_eq!(layout.attributes[2].offset as usize, std::mem::offset_of!(Vertex, uv));
    }

    #[test]
    fn test_projection_depth_range() {
        let proj = perspective(90_f32.to_radians(), 1.0, 0.1, 10.0);

        let near = proj * Vector4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, -10.0, 1.0);

        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-6);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_uniform_for_640x480() {
        let ubo = UniformBufferObject::for_extent(vk::Extent2D { width: 640, height: 480 });
        let proj = Matrix4::from(ubo.proj);

        assert_relative_eq!(proj[(0, 0)], 0.75, epsilon = 1e-5);
        assert_relative_eq!(proj[(1, 1)], -1.0, epsilon = 1e-5);
        assert_eq!(Matrix4::from(ubo.model), Matrix4::identity());
    }

    #[test]
    fn test_view_centers_origin() {
        let ubo = UniformBufferObject::for_extent(vk::Extent2D { width: 640, height: 480 });
        let view = Matrix4::from(ubo.view);

        let origin = view * Vector4::new(0.0, 0.0, 0.0, 1.0);
        let distance = (0.25_f32 * 0.25 + 1.0 + 1.0).sqrt();

        assert_relative_eq!(origin.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(origin.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(origin.z, -distance, epsilon = 1e-5);
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }
}
