//! Buffer management
//!
//! One [`Buffer`] type covers every usage; a [`BufferKind`] supplies the usage and memory
//! property flags for the common cases. A buffer is created, then allocated (memory found,
//! allocated and bound at offset 0). Dropping frees the memory before destroying the handle.

use ash::{vk, Device};

use super::commands::ActiveRenderPass;
use super::memory::find_memory_type;
use super::transfer::TransferEngine;
use super::{VulkanError, VulkanResult};
use crate::foundation::logging::targets;

/// Usage/memory presets for buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Device-local vertex data, filled by a transfer
    Vertex,
    /// Device-local 32-bit indices, filled by a transfer
    Index,
    /// Host-visible source for transfers
    Staging,
    /// Host-visible uniform data, written through a mapping
    Uniform,
}

impl BufferKind {
    /// Buffer usage flags
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            Self::Staging => vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    /// Memory property flags
    pub fn memory_properties(self) -> vk::MemoryPropertyFlags {
        match self {
            Self::Vertex | Self::Index => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            Self::Staging | Self::Uniform => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }
}

/// Size of one index in an index buffer
pub const INDEX_SIZE: vk::DeviceSize = std::mem::size_of::<u32>() as vk::DeviceSize;

/// Number of whole elements in `total_size` bytes
pub const fn element_count(total_size: vk::DeviceSize, element_stride: vk::DeviceSize) -> vk::DeviceSize {
    if element_stride == 0 {
        0
    } else {
        total_size / element_stride
    }
}

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    total_size: vk::DeviceSize,
    element_stride: vk::DeviceSize,
}

impl Buffer {
    /// Create the buffer handle; no memory is bound yet
    pub fn create(device: Device, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        if size == 0 {
            return Err(VulkanError::InvalidOperation {
                reason: "Buffer size must be non-zero".to_string(),
            });
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None).map_err(VulkanError::Api)? };

        Ok(Self {
            device,
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            usage,
            memory_flags: vk::MemoryPropertyFlags::empty(),
            total_size: 0,
            element_stride: 0,
        })
    }

    /// Find a memory type, allocate and bind at offset 0
    pub fn allocate(
        &mut self,
        memory_properties: &vk::PhysicalDeviceMemoryProperties,
        flags: vk::MemoryPropertyFlags,
    ) -> VulkanResult<()> {
        if self.is_allocated() {
            return Err(VulkanError::InvalidOperation {
                reason: "Buffer memory is already allocated".to_string(),
            });
        }

        let requirements = unsafe { self.device.get_buffer_memory_requirements(self.buffer) };
        let memory_type_index = find_memory_type(memory_properties, requirements.memory_type_bits, flags)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe { self.device.allocate_memory(&alloc_info, None).map_err(VulkanError::Api)? };

        if let Err(e) = unsafe { self.device.bind_buffer_memory(self.buffer, memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(VulkanError::Api(e));
        }

        log::trace!(
            target: targets::ALLOCATOR,
            "Bound {} bytes of memory type {} to buffer {:?}",
            requirements.size,
            memory_type_index,
            self.buffer
        );

        self.memory = memory;
        self.memory_flags = flags;
        Ok(())
    }

    /// Release the bound memory, keeping the handle
    pub fn deallocate(&mut self) {
        if self.is_allocated() {
            unsafe { self.device.free_memory(self.memory, None) };
            self.memory = vk::DeviceMemory::null();
            self.total_size = 0;
            self.element_stride = 0;
        }
    }

    /// Deallocate, destroy and recreate with the same size, usage and memory flags
    ///
    /// Must not be called while queued commands still reference this buffer.
    pub fn reset(&mut self, memory_properties: &vk::PhysicalDeviceMemoryProperties) -> VulkanResult<()> {
        let flags = self.memory_flags;
        let was_allocated = self.is_allocated();

        self.deallocate();
        let replacement = Self::create(self.device.clone(), self.size, self.usage)?;
        // The old handle is destroyed by dropping the swapped-out value.
        drop(std::mem::replace(self, replacement));

        if was_allocated {
            self.allocate(memory_properties, flags)?;
        }
        Ok(())
    }

    /// Copy bytes to the start of a host-visible buffer
    pub fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        self.check_host_access(bytes.len() as vk::DeviceSize)?;

        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Copy plain-old-data values to the start of a host-visible buffer
    pub fn write<T: bytemuck::Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    /// Read the whole buffer back through a mapping
    pub fn read_bytes(&self) -> VulkanResult<Vec<u8>> {
        self.check_host_access(self.size)?;

        let mut out = vec![0u8; self.size as usize];
        unsafe {
            let ptr = self
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), out.len());
            self.device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    fn check_host_access(&self, len: vk::DeviceSize) -> VulkanResult<()> {
        if !self.is_allocated() {
            return Err(VulkanError::InvalidOperation {
                reason: "Buffer has no memory bound".to_string(),
            });
        }
        if !self.memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            return Err(VulkanError::InvalidOperation {
                reason: "Buffer memory is not host visible".to_string(),
            });
        }
        if len > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("{len} bytes do not fit in a {} byte buffer", self.size),
            });
        }
        Ok(())
    }

    /// Record the logical contents after a completed write or transfer
    pub(crate) fn set_contents(&mut self, total_size: vk::DeviceSize, element_stride: vk::DeviceSize) {
        self.total_size = total_size;
        self.element_stride = element_stride;
    }

    /// Get buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub const fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Memory property flags of the bound memory
    pub const fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.memory_flags
    }

    /// Whether memory is bound
    pub fn is_allocated(&self) -> bool {
        self.memory != vk::DeviceMemory::null()
    }

    /// Bytes of meaningful content
    pub const fn total_size(&self) -> vk::DeviceSize {
        self.total_size
    }

    /// Size of one element (vertex or index)
    pub const fn element_stride(&self) -> vk::DeviceSize {
        self.element_stride
    }

    /// Number of elements held
    pub const fn element_count(&self) -> vk::DeviceSize {
        element_count(self.total_size, self.element_stride)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.is_allocated() {
                self.device.free_memory(self.memory, None);
            }
            self.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Creates buffers against one device's memory table
#[derive(Clone)]
pub struct ResourceAllocator {
    device: Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl ResourceAllocator {
    /// Allocator for a device
    pub const fn new(device: Device, memory_properties: vk::PhysicalDeviceMemoryProperties) -> Self {
        Self {
            device,
            memory_properties,
        }
    }

    /// Create and allocate a buffer of the given kind
    pub fn create_buffer(&self, size: vk::DeviceSize, kind: BufferKind) -> VulkanResult<Buffer> {
        let mut buffer = Buffer::create(self.device.clone(), size, kind.usage())?;
        buffer.allocate(&self.memory_properties, kind.memory_properties())?;
        Ok(buffer)
    }

    /// Memory heaps and types of the device
    pub const fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Logical device
    pub const fn device(&self) -> &Device {
        &self.device
    }
}

/// Stage vertex bytes into a new device-local vertex buffer
pub fn upload_vertices(
    allocator: &ResourceAllocator,
    transfer: &TransferEngine,
    bytes: &[u8],
    vertex_size: vk::DeviceSize,
) -> VulkanResult<Buffer> {
    if vertex_size == 0 || bytes.len() as vk::DeviceSize % vertex_size != 0 {
        return Err(VulkanError::InvalidOperation {
            reason: format!("{} bytes is not a whole number of {vertex_size}-byte vertices", bytes.len()),
        });
    }
    let mut buffer = allocator.create_buffer(bytes.len() as vk::DeviceSize, BufferKind::Vertex)?;
    transfer.stage_to_buffer(allocator, bytes, &mut buffer, vertex_size)?;
    Ok(buffer)
}

/// Stage 32-bit indices into a new device-local index buffer
pub fn upload_indices(
    allocator: &ResourceAllocator,
    transfer: &TransferEngine,
    indices: &[u32],
) -> VulkanResult<Buffer> {
    let bytes: &[u8] = bytemuck::cast_slice(indices);
    let mut buffer = allocator.create_buffer(bytes.len() as vk::DeviceSize, BufferKind::Index)?;
    transfer.stage_to_buffer(allocator, bytes, &mut buffer, INDEX_SIZE)?;
    Ok(buffer)
}

/// Create a uniform buffer holding `value`
pub fn create_uniform<T: bytemuck::Pod>(allocator: &ResourceAllocator, value: &T) -> VulkanResult<Buffer> {
    let size = std::mem::size_of::<T>() as vk::DeviceSize;
    let mut buffer = allocator.create_buffer(size, BufferKind::Uniform)?;
    write_uniform(&mut buffer, value)?;
    Ok(buffer)
}

/// Overwrite a uniform buffer's contents
pub fn write_uniform<T: bytemuck::Pod>(buffer: &mut Buffer, value: &T) -> VulkanResult<()> {
    buffer.write(std::slice::from_ref(value))?;
    let size = std::mem::size_of::<T>() as vk::DeviceSize;
    buffer.set_contents(size, size);
    Ok(())
}

/// Bind a vertex buffer at binding 0
pub fn bind_vertex_buffer(pass: &mut ActiveRenderPass<'_>, buffer: &Buffer) -> VulkanResult<()> {
    if !buffer.usage().contains(vk::BufferUsageFlags::VERTEX_BUFFER) {
        return Err(VulkanError::InvalidOperation {
            reason: "Buffer was not created for vertex input".to_string(),
        });
    }
    pass.cmd_bind_vertex_buffers(0, &[buffer.handle()], &[0]);
    Ok(())
}

/// Bind an index buffer of 32-bit indices
pub fn bind_index_buffer(pass: &mut ActiveRenderPass<'_>, buffer: &Buffer) -> VulkanResult<()> {
    if !buffer.usage().contains(vk::BufferUsageFlags::INDEX_BUFFER) {
        return Err(VulkanError::InvalidOperation {
            reason: "Buffer was not created for index input".to_string(),
        });
    }
    pass.cmd_bind_index_buffer(buffer.handle(), 0, vk::IndexType::UINT32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_count_uses_integer_division() {
        assert_eq!(element_count(60, 20), 3);
        assert_eq!(element_count(59, 20), 2);
        assert_eq!(element_count(60, 0), 0);
    }

    #[test]
    fn test_index_count() {
        assert_eq!(element_count(12 * INDEX_SIZE, INDEX_SIZE), 12);
    }

    #[test]
    fn test_device_local_kinds_accept_transfers() {
        for kind in [BufferKind::Vertex, BufferKind::Index] {
            assert!(kind.usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert_eq!(kind.memory_properties(), vk::MemoryPropertyFlags::DEVICE_LOCAL);
        }
        assert!(BufferKind::Vertex.usage().contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(BufferKind::Index.usage().contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    fn test_host_kinds_are_coherent() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(BufferKind::Staging.memory_properties(), host);
        assert_eq!(BufferKind::Uniform.memory_properties(), host);
        assert!(BufferKind::Staging.usage().contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert_eq!(BufferKind::Uniform.usage(), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }
}
