// Vertex data and its GPU-resident buffer.
//
// The triangle is write-once: three vertices uploaded at initialization,
// never touched again.

use anyhow::Result;
use ash::vk;
use std::sync::Arc;

use super::GraphicsDevice;
use crate::error::RenderError;

/// One vertex record: position then color, tightly packed.
///
/// The input layout in `ShaderProgram` is derived from these constants;
/// a mismatch between them and the shader's declared inputs is a fatal
/// initialization error.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    /// Per-vertex byte stride: 3 + 4 f32 fields, no padding.
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;
    pub const POSITION_OFFSET: u32 = std::mem::offset_of!(Vertex, position) as u32;
    pub const COLOR_OFFSET: u32 = std::mem::offset_of!(Vertex, color) as u32;

    /// Single per-vertex binding at slot 0.
    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(Self::STRIDE)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build()
    }

    /// POSITION at location 0, COLOR at location 1.
    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 2] {
        let position = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(Self::POSITION_OFFSET)
            .build();

        let color = vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(1)
            .format(vk::Format::R32G32B32A32_SFLOAT)
            .offset(Self::COLOR_OFFSET)
            .build();

        [position, color]
    }
}

/// The one and only piece of geometry: three vertices with independent
/// colors for interpolation. Vulkan clip space has y pointing down, so the
/// two `y = -0.5` vertices are the top edge.
pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
];

/// Host-visible vertex buffer holding the triangle.
pub struct GeometryBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    vertex_count: u32,
    device: Arc<GraphicsDevice>,
}

impl GeometryBuffer {
    /// Create the GPU buffer sized to exactly `vertices.len() * size_of::<Vertex>()`
    /// and copy the vertex array into it once. No partial updates exist.
    pub fn upload(device: Arc<GraphicsDevice>, vertices: &[Vertex]) -> Result<Self> {
        let size = (std::mem::size_of::<Vertex>() * vertices.len()) as vk::DeviceSize;
        log::info!("Uploading vertex buffer: {} vertices, {} bytes", vertices.len(), size);

        let (buffer, memory) = create_buffer(
            &device,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;

        // One-time copy; the buffer is immutable from here on.
        unsafe {
            let ptr = device
                .device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                .map_err(|e| RenderError::ResourceCreation(format!("map vertex memory: {e}")))?
                as *mut Vertex;

            ptr.copy_from_nonoverlapping(vertices.as_ptr(), vertices.len());
            device.device.unmap_memory(memory);
        }

        Ok(Self {
            buffer,
            memory,
            vertex_count: vertices.len() as u32,
            device,
        })
    }

    /// Record the vertex-buffer bind: slot 0, zero offset. The stride is
    /// fixed in the pipeline's binding description.
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.device
                .device
                .cmd_bind_vertex_buffers(cmd, 0, &[self.buffer], &[0]);
        }
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }
}

impl Drop for GeometryBuffer {
    fn drop(&mut self) {
        log::debug!("Releasing vertex buffer");
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Create a GPU buffer with the given usage and memory properties.
fn create_buffer(
    device: &GraphicsDevice,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe {
        device
            .device
            .create_buffer(&buffer_info, None)
            .map_err(|e| RenderError::ResourceCreation(format!("vertex buffer: {e}")))?
    };

    let mem_requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

    let memory_type_index = match find_memory_type(
        device,
        mem_requirements.memory_type_bits,
        memory_properties,
    ) {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(mem_requirements.size)
        .memory_type_index(memory_type_index);

    let buffer_memory = unsafe {
        match device.device.allocate_memory(&alloc_info, None) {
            Ok(memory) => memory,
            Err(e) => {
                device.device.destroy_buffer(buffer, None);
                return Err(
                    RenderError::ResourceCreation(format!("vertex buffer memory: {e}")).into(),
                );
            }
        }
    };

    unsafe {
        if let Err(e) = device.device.bind_buffer_memory(buffer, buffer_memory, 0) {
            device.device.destroy_buffer(buffer, None);
            device.device.free_memory(buffer_memory, None);
            return Err(RenderError::ResourceCreation(format!("bind buffer memory: {e}")).into());
        }
    }

    Ok((buffer, buffer_memory))
}

/// Find a memory type matching the filter and property flags.
fn find_memory_type(
    device: &GraphicsDevice,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let mem_properties = &device.memory_properties;

    for i in 0..mem_properties.memory_type_count {
        let has_type = (type_filter & (1 << i)) != 0;
        let has_properties = mem_properties.memory_types[i as usize]
            .property_flags
            .contains(properties);

        if has_type && has_properties {
            return Ok(i);
        }
    }

    Err(RenderError::ResourceCreation("no suitable memory type for vertex buffer".into()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 28);
        assert_eq!(Vertex::STRIDE, 28);
    }

    #[test]
    fn field_offsets_match_input_layout() {
        assert_eq!(Vertex::POSITION_OFFSET, 0);
        assert_eq!(Vertex::COLOR_OFFSET, 12);
    }

    #[test]
    fn attribute_descriptions_mirror_vertex_layout() {
        let [position, color] = Vertex::attribute_descriptions();

        assert_eq!(position.location, 0);
        assert_eq!(position.offset, 0);
        assert_eq!(position.format, vk::Format::R32G32B32_SFLOAT);

        assert_eq!(color.location, 1);
        assert_eq!(color.offset, 12);
        assert_eq!(color.format, vk::Format::R32G32B32A32_SFLOAT);

        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 28);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn triangle_has_three_distinctly_colored_vertices() {
        assert_eq!(TRIANGLE.len(), 3);
        assert_ne!(TRIANGLE[0].color, TRIANGLE[1].color);
        assert_ne!(TRIANGLE[1].color, TRIANGLE[2].color);
        assert_ne!(TRIANGLE[0].color, TRIANGLE[2].color);
    }
}
