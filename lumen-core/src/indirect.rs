//! Binary contract for GPU-authored draw parameters.
//!
//! The render pass never computes its own instance count. It reads a
//! [`DrawIndirectArgs`] record from the start of an [`IndirectBlock`] that a
//! compute kernel filled earlier in the same submission. The trailing words of
//! the block carry compaction status for diagnostics and are ignored by the
//! draw call.

use bytemuck::{Pod, Zeroable};

/// Arguments for [`wgpu::RenderPass::draw_indirect`].
///
/// Matches the WebGPU `drawIndirect` layout: four tightly packed `u32`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndirectArgs {
    /// Vertices per instance. Constant, written once at setup.
    pub vertex_count: u32,
    /// Instances to draw. Written every frame by the compaction kernel.
    pub instance_count: u32,
    /// First vertex index. Always zero.
    pub first_vertex: u32,
    /// First instance index. Always zero.
    pub first_instance: u32,
}

impl DrawIndirectArgs {
    /// Size of the record in bytes.
    pub const SIZE_BYTES: u64 = std::mem::size_of::<Self>() as u64;

    /// Word index of `instance_count` inside the record.
    pub const INSTANCE_COUNT_WORD: usize = 1;

    /// View this struct as raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// The full 8-word buffer consumed by the render pass and written by the
/// compaction kernel.
///
/// | word | field            | written by          |
/// |------|------------------|---------------------|
/// | 0    | `vertex_count`   | host, once          |
/// | 1    | `instance_count` | compaction, per frame |
/// | 2    | `first_vertex`   | host, once          |
/// | 3    | `first_instance` | host, once          |
/// | 4    | `visible_total`  | compaction, per frame |
/// | 5    | `capacity`       | host, once          |
/// | 6-7  | reserved         | host, once          |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectBlock {
    /// Draw arguments, at byte offset 0.
    pub draw: DrawIndirectArgs,
    /// Instances that passed the filter before clamping to `capacity`.
    pub visible_total: u32,
    /// Capacity of the compacted instance buffer.
    pub capacity: u32,
    _reserved: [u32; 2],
}

const _: () = assert!(std::mem::size_of::<IndirectBlock>() == 32);
const _: () = assert!(std::mem::offset_of!(IndirectBlock, visible_total) == 16);

impl IndirectBlock {
    /// Size of the block in bytes.
    pub const SIZE_BYTES: u64 = std::mem::size_of::<Self>() as u64;

    /// Byte offset of the draw arguments inside the block.
    pub const DRAW_OFFSET: u64 = 0;

    /// Builds the setup-time contents of the block.
    ///
    /// `instance_count` starts at zero so a draw recorded before the first
    /// compaction renders nothing instead of reading uninitialized records.
    pub fn new(vertex_count: u32, capacity: u32) -> Self {
        Self {
            draw: DrawIndirectArgs {
                vertex_count,
                instance_count: 0,
                first_vertex: 0,
                first_instance: 0,
            },
            visible_total: 0,
            capacity,
            _reserved: [0; 2],
        }
    }

    /// Whether more instances passed the filter than the compacted buffer
    /// could hold.
    pub fn overflowed(&self) -> bool {
        self.visible_total > self.capacity
    }

    /// Instances dropped because of overflow.
    pub fn dropped(&self) -> u32 {
        self.visible_total.saturating_sub(self.capacity)
    }

    /// Reads a block back from raw bytes, e.g. a diagnostic readback.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..Self::SIZE_BYTES as usize)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// View this struct as raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
