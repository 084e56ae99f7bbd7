//! Binding contracts and shader modules of the indirect instancing kernels.
//!
//! Each kernel is compiled from `common.wgsl` followed by its own source, so
//! the instance and uniform layouts exist once on the GPU side.

use std::borrow::Cow;

use lumen_core::{
    BindingSlot, BufferHandle, BufferRegistry, FrameUniforms, IndirectBlock, Kernel, KernelLayout,
    Result, wgpu,
};
use tracing::debug;

use crate::instance::InstanceRecord;

const COMMON_WGSL: &str = include_str!("shaders/common.wgsl");

/// Invocations per workgroup of the update kernel.
pub const UPDATE_WORKGROUP_SIZE: u32 = 64;

/// Stride of one triangle vertex, a `vec2<f32>`.
pub const VERTEX_STRIDE: u64 = 8;

/// `update_instances`: advances every staging record in place.
pub const UPDATE_LAYOUT: KernelLayout = KernelLayout {
    label: "update",
    entry_point: "update_instances",
    visibility: wgpu::ShaderStages::COMPUTE,
    slots: &[
        BindingSlot::uniform(0, FrameUniforms::SIZE_BYTES),
        BindingSlot::read_write(1, InstanceRecord::SIZE_BYTES),
    ],
};

/// `compact_instances`: filters staging into the compacted buffer and
/// writes the draw's instance count.
pub const COMPACT_LAYOUT: KernelLayout = KernelLayout {
    label: "compact",
    entry_point: "compact_instances",
    visibility: wgpu::ShaderStages::COMPUTE,
    slots: &[
        BindingSlot::uniform(0, FrameUniforms::SIZE_BYTES),
        BindingSlot::read_only(1, InstanceRecord::SIZE_BYTES),
        BindingSlot::read_write(2, InstanceRecord::SIZE_BYTES),
        BindingSlot::read_write(3, IndirectBlock::SIZE_BYTES),
    ],
};

/// `vs_main`/`fs_main`: draws one triangle per compacted record.
pub const DRAW_LAYOUT: KernelLayout = KernelLayout {
    label: "draw",
    entry_point: "vs_main",
    visibility: wgpu::ShaderStages::VERTEX,
    slots: &[
        BindingSlot::read_only(0, VERTEX_STRIDE),
        BindingSlot::read_only(1, InstanceRecord::SIZE_BYTES),
    ],
};

/// Fragment entry point of the draw kernel.
pub const DRAW_FRAGMENT_ENTRY: &str = "fs_main";

/// Names a kernel of the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// The update kernel.
    Update,
    /// The compaction kernel.
    Compact,
    /// The draw kernel.
    Draw,
}

impl KernelId {
    /// Declared contract of the kernel.
    pub fn layout(self) -> KernelLayout {
        match self {
            Self::Update => UPDATE_LAYOUT,
            Self::Compact => COMPACT_LAYOUT,
            Self::Draw => DRAW_LAYOUT,
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Update => include_str!("shaders/update.wgsl"),
            Self::Compact => include_str!("shaders/compact.wgsl"),
            Self::Draw => include_str!("shaders/draw.wgsl"),
        }
    }

    /// Full WGSL source, shared declarations included.
    pub fn wgsl(self) -> String {
        format!("{COMMON_WGSL}\n{}", self.source())
    }
}

/// A compiled kernel: its module and its bind group layout.
#[derive(Debug)]
pub struct CompiledKernel {
    /// Shader module holding the entry point(s).
    pub module: wgpu::ShaderModule,
    /// Contract and derived bind group layout.
    pub kernel: Kernel,
}

/// Every kernel of the indirect instancing pipeline.
#[derive(Debug)]
pub struct KernelSet {
    update: CompiledKernel,
    compact: CompiledKernel,
    draw: CompiledKernel,
}

impl KernelSet {
    /// Compiles all kernels on `device`.
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            update: compile(device, KernelId::Update),
            compact: compile(device, KernelId::Compact),
            draw: compile(device, KernelId::Draw),
        }
    }

    /// Looks up a compiled kernel.
    pub fn get(&self, id: KernelId) -> &CompiledKernel {
        match id {
            KernelId::Update => &self.update,
            KernelId::Compact => &self.compact,
            KernelId::Draw => &self.draw,
        }
    }

    /// Builds a bind group for `id`, rejecting buffers that break its
    /// contract.
    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        registry: &BufferRegistry,
        id: KernelId,
        bindings: &[(u32, BufferHandle)],
    ) -> Result<wgpu::BindGroup> {
        self.get(id).kernel.bind_group(device, registry, bindings)
    }
}

fn compile(device: &wgpu::Device, id: KernelId) -> CompiledKernel {
    let layout = id.layout();
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(layout.label),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(id.wgsl())),
    });
    debug!(kernel = layout.label, "compiled kernel");
    CompiledKernel {
        module,
        kernel: Kernel::new(device, layout),
    }
}
