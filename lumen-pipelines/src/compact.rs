//! Compaction pass: GPU-side visibility filter and instance count.

use lumen_core::{
    BufferHandle, BufferRegistry, ComputablePass, ComputeContext, FramePhase, PassDecl, Result,
    wgpu,
};

use crate::kernels::{KernelId, KernelSet};

/// Buffers the compaction kernel binds.
#[derive(Debug, Clone, Copy)]
pub struct CompactBindings {
    /// Frame uniforms, for the instance count and visibility window.
    pub uniforms: BufferHandle,
    /// All instances, read only.
    pub staging: BufferHandle,
    /// Visible instances, contiguous from index 0.
    pub compacted: BufferHandle,
    /// Indirect block whose instance count and status words are written.
    pub indirect: BufferHandle,
}

/// Filters the staging buffer into the compacted buffer and writes the
/// instance count of the indirect draw.
///
/// One invocation scans the records in order, so the compacted buffer keeps
/// staging order. This is linear in the instance count; large counts would
/// want a parallel prefix sum instead.
pub struct CompactPass {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    bindings: CompactBindings,
}

impl CompactPass {
    /// Builds the pipeline and its bind group.
    pub fn new(
        device: &wgpu::Device,
        kernels: &KernelSet,
        registry: &BufferRegistry,
        bindings: CompactBindings,
        pipeline_cache: Option<&wgpu::PipelineCache>,
    ) -> Result<Self> {
        let compiled = kernels.get(KernelId::Compact);
        let bind_group = kernels.bind_group(
            device,
            registry,
            KernelId::Compact,
            &[
                (0, bindings.uniforms),
                (1, bindings.staging),
                (2, bindings.compacted),
                (3, bindings.indirect),
            ],
        )?;
        let layout = compiled.kernel.layout();
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(layout.label),
            layout: Some(&compiled.kernel.pipeline_layout(device)),
            module: &compiled.module,
            entry_point: Some(layout.entry_point),
            compilation_options: Default::default(),
            cache: pipeline_cache,
        });

        Ok(Self {
            pipeline,
            bind_group,
            bindings,
        })
    }
}

impl ComputablePass for CompactPass {
    fn declare(&self) -> PassDecl {
        PassDecl::compute("compact", FramePhase::Compacted)
            .reads(self.bindings.staging)
            .reads(self.bindings.uniforms)
            .writes(self.bindings.compacted)
            .writes(self.bindings.indirect)
    }

    fn dispatch(&self, context: &mut ComputeContext<'_, '_>) -> Result<()> {
        context.compute_pass.set_pipeline(&self.pipeline);
        context.compute_pass.set_bind_group(0, &self.bind_group, &[]);
        context.compute_pass.dispatch_workgroups(1, 1, 1);
        Ok(())
    }
}
