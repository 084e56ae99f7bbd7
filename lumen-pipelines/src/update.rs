//! Update pass: per-frame drift of the staging records.

use lumen_core::{
    BufferHandle, BufferRegistry, ComputablePass, ComputeContext, FramePhase, PassDecl, Result,
    wgpu,
};

use crate::kernels::{KernelId, KernelSet, UPDATE_WORKGROUP_SIZE};

/// Advances every staging record in place.
pub struct UpdatePass {
    pipeline: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    uniforms: BufferHandle,
    staging: BufferHandle,
}

impl UpdatePass {
    /// Builds the pipeline and its bind group. Fails if `uniforms` or
    /// `staging` do not satisfy the update kernel's contract, or if covering
    /// every staging record needs more workgroups than the device allows.
    pub fn new(
        device: &wgpu::Device,
        kernels: &KernelSet,
        registry: &BufferRegistry,
        uniforms: BufferHandle,
        staging: BufferHandle,
        pipeline_cache: Option<&wgpu::PipelineCache>,
    ) -> Result<Self> {
        let compiled = kernels.get(KernelId::Update);
        let bind_group = kernels.bind_group(
            device,
            registry,
            KernelId::Update,
            &[(0, uniforms), (1, staging)],
        )?;
        let layout = compiled.kernel.layout();
        let records = registry.desc(staging)?.capacity();
        layout.check_dispatch(workgroups_for(records), &device.limits())?;
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
            uniforms,
            staging,
        })
    }
}

/// Workgroups needed to cover `records` invocations.
pub fn workgroups_for(records: u64) -> u64 {
    records.div_ceil(u64::from(UPDATE_WORKGROUP_SIZE))
}

impl ComputablePass for UpdatePass {
    fn declare(&self) -> PassDecl {
        PassDecl::compute("update", FramePhase::Updated)
            .reads(self.uniforms)
            .reads_writes(self.staging)
    }

    fn dispatch(&self, context: &mut ComputeContext<'_, '_>) -> Result<()> {
        let workgroups = context
            .uniforms
            .instance_count
            .div_ceil(UPDATE_WORKGROUP_SIZE);
        if workgroups == 0 {
            return Ok(());
        }
        context.compute_pass.set_pipeline(&self.pipeline);
        context.compute_pass.set_bind_group(0, &self.bind_group, &[]);
        context.compute_pass.dispatch_workgroups(workgroups, 1, 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::UPDATE_LAYOUT;

    #[test]
    fn workgroups_cover_every_record() {
        assert_eq!(workgroups_for(0), 0);
        assert_eq!(workgroups_for(1), 1);
        assert_eq!(workgroups_for(64), 1);
        assert_eq!(workgroups_for(65), 2);
    }

    #[test]
    fn staging_larger_than_one_dispatch_is_rejected() {
        let limits = wgpu::Limits::default();
        let max = u64::from(limits.max_compute_workgroups_per_dimension);
        let largest = max * u64::from(UPDATE_WORKGROUP_SIZE);

        assert!(UPDATE_LAYOUT.check_dispatch(workgroups_for(largest), &limits).is_ok());
        assert!(matches!(
            UPDATE_LAYOUT.check_dispatch(workgroups_for(largest + 1), &limits),
            Err(lumen_core::PipelineError::DispatchTooLarge { kernel: "update", .. })
        ));
    }
}
