//! The full indirect instancing pipeline: update, compact, draw.

use lumen_core::{
    BufferDesc, BufferHandle, BufferRegistry, FrameExecutor, FrameExecutorBuilder, FrameReport,
    FrameUniforms, GpuContext, IndirectBlock, PipelineConfig, PipelineError, Result, wgpu,
};
use tracing::{info, warn};

use crate::{
    compact::{CompactBindings, CompactPass},
    draw::{DrawBindings, DrawPass, TRIANGLE},
    instance::{InstanceRecord, random_instances},
    kernels::{KernelSet, VERTEX_STRIDE},
    update::UpdatePass,
};

/// Handles of every buffer the pipeline allocates.
#[derive(Debug, Clone, Copy)]
pub struct InstancingBuffers {
    /// Triangle vertices.
    pub vertices: BufferHandle,
    /// All instances, advanced in place every frame.
    pub staging: BufferHandle,
    /// Visible instances of the current frame.
    pub compacted: BufferHandle,
    /// Draw arguments and compaction status.
    pub indirect: BufferHandle,
    /// Per-frame uniforms.
    pub uniforms: BufferHandle,
}

/// Records allocated for a buffer that must hold `count` of them. Device
/// buffers cannot be empty, so an empty set still gets one unused slot; the
/// kernels never look past the uniform instance count or the block's
/// capacity word.
fn allocated_records(count: u32) -> u64 {
    u64::from(count.max(1))
}

/// Draws a drifting field of triangles whose visible subset is selected on
/// the GPU every frame.
pub struct IndirectInstancing {
    executor: FrameExecutor,
    buffers: InstancingBuffers,
    instance_count: u32,
    capacity: u32,
}

impl IndirectInstancing {
    /// Builds the pipeline with `config.instance_count` random instances.
    pub fn new(
        gpu: &GpuContext,
        format: wgpu::TextureFormat,
        config: &PipelineConfig,
    ) -> Result<Self> {
        let instances = random_instances(config.instance_count, config.seed);
        Self::with_instances(gpu, format, config, &instances)
    }

    /// Builds the pipeline around caller-supplied initial instances.
    ///
    /// `config.instance_count` is ignored; the staging buffer holds exactly
    /// `instances`. The compacted buffer holds
    /// `config.compacted_capacity`, or `instances.len()` if unset. Either may
    /// be zero, in which case every frame draws nothing.
    #[tracing::instrument(level = "info", skip_all, fields(instances = instances.len()))]
    pub fn with_instances(
        gpu: &GpuContext,
        format: wgpu::TextureFormat,
        config: &PipelineConfig,
        instances: &[InstanceRecord],
    ) -> Result<Self> {
        let device = &gpu.device;
        let queue = &gpu.queue;
        let instance_count = u32::try_from(instances.len()).map_err(|_| {
            PipelineError::InvalidBufferSize {
                buffer: "staging instances",
                reason: format!("{} instances exceed the u32 range", instances.len()),
            }
        })?;
        let capacity = config.compacted_capacity.unwrap_or(instance_count);

        let mut registry = BufferRegistry::new();
        let buffers = InstancingBuffers {
            vertices: registry.allocate(
                device,
                BufferDesc::array(
                    "triangle vertices",
                    VERTEX_STRIDE,
                    TRIANGLE.len() as u64,
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                ),
            )?,
            staging: registry.allocate(
                device,
                BufferDesc::array(
                    "staging instances",
                    InstanceRecord::SIZE_BYTES,
                    allocated_records(instance_count),
                    wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                ),
            )?,
            compacted: registry.allocate(
                device,
                BufferDesc::array(
                    "compacted instances",
                    InstanceRecord::SIZE_BYTES,
                    allocated_records(capacity),
                    wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                ),
            )?,
            indirect: registry.allocate(
                device,
                BufferDesc::single::<IndirectBlock>(
                    "indirect block",
                    wgpu::BufferUsages::INDIRECT
                        | wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_DST
                        | wgpu::BufferUsages::COPY_SRC,
                ),
            )?,
            uniforms: registry.allocate(
                device,
                BufferDesc::single::<FrameUniforms>(
                    "frame uniforms",
                    wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                ),
            )?,
        };

        registry.upload(queue, buffers.vertices, 0, bytemuck::cast_slice(&TRIANGLE))?;
        if !instances.is_empty() {
            registry.upload(queue, buffers.staging, 0, bytemuck::cast_slice(instances))?;
        }
        let block = IndirectBlock::new(TRIANGLE.len() as u32, capacity);
        registry.upload(queue, buffers.indirect, 0, block.as_bytes())?;

        let kernels = KernelSet::new(device);
        let cache = gpu.pipeline_cache.as_ref();
        let update = UpdatePass::new(
            device,
            &kernels,
            &registry,
            buffers.uniforms,
            buffers.staging,
            cache,
        )?;
        let compact = CompactPass::new(
            device,
            &kernels,
            &registry,
            CompactBindings {
                uniforms: buffers.uniforms,
                staging: buffers.staging,
                compacted: buffers.compacted,
                indirect: buffers.indirect,
            },
            cache,
        )?;
        let draw = DrawPass::new(
            device,
            &kernels,
            &registry,
            DrawBindings {
                vertices: buffers.vertices,
                compacted: buffers.compacted,
                indirect: buffers.indirect,
            },
            format,
            cache,
        )?;

        if capacity < instance_count {
            warn!(
                capacity,
                instance_count, "compacted buffer is smaller than staging, frames may overflow"
            );
        }

        let executor = FrameExecutorBuilder::new()
            .compute(update)
            .compute(compact)
            .render(draw)
            .build(
                device,
                queue,
                registry,
                buffers.uniforms,
                FrameUniforms::new(instance_count, config.visibility_window),
                config.clear_color,
            )?;

        info!(instance_count, capacity, ?format, "indirect instancing ready");

        Ok(Self {
            executor,
            buffers,
            instance_count,
            capacity,
        })
    }

    /// Records and submits one frame into `target`.
    pub fn run_frame(
        &mut self,
        elapsed_ms: f64,
        target: &wgpu::TextureView,
    ) -> Result<FrameReport> {
        self.executor.run_frame(elapsed_ms, target)
    }

    /// The executor driving the frames.
    pub fn executor(&self) -> &FrameExecutor {
        &self.executor
    }

    /// Handles of the pipeline's buffers.
    pub fn buffers(&self) -> &InstancingBuffers {
        &self.buffers
    }

    /// Records in the staging buffer.
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Records the compacted buffer can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reads the indirect block back. Blocks until the GPU is idle.
    #[cfg(feature = "diagnostics")]
    pub fn read_indirect(&self) -> Result<IndirectBlock> {
        let bytes = self.read(self.buffers.indirect)?;
        IndirectBlock::from_bytes(&bytes).ok_or(PipelineError::Readback {
            buffer: "indirect block",
            reason: format!("expected {} bytes, got {}", IndirectBlock::SIZE_BYTES, bytes.len()),
        })
    }

    /// Reads the visible records of the last frame back. Blocks until the
    /// GPU is idle.
    #[cfg(feature = "diagnostics")]
    pub fn read_visible(&self) -> Result<Vec<InstanceRecord>> {
        let block = self.read_indirect()?;
        let mut records: Vec<InstanceRecord> =
            bytemuck::pod_collect_to_vec(&self.read(self.buffers.compacted)?);
        records.truncate(block.draw.instance_count as usize);
        Ok(records)
    }

    /// Reads the staging records back. Blocks until the GPU is idle.
    #[cfg(feature = "diagnostics")]
    pub fn read_staging(&self) -> Result<Vec<InstanceRecord>> {
        let mut records: Vec<InstanceRecord> =
            bytemuck::pod_collect_to_vec(&self.read(self.buffers.staging)?);
        records.truncate(self.instance_count as usize);
        Ok(records)
    }

    #[cfg(feature = "diagnostics")]
    fn read(&self, handle: BufferHandle) -> Result<Vec<u8>> {
        lumen_core::readback::read_buffer(
            self.executor.device(),
            self.executor.queue(),
            self.executor.registry(),
            handle,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sets_still_allocate_one_record() {
        assert_eq!(allocated_records(0), 1);
        assert_eq!(allocated_records(1), 1);
        assert_eq!(allocated_records(64), 64);

        let staging = BufferDesc::array(
            "staging instances",
            InstanceRecord::SIZE_BYTES,
            allocated_records(0),
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        );
        assert!(staging.validate().is_ok());
    }
}
