//! Render pass: indirect draw of the compacted instances.

use lumen_core::{
    BufferHandle, BufferRegistry, DrawContext, DrawablePass, FramePhase, IndirectBlock, PassDecl,
    Result, wgpu,
};

use crate::kernels::{DRAW_FRAGMENT_ENTRY, KernelId, KernelSet};

/// Triangle drawn for every visible instance, in clip space.
pub const TRIANGLE: [[f32; 2]; 3] = [[0.0, 0.5], [-0.5, -0.5], [0.5, -0.5]];

/// Buffers the draw kernel reads.
#[derive(Debug, Clone, Copy)]
pub struct DrawBindings {
    /// Triangle vertices, read through `vertex_index`.
    pub vertices: BufferHandle,
    /// Visible instances written by compaction.
    pub compacted: BufferHandle,
    /// Indirect block holding the draw arguments.
    pub indirect: BufferHandle,
}

/// Draws the compacted instances with arguments read from the GPU.
pub struct DrawPass {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
    bindings: DrawBindings,
}

impl DrawPass {
    /// Builds the render pipeline for targets of `format`.
    pub fn new(
        device: &wgpu::Device,
        kernels: &KernelSet,
        registry: &BufferRegistry,
        bindings: DrawBindings,
        format: wgpu::TextureFormat,
        pipeline_cache: Option<&wgpu::PipelineCache>,
    ) -> Result<Self> {
        let compiled = kernels.get(KernelId::Draw);
        let bind_group = kernels.bind_group(
            device,
            registry,
            KernelId::Draw,
            &[(0, bindings.vertices), (1, bindings.compacted)],
        )?;
        let layout = compiled.kernel.layout();
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(layout.label),
            layout: Some(&compiled.kernel.pipeline_layout(device)),
            vertex: wgpu::VertexState {
                module: &compiled.module,
                entry_point: Some(layout.entry_point),
                buffers: &[],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &compiled.module,
                entry_point: Some(DRAW_FRAGMENT_ENTRY),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview_mask: None,
            cache: pipeline_cache,
        });

        Ok(Self {
            pipeline,
            bind_group,
            bindings,
        })
    }
}

impl DrawablePass for DrawPass {
    fn declare(&self) -> PassDecl {
        PassDecl::render("draw", FramePhase::Drawn)
            .reads(self.bindings.vertices)
            .reads(self.bindings.compacted)
            .reads(self.bindings.indirect)
    }

    fn draw(&self, context: &mut DrawContext<'_, '_>) -> Result<()> {
        let indirect = context.registry.get(self.bindings.indirect)?;
        context.render_pass.set_pipeline(&self.pipeline);
        context.render_pass.set_bind_group(0, &self.bind_group, &[]);
        context
            .render_pass
            .draw_indirect(indirect, IndirectBlock::DRAW_OFFSET);
        Ok(())
    }
}
