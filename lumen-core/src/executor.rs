//! Frame executor: records a planned pass sequence into one command encoder
//! per frame and submits it once.
//!
//! ## Usage
//!
//! Register passes on a [`FrameExecutorBuilder`], hand it the buffer registry,
//! and call [`FrameExecutor::run_frame`] once per presented frame.
//!
//! Within one submission wgpu tracks buffer usage between passes, so a write
//! recorded by an earlier pass is visible to every later pass of the same
//! frame. `run_frame` takes `&mut self`; frame `k + 1` cannot be recorded
//! before frame `k` has been submitted.

use tracing::{debug, info, trace};

use crate::{
    buffer::{BufferHandle, BufferRegistry},
    error::{PipelineError, Result},
    frame::{FrameClock, FramePhase, FrameUniforms},
    graph::{GraphResource, PassDecl, PassGraph, PassKind},
    pass::{ComputablePass, ComputeContext, DrawContext, DrawablePass, PassNode},
};

/// Summary of one submitted frame.
#[derive(Debug, Clone)]
pub struct FrameReport {
    /// Zero-based index of the frame.
    pub frame_index: u64,
    /// Seconds since the frame driver started.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
    /// Queue submission carrying the frame's command buffer.
    pub submission: wgpu::SubmissionIndex,
}

/// Collects passes before the frame plan is fixed.
#[derive(Default)]
pub struct FrameExecutorBuilder {
    graph: PassGraph,
    nodes: Vec<PassNode>,
}

impl FrameExecutorBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a compute pass.
    #[must_use]
    pub fn compute(mut self, pass: impl ComputablePass) -> Self {
        let mut decl = pass.declare();
        decl.kind = PassKind::Compute;
        self.graph.add_pass(decl);
        self.nodes.push(PassNode::Compute(Box::new(pass)));
        self
    }

    /// Adds a render pass.
    #[must_use]
    pub fn render(mut self, pass: impl DrawablePass) -> Self {
        let mut decl = pass.declare();
        decl.kind = PassKind::Render;
        if !decl.writes.contains(&GraphResource::Target) {
            decl.writes.push(GraphResource::Target);
        }
        self.graph.add_pass(decl);
        self.nodes.push(PassNode::Render(Box::new(pass)));
        self
    }

    /// The graph collected so far.
    pub fn graph(&self) -> &PassGraph {
        &self.graph
    }

    /// Fixes the frame plan and hands the registry over to the executor.
    ///
    /// Fails if the passes cannot be ordered, if the ordered passes do not
    /// walk the frame through every phase, or if a declared buffer is not in
    /// `registry`.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn build(
        self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        registry: BufferRegistry,
        uniforms: BufferHandle,
        base_uniforms: FrameUniforms,
        clear_color: wgpu::Color,
    ) -> Result<FrameExecutor> {
        let plan = self.graph.plan()?;
        let ordered = plan
            .order()
            .iter()
            .filter_map(|id| self.graph.pass(*id))
            .collect::<Vec<_>>();
        check_phases(&ordered)?;

        for decl in &ordered {
            for resource in decl.reads.iter().chain(decl.writes.iter()) {
                if let GraphResource::Buffer(handle) = resource
                    && !registry.contains(*handle)
                {
                    return Err(PipelineError::UnknownBuffer);
                }
            }
        }
        registry
            .desc(uniforms)?
            .check_upload(0, FrameUniforms::SIZE_BYTES)?;

        let mut nodes = self.nodes.into_iter().map(Some).collect::<Vec<_>>();
        let mut passes = Vec::with_capacity(nodes.len());
        for id in plan.order() {
            if let (Some(decl), Some(node)) = (self.graph.pass(*id), nodes[id.0].take()) {
                passes.push((decl.clone(), node));
            }
        }

        info!(
            passes = ?passes.iter().map(|(decl, _)| decl.label).collect::<Vec<_>>(),
            "frame plan ready"
        );

        Ok(FrameExecutor {
            device: device.clone(),
            queue: queue.clone(),
            registry,
            passes,
            uniforms,
            base_uniforms,
            clock: FrameClock::new(),
            frame_index: 0,
            clear_color,
        })
    }
}

/// Moves the frame to the phase a pass completes. Several passes may
/// contribute to the same phase, but a phase can never be skipped or
/// revisited.
fn enter_phase(current: FramePhase, decl: &PassDecl) -> Result<FramePhase> {
    if current != FramePhase::Idle && decl.phase == current {
        return Ok(current);
    }
    current.advance(decl.phase, decl.label)
}

/// Checks that `ordered` walks one frame from `Idle` to `Drawn`.
fn check_phases(ordered: &[&PassDecl]) -> Result<()> {
    let mut phase = FramePhase::Idle;
    for decl in ordered {
        phase = enter_phase(phase, decl)?;
    }
    if !phase.is_complete() {
        return Err(PipelineError::PhaseViolation {
            pass: "end of frame",
            expected: FramePhase::Drawn,
            found: phase,
        });
    }
    Ok(())
}

/// Records and submits one frame per call.
pub struct FrameExecutor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    registry: BufferRegistry,
    passes: Vec<(PassDecl, PassNode)>,
    uniforms: BufferHandle,
    base_uniforms: FrameUniforms,
    clock: FrameClock,
    frame_index: u64,
    clear_color: wgpu::Color,
}

impl FrameExecutor {
    /// Records every planned pass into a single encoder and submits it.
    ///
    /// `elapsed_ms` comes from the frame driver and is expected to be
    /// non-decreasing. The first render pass clears `target` to the
    /// configured clear color.
    #[tracing::instrument(level = "trace", skip(self, target), fields(frame = self.frame_index))]
    pub fn run_frame(
        &mut self,
        elapsed_ms: f64,
        target: &wgpu::TextureView,
    ) -> Result<FrameReport> {
        let time = self.clock.tick(elapsed_ms);
        let uniforms = self.base_uniforms.at(time);
        self.registry
            .upload(&self.queue, self.uniforms, 0, bytemuck::bytes_of(&uniforms))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumen frame encoder"),
            });

        let mut phase = FramePhase::Idle;
        let mut target_cleared = false;
        for (decl, node) in &self.passes {
            phase = enter_phase(phase, decl)?;
            match node {
                PassNode::Compute(pass) => {
                    let mut compute_pass =
                        encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                            label: Some(decl.label),
                            timestamp_writes: None,
                        });
                    pass.dispatch(&mut ComputeContext {
                        queue: &self.queue,
                        registry: &self.registry,
                        compute_pass: &mut compute_pass,
                        uniforms: &uniforms,
                    })?;
                }
                PassNode::Render(pass) => {
                    let load = if target_cleared {
                        wgpu::LoadOp::Load
                    } else {
                        wgpu::LoadOp::Clear(self.clear_color)
                    };
                    target_cleared = true;
                    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(decl.label),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: target,
                            depth_slice: None,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        ..Default::default()
                    });
                    pass.draw(&mut DrawContext {
                        queue: &self.queue,
                        registry: &self.registry,
                        render_pass: &mut render_pass,
                        uniforms: &uniforms,
                    })?;
                }
            }
            trace!(pass = decl.label, ?phase, "recorded pass");
        }

        let submission = self.queue.submit(std::iter::once(encoder.finish()));
        let report = FrameReport {
            frame_index: self.frame_index,
            time: time.time,
            delta: time.delta,
            submission,
        };
        self.frame_index += 1;
        debug!(
            frame = report.frame_index,
            time = report.time,
            delta = report.delta,
            "frame submitted"
        );
        Ok(report)
    }

    /// Device the executor records on.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Queue the executor submits to.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Registry owning every buffer of the frame.
    pub fn registry(&self) -> &BufferRegistry {
        &self.registry
    }

    /// Labels of the planned passes in recording order.
    pub fn pass_labels(&self) -> Vec<&'static str> {
        self.passes.iter().map(|(decl, _)| decl.label).collect()
    }

    /// Number of frames submitted so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frame_index
    }

    /// Uniforms without frame time, as uploaded every frame.
    pub fn base_uniforms(&self) -> &FrameUniforms {
        &self.base_uniforms
    }
}
