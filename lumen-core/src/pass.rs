//! Pass traits implemented by concrete pipelines.
//!
//! A pass couples a [`PassDecl`] (what it touches, which phase it completes)
//! with the code that records it. The executor owns the encoder and opens one
//! `wgpu::ComputePass` or `wgpu::RenderPass` per pass; the pass only sets its
//! pipeline and bind groups and issues the dispatch or draw.
//!
//! Passes hold their pipelines and bind groups, built once at setup. They do
//! not own buffers: everything is looked up through the [`BufferRegistry`].

use crate::{buffer::BufferRegistry, error::Result, frame::FrameUniforms, graph::PassDecl};

/// Everything a compute pass may use while recording.
pub struct ComputeContext<'a, 'b> {
    /// Queue of the device the pass was built on.
    pub queue: &'a wgpu::Queue,
    /// Registry owning every buffer of the frame.
    pub registry: &'a BufferRegistry,
    /// Active compute pass encoder.
    pub compute_pass: &'a mut wgpu::ComputePass<'b>,
    /// Uniforms uploaded for this frame.
    pub uniforms: &'a FrameUniforms,
}

/// Everything a render pass may use while recording.
pub struct DrawContext<'a, 'b> {
    /// Queue of the device the pass was built on.
    pub queue: &'a wgpu::Queue,
    /// Registry owning every buffer of the frame.
    pub registry: &'a BufferRegistry,
    /// Active render pass encoder, already targeting the frame's view.
    pub render_pass: &'a mut wgpu::RenderPass<'b>,
    /// Uniforms uploaded for this frame.
    pub uniforms: &'a FrameUniforms,
}

/// A pass recorded inside a compute pass.
pub trait ComputablePass: Send + Sync + 'static {
    /// Resources the pass reads and writes, and the phase it completes.
    fn declare(&self) -> PassDecl;

    /// Records the dispatch.
    fn dispatch(&self, context: &mut ComputeContext<'_, '_>) -> Result<()>;
}

/// A pass recorded inside a render pass.
pub trait DrawablePass: Send + Sync + 'static {
    /// Resources the pass reads, and the phase it completes. The render
    /// target write is implied.
    fn declare(&self) -> PassDecl;

    /// Records the draw.
    fn draw(&self, context: &mut DrawContext<'_, '_>) -> Result<()>;
}

/// Type-erased pass as stored by the executor.
pub(crate) enum PassNode {
    Compute(Box<dyn ComputablePass>),
    Render(Box<dyn DrawablePass>),
}
