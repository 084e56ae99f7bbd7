//! lumen-core runs GPU-driven frames: compute passes produce data, including
//! the parameters of a later draw, and a render pass consumes it, all inside a
//! single submission.
//!
//! # Building blocks
//!
//! - [`BufferRegistry`] allocates fixed-size device buffers and checks host
//!   uploads against their usage and bounds.
//! - [`KernelLayout`] declares the binding contract of a shader entry point.
//!   [`Kernel::bind_group`] refuses buffers that do not satisfy it.
//! - [`PassGraph`] orders passes from the buffers they read and write.
//! - [`FrameExecutor`] records the ordered passes into one encoder per frame
//!   and submits it.
//! - [`IndirectBlock`] is the binary contract between a compute kernel that
//!   writes draw arguments and the render pass that consumes them.
//!
//! # Frame lifecycle
//!
//! Every frame walks [`FramePhase::Idle`] → `Updated` → `Compacted` →
//! `Drawn`. The executor rejects a pass plan that skips a phase before the
//! first frame is ever recorded.
//!
//! ```
//! use lumen_core::{FramePhase, PipelineError};
//!
//! let phase = FramePhase::Idle.advance(FramePhase::Updated, "update").unwrap();
//! let skipped = phase.advance(FramePhase::Drawn, "draw");
//! assert!(matches!(skipped, Err(PipelineError::PhaseViolation { .. })));
//! ```
#![deny(missing_docs, clippy::unwrap_used)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod frame;
pub mod graph;
pub mod indirect;
pub mod kernel;
pub mod logging;
pub mod pass;
pub(crate) mod pipeline_cache;
#[cfg(feature = "diagnostics")]
pub mod readback;

pub use wgpu;

pub use crate::{
    buffer::{BufferDesc, BufferHandle, BufferRegistry},
    config::PipelineConfig,
    context::GpuContext,
    error::{AcquisitionError, PipelineError, Result},
    executor::{FrameExecutor, FrameExecutorBuilder, FrameReport},
    frame::{FrameClock, FramePhase, FrameTime, FrameUniforms},
    graph::{FramePlan, GraphResource, PassDecl, PassGraph, PassId, PassKind},
    indirect::{DrawIndirectArgs, IndirectBlock},
    kernel::{BindingAccess, BindingSlot, Kernel, KernelLayout},
    pass::{ComputablePass, ComputeContext, DrawContext, DrawablePass},
};
