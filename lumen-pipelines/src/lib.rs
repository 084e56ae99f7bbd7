//! Indirect instancing on top of `lumen-core`.
//!
//! Three kernels share one frame:
//!
//! 1. `update` drifts every instance horizontally by `cos(time) * 0.01`;
//! 2. `compact` copies the instances inside the visibility window into a
//!    dense buffer and writes their count into the indirect block;
//! 3. `draw` renders one triangle per compacted instance with
//!    `draw_indirect`, never learning the count on the host.
//!
//! [`IndirectInstancing`] wires them together. The host model in
//! [`instance`] reproduces each kernel on the CPU.
#![deny(missing_docs, clippy::unwrap_used)]

pub mod compact;
pub mod draw;
pub mod indirect_instancing;
pub mod instance;
pub mod kernels;
pub mod update;

pub use crate::{
    compact::{CompactBindings, CompactPass},
    draw::{DrawBindings, DrawPass, TRIANGLE},
    indirect_instancing::{IndirectInstancing, InstancingBuffers},
    instance::{Compaction, InstanceRecord, compact, random_instances},
    kernels::{KernelId, KernelSet},
    update::UpdatePass,
};
