//! Error types for pipeline wiring and device acquisition.
//!
//! Every variant of [`PipelineError`] describes a static wiring defect that is
//! detected while the pipeline is being set up. None of them is expected in
//! the steady-state frame loop.

use crate::frame::FramePhase;

/// Errors raised while wiring buffers, kernels and passes together.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A buffer is used with an access its usage set does not permit.
    #[error(
        "buffer `{buffer}` bound at {binding} requires {required:?} but was created with {actual:?}"
    )]
    Capability {
        /// Label of the offending buffer.
        buffer: &'static str,
        /// Where the access was requested (a binding slot or an upload).
        binding: String,
        /// Usage flags the access needs.
        required: wgpu::BufferUsages,
        /// Usage flags the buffer was created with.
        actual: wgpu::BufferUsages,
    },
    /// A kernel's declared binding contract disagrees with the bound buffer.
    #[error("kernel `{kernel}` binding {binding}: {reason}")]
    LayoutMismatch {
        /// Label of the kernel whose layout was violated.
        kernel: &'static str,
        /// Binding index of the offending slot.
        binding: u32,
        /// Human readable description of the mismatch.
        reason: String,
    },
    /// A host upload would write past the end of the buffer.
    #[error("upload of {len} bytes at offset {offset} overflows buffer `{buffer}` of {size} bytes")]
    UploadOutOfBounds {
        /// Label of the target buffer.
        buffer: &'static str,
        /// Requested byte offset.
        offset: u64,
        /// Length of the upload in bytes.
        len: u64,
        /// Size of the buffer in bytes.
        size: u64,
    },
    /// A host upload is not aligned to `wgpu::COPY_BUFFER_ALIGNMENT`.
    #[error(
        "upload to buffer `{buffer}` at offset {offset} with {len} bytes is not 4-byte aligned"
    )]
    UploadMisaligned {
        /// Label of the target buffer.
        buffer: &'static str,
        /// Requested byte offset.
        offset: u64,
        /// Length of the upload in bytes.
        len: u64,
    },
    /// A buffer descriptor cannot describe a valid allocation.
    #[error("buffer `{buffer}` cannot be allocated: {reason}")]
    InvalidBufferSize {
        /// Label of the rejected buffer.
        buffer: &'static str,
        /// Why the descriptor was rejected.
        reason: String,
    },
    /// A handle does not refer to a buffer in the registry.
    #[error("unknown buffer handle")]
    UnknownBuffer,
    /// More than one pass writes the same resource in one frame.
    #[error("resource `{resource}` is written by both `{first}` and `{second}`")]
    MultipleWriters {
        /// Name of the contested resource.
        resource: String,
        /// Label of the first writing pass.
        first: &'static str,
        /// Label of the second writing pass.
        second: &'static str,
    },
    /// The pass dependency graph contains a cycle.
    #[error("pass graph contains a dependency cycle")]
    CyclicGraph,
    /// A pass was recorded outside of the frame state order.
    #[error("pass `{pass}` moves the frame from {found:?}, expected it to follow {expected:?}")]
    PhaseViolation {
        /// Label of the pass that was out of order.
        pass: &'static str,
        /// Phase the pass requires to precede it.
        expected: FramePhase,
        /// Phase the frame was actually in.
        found: FramePhase,
    },
    /// A dispatch needs more workgroups than the device allows per dimension.
    #[error("kernel `{kernel}` needs {workgroups} workgroups, the device allows {max}")]
    DispatchTooLarge {
        /// Label of the kernel.
        kernel: &'static str,
        /// Workgroups the largest dispatch needs.
        workgroups: u64,
        /// `max_compute_workgroups_per_dimension` of the device.
        max: u32,
    },
    /// A diagnostic readback could not map its staging buffer.
    #[error("readback of buffer `{buffer}` failed: {reason}")]
    Readback {
        /// Label of the buffer being read.
        buffer: &'static str,
        /// Why the mapping failed.
        reason: String,
    },
    /// The device or its surface could not be acquired.
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
}

/// Errors raised while acquiring an adapter, device or surface.
#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    /// No adapter satisfies the requested options.
    #[error("failed to find an appropriate adapter: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    /// The adapter refused to create a device.
    #[error("failed to create device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    /// The presentation surface could not be created.
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    /// The adapter lacks a capability every kernel relies on.
    #[error("adapter is missing required capabilities: {0:?}")]
    MissingCapabilities(wgpu::DownlevelFlags),
    /// The surface reports no usable texture format for this adapter.
    #[error("surface is not supported by the selected adapter")]
    UnsupportedSurface,
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
