//! Device buffer registry.
//!
//! ## Usage
//!
//! Allocate every buffer a pipeline needs once, before the frame loop, and
//! refer to it by [`BufferHandle`] afterwards. Buffers never grow; size them
//! for the maximum element count up front.

use slotmap::{SlotMap, new_key_type};
use tracing::debug;

use crate::error::{PipelineError, Result};

new_key_type! {
    /// Stable reference to a buffer owned by a [`BufferRegistry`].
    pub struct BufferHandle;
}

/// Immutable description of a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Debug label, also used in error messages.
    pub label: &'static str,
    /// Total size in bytes.
    pub size: u64,
    /// Size of one element in bytes. Kernels check their declared stride
    /// against this value.
    pub stride: u64,
    /// Capabilities fixed at creation.
    pub usage: wgpu::BufferUsages,
}

impl BufferDesc {
    /// Describes a buffer holding `count` elements of `stride` bytes.
    pub fn array(
        label: &'static str,
        stride: u64,
        count: u64,
        usage: wgpu::BufferUsages,
    ) -> Self {
        Self {
            label,
            size: stride * count,
            stride,
            usage,
        }
    }

    /// Describes a buffer holding exactly one `T`.
    pub fn single<T: bytemuck::Pod>(label: &'static str, usage: wgpu::BufferUsages) -> Self {
        let size = std::mem::size_of::<T>() as u64;
        Self {
            label,
            size,
            stride: size,
            usage,
        }
    }

    /// Number of whole elements the buffer can hold.
    pub fn capacity(&self) -> u64 {
        if self.stride == 0 {
            return 0;
        }
        self.size / self.stride
    }

    /// Checks that the descriptor describes a valid allocation.
    pub fn validate(&self) -> Result<()> {
        let reason = if self.size == 0 {
            Some("size is zero".to_string())
        } else if self.stride == 0 {
            Some("element stride is zero".to_string())
        } else if self.size % self.stride != 0 {
            Some(format!(
                "size {} is not a multiple of stride {}",
                self.size, self.stride
            ))
        } else if self.size % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            Some(format!("size {} is not 4-byte aligned", self.size))
        } else {
            None
        };

        match reason {
            Some(reason) => Err(PipelineError::InvalidBufferSize {
                buffer: self.label,
                reason,
            }),
            None => Ok(()),
        }
    }

    /// Checks that the device can allocate a buffer this large.
    pub fn check_limits(&self, limits: &wgpu::Limits) -> Result<()> {
        if self.size > limits.max_buffer_size {
            return Err(PipelineError::InvalidBufferSize {
                buffer: self.label,
                reason: format!(
                    "size {} exceeds the device's max_buffer_size of {}",
                    self.size, limits.max_buffer_size
                ),
            });
        }
        Ok(())
    }

    /// Checks that `len` bytes may be written from the host at `offset`.
    pub fn check_upload(&self, offset: u64, len: u64) -> Result<()> {
        if !self.usage.contains(wgpu::BufferUsages::COPY_DST) {
            return Err(PipelineError::Capability {
                buffer: self.label,
                binding: "host upload".to_string(),
                required: wgpu::BufferUsages::COPY_DST,
                actual: self.usage,
            });
        }
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 || len % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(PipelineError::UploadMisaligned {
                buffer: self.label,
                offset,
                len,
            });
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(PipelineError::UploadOutOfBounds {
                buffer: self.label,
                offset,
                len,
                size: self.size,
            }),
        }
    }
}

/// A buffer together with the descriptor it was created from.
#[derive(Debug)]
pub struct RegisteredBuffer {
    desc: BufferDesc,
    buffer: wgpu::Buffer,
}

impl RegisteredBuffer {
    /// Descriptor the buffer was created with.
    pub fn desc(&self) -> &BufferDesc {
        &self.desc
    }

    /// Underlying device buffer.
    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

/// Owns every device buffer of a pipeline.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: SlotMap<BufferHandle, RegisteredBuffer>,
}

impl BufferRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a buffer on `device` and starts tracking it.
    pub fn allocate(&mut self, device: &wgpu::Device, desc: BufferDesc) -> Result<BufferHandle> {
        desc.validate()?;
        desc.check_limits(&device.limits())?;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size: desc.size,
            usage: desc.usage,
            mapped_at_creation: false,
        });
        debug!(
            label = desc.label,
            size = desc.size,
            usage = ?desc.usage,
            "allocated device buffer"
        );
        Ok(self.buffers.insert(RegisteredBuffer { desc, buffer }))
    }

    /// Writes host data into a buffer through the queue.
    pub fn upload(
        &self,
        queue: &wgpu::Queue,
        handle: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let entry = self.entry(handle)?;
        entry.desc.check_upload(offset, data.len() as u64)?;
        queue.write_buffer(&entry.buffer, offset, data);
        Ok(())
    }

    /// Looks up a buffer and its descriptor.
    pub fn entry(&self, handle: BufferHandle) -> Result<&RegisteredBuffer> {
        self.buffers.get(handle).ok_or(PipelineError::UnknownBuffer)
    }

    /// Looks up the device buffer behind a handle.
    pub fn get(&self, handle: BufferHandle) -> Result<&wgpu::Buffer> {
        self.entry(handle).map(RegisteredBuffer::buffer)
    }

    /// Looks up the descriptor behind a handle.
    pub fn desc(&self, handle: BufferHandle) -> Result<&BufferDesc> {
        self.entry(handle).map(RegisteredBuffer::desc)
    }

    /// Check if a buffer exists by its handle.
    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.buffers.contains_key(handle)
    }

    /// Number of registered buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the registry holds no buffers.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_desc() -> BufferDesc {
        BufferDesc::array(
            "staging",
            32,
            4,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )
    }

    #[test]
    fn array_desc_reports_capacity() {
        let desc = storage_desc();
        assert_eq!(desc.size, 128);
        assert_eq!(desc.capacity(), 4);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn zero_sized_buffers_are_rejected() {
        let desc = BufferDesc::array("empty", 32, 0, wgpu::BufferUsages::STORAGE);
        assert!(matches!(
            desc.validate(),
            Err(PipelineError::InvalidBufferSize { buffer: "empty", .. })
        ));
    }

    #[test]
    fn buffers_beyond_the_device_limit_are_rejected() {
        let limits = wgpu::Limits {
            max_buffer_size: 1024,
            ..wgpu::Limits::default()
        };
        let fits = BufferDesc::array("staging", 32, 32, wgpu::BufferUsages::STORAGE);
        assert!(fits.check_limits(&limits).is_ok());

        let too_big = BufferDesc::array("staging", 32, 33, wgpu::BufferUsages::STORAGE);
        assert!(matches!(
            too_big.check_limits(&limits),
            Err(PipelineError::InvalidBufferSize { buffer: "staging", .. })
        ));
    }

    #[test]
    fn size_must_be_a_multiple_of_stride() {
        let desc = BufferDesc {
            label: "ragged",
            size: 40,
            stride: 32,
            usage: wgpu::BufferUsages::STORAGE,
        };
        assert!(desc.validate().is_err());
    }

    #[test]
    fn upload_requires_copy_dst() {
        let desc = BufferDesc::array("compacted", 32, 4, wgpu::BufferUsages::STORAGE);
        let err = desc.check_upload(0, 32).unwrap_err();
        match err {
            PipelineError::Capability {
                buffer, required, ..
            } => {
                assert_eq!(buffer, "compacted");
                assert_eq!(required, wgpu::BufferUsages::COPY_DST);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn upload_bounds_are_checked() {
        let desc = storage_desc();
        assert!(desc.check_upload(0, 128).is_ok());
        assert!(desc.check_upload(96, 32).is_ok());
        assert!(matches!(
            desc.check_upload(100, 32),
            Err(PipelineError::UploadOutOfBounds { .. })
        ));
        assert!(matches!(
            desc.check_upload(u64::MAX - 3, 4),
            Err(PipelineError::UploadOutOfBounds { .. })
        ));
    }

    #[test]
    fn upload_alignment_is_checked() {
        let desc = storage_desc();
        assert!(matches!(
            desc.check_upload(2, 4),
            Err(PipelineError::UploadMisaligned { .. })
        ));
        assert!(matches!(
            desc.check_upload(0, 3),
            Err(PipelineError::UploadMisaligned { .. })
        ));
    }
}
