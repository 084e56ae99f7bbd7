//! Blocking buffer and texture readback for tests and diagnostics.
//!
//! Never call this from the frame loop: it waits for the device to go idle.

use tracing::debug;

use crate::{
    buffer::{BufferHandle, BufferRegistry},
    error::{PipelineError, Result},
};

/// Copies a registered buffer into a mappable staging buffer, waits for the
/// GPU and returns its bytes.
///
/// Work submitted before the call is complete when the bytes are returned.
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    registry: &BufferRegistry,
    handle: BufferHandle,
) -> Result<Vec<u8>> {
    let entry = registry.entry(handle)?;
    let desc = entry.desc();
    if !desc.usage.contains(wgpu::BufferUsages::COPY_SRC) {
        return Err(PipelineError::Capability {
            buffer: desc.label,
            binding: "readback".to_string(),
            required: wgpu::BufferUsages::COPY_SRC,
            actual: desc.usage,
        });
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("lumen readback"),
        size: desc.size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("lumen readback encoder"),
    });
    encoder.copy_buffer_to_buffer(entry.buffer(), 0, &staging, 0, desc.size);
    queue.submit(std::iter::once(encoder.finish()));

    let bytes = map_staging(device, &staging, desc.label)?;
    debug!(buffer = desc.label, bytes = bytes.len(), "read back buffer");
    Ok(bytes)
}

/// Copies a 4-byte-per-texel 2D texture into host memory, row by row with
/// the copy padding removed.
///
/// The texture must have been created with `COPY_SRC`.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>> {
    const LABEL: &str = "render target";
    const BYTES_PER_TEXEL: u32 = 4;

    if texture.format().block_copy_size(None) != Some(BYTES_PER_TEXEL) {
        return Err(PipelineError::Readback {
            buffer: LABEL,
            reason: format!("{:?} is not a 4-byte texel format", texture.format()),
        });
    }

    let width = texture.width();
    let height = texture.height();
    let unpadded_bytes_per_row = width * BYTES_PER_TEXEL;
    let padded_bytes_per_row =
        unpadded_bytes_per_row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("lumen texture readback"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("lumen texture readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(std::iter::once(encoder.finish()));

    let padded = map_staging(device, &staging, LABEL)?;
    let texels = padded
        .chunks_exact(padded_bytes_per_row as usize)
        .flat_map(|row| &row[..unpadded_bytes_per_row as usize])
        .copied()
        .collect::<Vec<u8>>();
    debug!(width, height, "read back texture");
    Ok(texels)
}

fn map_staging(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    label: &'static str,
) -> Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    let failed = |reason: String| PipelineError::Readback {
        buffer: label,
        reason,
    };
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| failed(e.to_string()))?;
    rx.recv()
        .map_err(|_| failed("map callback dropped".to_string()))?
        .map_err(|e| failed(e.to_string()))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Reads a buffer back as a slice of `T`.
pub fn read_typed<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    registry: &BufferRegistry,
    handle: BufferHandle,
) -> Result<Vec<T>> {
    let bytes = read_buffer(device, queue, registry, handle)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}
