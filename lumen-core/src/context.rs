//! Adapter, device and queue acquisition.
//!
//! This is the only place the crate suspends: requesting an adapter and a
//! device are async in wgpu. Synchronous callers drive them with
//! `pollster::block_on`.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::{
    error::AcquisitionError,
    pipeline_cache::{initialize_cache, save_cache},
};

/// Capabilities every pipeline of this crate relies on: compute kernels,
/// storage buffers read from the vertex stage and indirect draws.
pub const REQUIRED_DOWNLEVEL: wgpu::DownlevelFlags = wgpu::DownlevelFlags::COMPUTE_SHADERS
    .union(wgpu::DownlevelFlags::VERTEX_STORAGE)
    .union(wgpu::DownlevelFlags::INDIRECT_EXECUTION);

/// Everything acquired from wgpu before the first frame.
#[derive(Debug)]
pub struct GpuContext {
    /// The wgpu instance.
    pub instance: wgpu::Instance,
    /// The selected adapter.
    pub adapter: wgpu::Adapter,
    /// Logical device.
    pub device: wgpu::Device,
    /// Submission queue of `device`.
    pub queue: wgpu::Queue,
    /// Pipeline cache, when the adapter supports one.
    pub pipeline_cache: Option<wgpu::PipelineCache>,
}

impl GpuContext {
    /// Creates an instance on the primary backends (Vulkan, Metal, DX12 and
    /// browser WebGPU).
    pub fn create_instance() -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        })
    }

    /// Acquires an adapter and device, compatible with `surface` if given.
    #[tracing::instrument(level = "info", skip(instance, surface))]
    pub async fn new(
        instance: wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
        power_preference: wgpu::PowerPreference,
    ) -> Result<Self, AcquisitionError> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .inspect_err(|e| error!("Failed to find an appropriate adapter: {e:?}"))?;

        let adapter_info = adapter.get_info();
        info!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            "selected adapter"
        );

        let missing = REQUIRED_DOWNLEVEL.difference(adapter.get_downlevel_capabilities().flags);
        if !missing.is_empty() {
            error!(?missing, "adapter is missing required capabilities");
            return Err(AcquisitionError::MissingCapabilities(missing));
        }

        let mut required_features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::PIPELINE_CACHE) {
            required_features |= wgpu::Features::PIPELINE_CACHE;
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("lumen device"),
                required_features,
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await
            .inspect_err(|e| error!("Failed to create device: {e:?}"))?;

        device.set_device_lost_callback(|reason, message| {
            error!(?reason, %message, "device lost");
        });
        device.on_uncaptured_error(Arc::new(|e: wgpu::Error| {
            error!("Uncaptured wgpu error: {e}");
        }));

        let pipeline_cache = if required_features.contains(wgpu::Features::PIPELINE_CACHE) {
            initialize_cache(&device, &adapter_info)
        } else {
            None
        };
        info!(
            pipeline_cache = pipeline_cache.is_some(),
            max_texture_dimension_2d = device.limits().max_texture_dimension_2d,
            "device ready"
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            pipeline_cache,
        })
    }

    /// Acquires a device without a presentation surface, for tests and
    /// offline runs.
    pub async fn headless(
        power_preference: wgpu::PowerPreference,
    ) -> Result<Self, AcquisitionError> {
        Self::new(Self::create_instance(), None, power_preference).await
    }

    /// Blocking variant of [`GpuContext::headless`].
    pub fn headless_blocking(
        power_preference: wgpu::PowerPreference,
    ) -> Result<Self, AcquisitionError> {
        pollster::block_on(Self::headless(power_preference))
    }

    /// Largest texture side the device accepts.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Persists the pipeline cache, if there is one. Failures are logged.
    pub fn save_pipeline_cache(&self) {
        let Some(cache) = &self.pipeline_cache else {
            return;
        };
        if let Err(e) = save_cache(cache, &self.adapter.get_info()) {
            warn!("Failed to save pipeline cache: {e}");
        }
    }
}
