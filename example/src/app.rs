use std::{sync::Arc, time::Instant};

use anyhow::{Context, anyhow};
use lumen_core::{AcquisitionError, GpuContext, PipelineConfig, wgpu};
use lumen_pipelines::IndirectInstancing;
use tracing::{debug, error, info, trace, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window, WindowId},
};

/// Window, surface and pipeline, created once the event loop resumes.
struct RenderState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    gpu: GpuContext,
    pipeline: IndirectInstancing,
}

impl RenderState {
    #[tracing::instrument(level = "info", skip_all)]
    fn new(window: Arc<Window>, config: &PipelineConfig) -> anyhow::Result<Self> {
        let instance = GpuContext::create_instance();
        let surface = instance
            .create_surface(window.clone())
            .map_err(AcquisitionError::from)?;
        let gpu = pollster::block_on(GpuContext::new(
            instance,
            Some(&surface),
            config.power_preference,
        ))?;

        let caps = surface.get_capabilities(&gpu.adapter);
        let format = *caps
            .formats
            .first()
            .ok_or(AcquisitionError::UnsupportedSurface)?;
        let present_mode = if caps.present_modes.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        info!("Using surface format {format:?}, present mode {present_mode:?}");

        let size = clamp_size(window.inner_size(), gpu.max_texture_dimension());
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: wgpu::CompositeAlphaMode::Auto,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&gpu.device, &surface_config);

        let pipeline = IndirectInstancing::new(&gpu, format, config)
            .context("failed to build the indirect instancing pipeline")?;

        Ok(Self {
            window,
            surface,
            surface_config,
            gpu,
            pipeline,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        if size.width == 0 || size.height == 0 {
            debug!("Ignoring zero-sized resize");
            return;
        }
        let size = clamp_size(size, self.gpu.max_texture_dimension());
        self.surface_config.width = size.width;
        self.surface_config.height = size.height;
        self.surface.configure(&self.gpu.device, &self.surface_config);
    }

    fn render(&mut self, elapsed_ms: f64) -> anyhow::Result<()> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
                debug!("Surface outdated/lost, reconfiguring...");
                self.surface.configure(&self.gpu.device, &self.surface_config);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("Surface timeout. Frame will be dropped.");
                return Ok(());
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                return Err(anyhow!("surface out of memory"));
            }
            Err(e) => {
                error!("Surface error: {e}. Attempting to continue.");
                return Ok(());
            }
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let report = self.pipeline.run_frame(elapsed_ms, &view)?;
        trace!(frame = report.frame_index, delta = report.delta, "presenting");

        self.window.pre_present_notify();
        frame.present();
        Ok(())
    }

    fn shutdown(&self) {
        #[cfg(feature = "diagnostics")]
        self.report_last_frame();

        self.gpu.save_pipeline_cache();
        info!(
            frames = self.pipeline.executor().frames_submitted(),
            "shutting down"
        );
    }

    #[cfg(feature = "diagnostics")]
    fn report_last_frame(&self) {
        match self.pipeline.read_indirect() {
            Ok(block) if block.overflowed() => warn!(
                visible = block.visible_total,
                capacity = block.capacity,
                dropped = block.dropped(),
                "last frame overflowed the compacted buffer"
            ),
            Ok(block) => info!(
                visible = block.draw.instance_count,
                instances = self.pipeline.instance_count(),
                "last frame"
            ),
            Err(e) => warn!("Diagnostic readback failed: {e}"),
        }
    }
}

fn clamp_size(size: PhysicalSize<u32>, max: u32) -> PhysicalSize<u32> {
    PhysicalSize::new(size.width.min(max), size.height.min(max))
}

/// The demo application driven by winit.
pub struct Demo {
    config: PipelineConfig,
    state: Option<RenderState>,
    start: Instant,
    error: Option<anyhow::Error>,
}

impl Demo {
    /// Creates the demo. Nothing touches the GPU until the event loop
    /// resumes.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: None,
            start: Instant::now(),
            error: None,
        }
    }

    /// The first fatal error, if the loop exited because of one.
    pub fn finish(self) -> anyhow::Result<()> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.error.get_or_insert(e);
        event_loop.exit();
    }
}

impl ApplicationHandler for Demo {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let attributes = Window::default_attributes().with_title(&self.config.window_title);
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };

        match RenderState::new(window, &self.config) {
            Ok(state) => {
                self.start = Instant::now();
                state.window.request_redraw();
                self.state = Some(state);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                state.shutdown();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => state.resize(size),
            WindowEvent::RedrawRequested => {
                let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
                if let Err(e) = state.render(elapsed_ms) {
                    return self.fail(event_loop, e);
                }
                state.window.request_redraw();
            }
            _ => (),
        }
    }
}
