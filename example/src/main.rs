//! Windowed demo of the indirect instancing pipeline.
//!
//! `LUMEN_INSTANCES` sets the instance count and `LUMEN_SEED` fixes the
//! layout; `RUST_LOG` controls logging.

mod app;

use lumen_core::{PipelineConfig, logging::init_tracing};
use tracing::info;
use winit::event_loop::{ControlFlow, EventLoop};

fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = PipelineConfig::default().with_env_overrides();
    info!(
        instances = config.instance_count,
        seed = ?config.seed,
        "starting lumen demo"
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut demo = app::Demo::new(config);
    event_loop.run_app(&mut demo)?;
    demo.finish()
}
