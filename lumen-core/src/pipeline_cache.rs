use std::{io, path::PathBuf};

use tracing::debug;

fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("lumen"))
}

/// Loads a pipeline cache for `adapter_info` from the user cache directory,
/// or creates an empty one if nothing was saved yet.
///
/// Returns `None` when the adapter has no cache key.
pub fn initialize_cache(
    device: &wgpu::Device,
    adapter_info: &wgpu::AdapterInfo,
) -> Option<wgpu::PipelineCache> {
    let cache_path = cache_dir()?.join(wgpu::util::pipeline_cache_key(adapter_info)?);
    let cache_data = std::fs::read(&cache_path).ok();
    debug!(
        path = %cache_path.display(),
        bytes = cache_data.as_ref().map_or(0, Vec::len),
        "loading pipeline cache"
    );
    // SAFETY: the data was written by `save_cache` for the same cache key,
    // and `fallback` makes the driver discard anything it does not accept.
    unsafe {
        Some(
            device.create_pipeline_cache(&wgpu::PipelineCacheDescriptor {
                label: Some("lumen pipeline cache"),
                data: cache_data.as_deref(),
                fallback: true,
            }),
        )
    }
}

/// Writes the pipeline cache back to the user cache directory.
pub fn save_cache(cache: &wgpu::PipelineCache, adapter_info: &wgpu::AdapterInfo) -> io::Result<()> {
    let cache_dir =
        cache_dir().ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "cache dir not found"))?;
    let cache_filename = wgpu::util::pipeline_cache_key(adapter_info)
        .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "cache not supported"))?;

    if let Some(data) = cache.get_data() {
        std::fs::create_dir_all(&cache_dir)?;
        std::fs::write(cache_dir.join(&cache_filename), &data)?;
    }

    Ok(())
}
