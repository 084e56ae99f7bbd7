//! Pipeline configuration and its environment overrides.

use tracing::warn;

/// Environment variable overriding [`PipelineConfig::instance_count`].
pub const INSTANCES_ENV: &str = "LUMEN_INSTANCES";
/// Environment variable overriding [`PipelineConfig::seed`].
pub const SEED_ENV: &str = "LUMEN_SEED";

/// Configuration for an indirect instancing pipeline.
///
/// # Examples
///
/// ```
/// use lumen_core::PipelineConfig;
///
/// // 256 instances, compacted buffer sized to match
/// let config = PipelineConfig {
///     instance_count: 256,
///     ..Default::default()
/// };
/// assert_eq!(config.compacted_capacity(), 256);
///
/// // Deterministic instance layout
/// let config = PipelineConfig {
///     seed: Some(7),
///     ..Default::default()
/// };
/// # let _ = config;
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of instance records in the staging buffer.
    pub instance_count: u32,
    /// Capacity of the compacted buffer. `None` sizes it to
    /// `instance_count`, which makes overflow impossible.
    pub compacted_capacity: Option<u32>,
    /// Inclusive `[min, max]` window on x an instance must lie in to be
    /// drawn.
    pub visibility_window: [f32; 2],
    /// Color the render target is cleared to before drawing.
    pub clear_color: wgpu::Color,
    /// Seed for the initial instance layout. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// Adapter power preference.
    pub power_preference: wgpu::PowerPreference,
    /// The title of the demo window.
    pub window_title: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            instance_count: 64,
            compacted_capacity: None,
            visibility_window: [-0.5, 0.5],
            clear_color: wgpu::Color {
                r: 0.3,
                g: 0.3,
                b: 0.3,
                a: 1.0,
            },
            seed: None,
            power_preference: wgpu::PowerPreference::default(),
            window_title: "Lumen".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Effective capacity of the compacted buffer.
    pub fn compacted_capacity(&self) -> u32 {
        self.compacted_capacity.unwrap_or(self.instance_count)
    }

    /// Applies `LUMEN_INSTANCES` and `LUMEN_SEED` from the process
    /// environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary lookup. Unparsable values are
    /// logged and ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(INSTANCES_ENV) {
            match raw.trim().parse::<u32>() {
                Ok(count) if count > 0 => self.instance_count = count,
                _ => warn!(value = %raw, "ignoring invalid {INSTANCES_ENV}"),
            }
        }
        if let Some(raw) = lookup(SEED_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(seed) => self.seed = Some(seed),
                Err(_) => warn!(value = %raw, "ignoring invalid {SEED_ENV}"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_match_the_demo_scene() {
        let config = PipelineConfig::default();
        assert_eq!(config.instance_count, 64);
        assert_eq!(config.compacted_capacity(), 64);
        assert_eq!(config.visibility_window, [-0.5, 0.5]);
        assert_eq!(config.clear_color.r, 0.3);
        assert_eq!(config.clear_color.a, 1.0);
    }

    #[test]
    fn overrides_replace_count_and_seed() {
        let config = PipelineConfig::default()
            .with_overrides(lookup(&[(INSTANCES_ENV, "128"), (SEED_ENV, " 42 ")]));
        assert_eq!(config.instance_count, 128);
        assert_eq!(config.compacted_capacity(), 128);
        assert_eq!(config.seed, Some(42));
    }

    #[test]
    fn invalid_overrides_are_ignored() {
        let config = PipelineConfig::default()
            .with_overrides(lookup(&[(INSTANCES_ENV, "0"), (SEED_ENV, "abc")]));
        assert_eq!(config.instance_count, 64);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn explicit_capacity_wins() {
        let config = PipelineConfig {
            compacted_capacity: Some(8),
            ..Default::default()
        };
        assert_eq!(config.compacted_capacity(), 8);
    }
}
