//! Instance records and their host-side model.
//!
//! The functions here compute on the CPU exactly what the update and
//! compaction kernels compute on the GPU. Tests compare the two, and hosts
//! can use them to predict what a frame will draw.

use bytemuck::{Pod, Zeroable};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Per-instance state read by every kernel.
///
/// Mirrors the WGSL struct
///
/// ```wgsl
/// struct InstanceData {
///     color: vec4<f32>,
///     translate: vec2<f32>,
///     scale: f32,
///     rotation: f32,
/// }
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// RGBA color.
    pub color: [f32; 4],
    /// Offset in clip space.
    pub translate: [f32; 2],
    /// Carried through every pass unchanged.
    pub scale: f32,
    /// Carried through every pass unchanged.
    pub rotation: f32,
}

const _: () = assert!(std::mem::size_of::<InstanceRecord>() == 32);
const _: () = assert!(std::mem::offset_of!(InstanceRecord, color) == 0);
const _: () = assert!(std::mem::offset_of!(InstanceRecord, translate) == 16);
const _: () = assert!(std::mem::offset_of!(InstanceRecord, scale) == 24);
const _: () = assert!(std::mem::offset_of!(InstanceRecord, rotation) == 28);

impl InstanceRecord {
    /// Size of one record, and the element stride of every instance buffer.
    pub const SIZE_BYTES: u64 = std::mem::size_of::<Self>() as u64;

    /// Amplitude of the per-frame horizontal drift.
    pub const DRIFT: f32 = 0.01;

    /// An opaque white record at `(x, y)`.
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            color: [1.0; 4],
            translate: [x, y],
            scale: 0.0,
            rotation: 0.0,
        }
    }

    /// A record with a random opaque color and a random position in
    /// `[-1, 1)²`.
    pub fn random(rng: &mut impl Rng) -> Self {
        Self {
            color: [rng.random(), rng.random(), rng.random(), 1.0],
            translate: [rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)],
            scale: 0.0,
            rotation: 0.0,
        }
    }

    /// The record after one update at `time` seconds.
    pub fn advanced(mut self, time: f32) -> Self {
        self.translate[0] += time.cos() * Self::DRIFT;
        self
    }

    /// Whether x lies inside the inclusive `[min, max]` window.
    pub fn is_visible(&self, window: [f32; 2]) -> bool {
        let x = self.translate[0];
        x >= window[0] && x <= window[1]
    }
}

/// Generates `count` random records, reproducibly when `seed` is given.
pub fn random_instances(count: u32, seed: Option<u64>) -> Vec<InstanceRecord> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    (0..count).map(|_| InstanceRecord::random(&mut rng)).collect()
}

/// Result of compacting a staging buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Compaction {
    /// Visible records in staging order, at most `capacity` of them.
    pub records: Vec<InstanceRecord>,
    /// Number of records that passed the filter, before clamping.
    pub visible_total: u32,
}

impl Compaction {
    /// Instance count the draw will use.
    pub fn instance_count(&self) -> u32 {
        self.records.len() as u32
    }
}

/// Stable filter of `staging` against `window`, clamped to `capacity`.
pub fn compact(staging: &[InstanceRecord], capacity: usize, window: [f32; 2]) -> Compaction {
    let mut compaction = Compaction::default();
    for record in staging.iter().filter(|record| record.is_visible(window)) {
        if compaction.records.len() < capacity {
            compaction.records.push(*record);
        }
        compaction.visible_total += 1;
    }
    compaction
}
