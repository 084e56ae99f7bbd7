//! Per-frame state: the phase machine, the frame clock and the uniform block
//! every kernel sees.

use bytemuck::{Pod, Zeroable};
use tracing::warn;

use crate::error::{PipelineError, Result};

/// Progress of one frame through the indirect pipeline.
///
/// `Idle -> Updated -> Compacted -> Drawn -> Idle`. The terminal state of a
/// frame is the initial state of the next one; nothing else carries over
/// besides buffer contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FramePhase {
    /// No pass has been recorded for the current frame.
    #[default]
    Idle,
    /// Instance state has been advanced in place.
    Updated,
    /// Visible instances and draw arguments have been written.
    Compacted,
    /// The indirect draw has been recorded.
    Drawn,
}

impl FramePhase {
    /// The phase a pass must find the frame in to move it to `self`.
    pub fn predecessor(self) -> FramePhase {
        match self {
            Self::Idle | Self::Updated => Self::Idle,
            Self::Compacted => Self::Updated,
            Self::Drawn => Self::Compacted,
        }
    }

    /// Moves the frame to `next`, rejecting skipped or repeated phases.
    pub fn advance(self, next: FramePhase, pass: &'static str) -> Result<FramePhase> {
        if next == Self::Idle || next.predecessor() != self {
            return Err(PipelineError::PhaseViolation {
                pass,
                expected: next.predecessor(),
                found: self,
            });
        }
        Ok(next)
    }

    /// Whether the frame has run through every phase.
    pub fn is_complete(self) -> bool {
        self == Self::Drawn
    }
}

/// Time values for one frame, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameTime {
    /// Seconds since the frame driver started.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
}

/// Turns the frame driver's millisecond timestamps into frame times.
///
/// The driver promises non-decreasing timestamps; a timestamp that goes
/// backwards is clamped to the previous one so `delta` never turns negative.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    last_ms: Option<f64>,
}

impl FrameClock {
    /// Creates a clock that has not seen a frame yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock to `elapsed_ms`.
    pub fn tick(&mut self, elapsed_ms: f64) -> FrameTime {
        let elapsed_ms = if elapsed_ms.is_finite() {
            elapsed_ms.max(0.0)
        } else {
            warn!(elapsed_ms, "non-finite frame timestamp, reusing the previous one");
            self.last_ms.unwrap_or(0.0)
        };

        let now = match self.last_ms {
            Some(last) if elapsed_ms < last => {
                warn!(
                    elapsed_ms,
                    last_ms = last,
                    "frame timestamp went backwards, clamping"
                );
                last
            }
            _ => elapsed_ms,
        };
        let delta_ms = self.last_ms.map_or(0.0, |last| now - last);
        self.last_ms = Some(now);

        FrameTime {
            time: (now / 1000.0) as f32,
            delta: (delta_ms / 1000.0) as f32,
        }
    }

    /// Timestamp of the last frame, if any.
    pub fn last_ms(&self) -> Option<f64> {
        self.last_ms
    }
}

/// Uniform block shared by every kernel of the pipeline.
///
/// Mirrors the WGSL struct
///
/// ```wgsl
/// struct FrameUniforms {
///     time: f32,
///     delta: f32,
///     instance_count: u32,
///     _pad: u32,
///     window: vec2<f32>,
///     _pad2: vec2<f32>,
/// }
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    /// Seconds since the frame driver started.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
    /// Number of live records in the staging buffer.
    pub instance_count: u32,
    _pad: u32,
    /// Inclusive visibility window on the x axis, `[min, max]`.
    pub window: [f32; 2],
    _pad2: [f32; 2],
}

const _: () = assert!(std::mem::size_of::<FrameUniforms>() == 32);
const _: () = assert!(std::mem::offset_of!(FrameUniforms, window) == 16);

impl FrameUniforms {
    /// Size of the uniform block in bytes.
    pub const SIZE_BYTES: u64 = std::mem::size_of::<Self>() as u64;

    /// Builds the frame-invariant part of the uniforms.
    pub fn new(instance_count: u32, window: [f32; 2]) -> Self {
        Self {
            instance_count,
            window,
            ..Self::default()
        }
    }

    /// Copy of `self` stamped with a frame time.
    pub fn at(self, frame: FrameTime) -> Self {
        Self {
            time: frame.time,
            delta: frame.delta,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_advance_in_order() {
        let phase = FramePhase::Idle;
        let phase = phase.advance(FramePhase::Updated, "update").unwrap();
        let phase = phase.advance(FramePhase::Compacted, "compact").unwrap();
        let phase = phase.advance(FramePhase::Drawn, "draw").unwrap();
        assert!(phase.is_complete());
    }

    #[test]
    fn skipping_compaction_is_rejected() {
        let err = FramePhase::Updated
            .advance(FramePhase::Drawn, "draw")
            .unwrap_err();
        match err {
            PipelineError::PhaseViolation {
                pass,
                expected,
                found,
            } => {
                assert_eq!(pass, "draw");
                assert_eq!(expected, FramePhase::Compacted);
                assert_eq!(found, FramePhase::Updated);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn repeating_a_phase_is_rejected() {
        assert!(
            FramePhase::Compacted
                .advance(FramePhase::Compacted, "compact")
                .is_err()
        );
        assert!(FramePhase::Drawn.advance(FramePhase::Idle, "reset").is_err());
    }

    #[test]
    fn clock_derives_deltas_from_irregular_intervals() {
        let mut clock = FrameClock::new();
        let first = clock.tick(1000.0);
        assert_eq!(first.time, 1.0);
        assert_eq!(first.delta, 0.0);

        let second = clock.tick(1016.0);
        assert!((second.delta - 0.016).abs() < 1e-6);

        let third = clock.tick(1100.0);
        assert!((third.delta - 0.084).abs() < 1e-6);
        assert!((third.time - 1.1).abs() < 1e-6);
    }

    #[test]
    fn clock_clamps_regressing_timestamps() {
        let mut clock = FrameClock::new();
        clock.tick(500.0);
        let frame = clock.tick(400.0);
        assert_eq!(frame.delta, 0.0);
        assert_eq!(frame.time, 0.5);
        assert_eq!(clock.last_ms(), Some(500.0));
    }

    #[test]
    fn clock_tolerates_non_finite_timestamps() {
        let mut clock = FrameClock::new();
        clock.tick(250.0);
        let frame = clock.tick(f64::NAN);
        assert_eq!(frame.time, 0.25);
        assert_eq!(frame.delta, 0.0);
    }

    #[test]
    fn uniforms_keep_static_fields_when_stamped() {
        let base = FrameUniforms::new(64, [-0.5, 0.5]);
        let stamped = base.at(FrameTime {
            time: 2.0,
            delta: 0.5,
        });
        assert_eq!(stamped.instance_count, 64);
        assert_eq!(stamped.window, [-0.5, 0.5]);
        assert_eq!(stamped.time, 2.0);
        assert_eq!(stamped.delta, 0.5);
    }
}
