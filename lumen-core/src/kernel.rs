//! Kernel binding contracts.
//!
//! A kernel is an opaque shader entry point. The only thing this crate knows
//! about it is its [`KernelLayout`]: which binding slot expects which kind of
//! buffer, accessed how, with which element stride. Bind groups are only ever
//! built through [`Kernel::bind_group`], which checks every buffer against
//! that contract before handing anything to the device.
//!
//! Bind groups are meant to be built once at setup and reused every frame.

use std::num::NonZeroU64;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use tracing::debug;

use crate::{
    buffer::{BufferDesc, BufferHandle, BufferRegistry},
    error::{PipelineError, Result},
};

/// How a kernel accesses a bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingAccess {
    /// `var<storage, read>`
    ReadOnlyStorage,
    /// `var<storage, read_write>`
    ReadWriteStorage,
    /// `var<uniform>`
    Uniform,
}

impl BindingAccess {
    /// Usage flags a buffer needs to be bound with this access.
    pub fn required_usage(self) -> wgpu::BufferUsages {
        match self {
            Self::ReadOnlyStorage | Self::ReadWriteStorage => wgpu::BufferUsages::STORAGE,
            Self::Uniform => wgpu::BufferUsages::UNIFORM,
        }
    }

    /// Whether the kernel may write through this binding.
    pub fn writes(self) -> bool {
        matches!(self, Self::ReadWriteStorage)
    }

    /// Largest buffer binding the device accepts for this access.
    pub fn max_binding_size(self, limits: &wgpu::Limits) -> u64 {
        match self {
            Self::ReadOnlyStorage | Self::ReadWriteStorage => {
                u64::from(limits.max_storage_buffer_binding_size)
            }
            Self::Uniform => u64::from(limits.max_uniform_buffer_binding_size),
        }
    }

    fn binding_type(self) -> wgpu::BufferBindingType {
        match self {
            Self::ReadOnlyStorage => wgpu::BufferBindingType::Storage { read_only: true },
            Self::ReadWriteStorage => wgpu::BufferBindingType::Storage { read_only: false },
            Self::Uniform => wgpu::BufferBindingType::Uniform,
        }
    }
}

/// One declared binding slot of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingSlot {
    /// `@binding(n)` index in bind group 0.
    pub binding: u32,
    /// Declared access mode.
    pub access: BindingAccess,
    /// Expected element stride in bytes. For uniforms this is the size of the
    /// uniform struct.
    pub stride: u64,
}

impl BindingSlot {
    /// Declares a read-only storage array slot.
    pub const fn read_only(binding: u32, stride: u64) -> Self {
        Self {
            binding,
            access: BindingAccess::ReadOnlyStorage,
            stride,
        }
    }

    /// Declares a read-write storage array slot.
    pub const fn read_write(binding: u32, stride: u64) -> Self {
        Self {
            binding,
            access: BindingAccess::ReadWriteStorage,
            stride,
        }
    }

    /// Declares a uniform slot.
    pub const fn uniform(binding: u32, stride: u64) -> Self {
        Self {
            binding,
            access: BindingAccess::Uniform,
            stride,
        }
    }

    /// Checks a single buffer against this slot.
    fn check(&self, kernel: &'static str, desc: &BufferDesc) -> Result<()> {
        let required = self.access.required_usage();
        if !desc.usage.contains(required) {
            return Err(PipelineError::Capability {
                buffer: desc.label,
                binding: format!("kernel `{kernel}` binding {}", self.binding),
                required,
                actual: desc.usage,
            });
        }
        if self.stride != 0 && desc.stride != self.stride {
            return Err(PipelineError::LayoutMismatch {
                kernel,
                binding: self.binding,
                reason: format!(
                    "buffer `{}` has element stride {} but the kernel expects {}",
                    desc.label, desc.stride, self.stride
                ),
            });
        }
        if desc.size < self.stride {
            return Err(PipelineError::LayoutMismatch {
                kernel,
                binding: self.binding,
                reason: format!(
                    "buffer `{}` holds {} bytes, less than one {}-byte element",
                    desc.label, desc.size, self.stride
                ),
            });
        }
        Ok(())
    }
}

/// Declared binding contract of a kernel entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelLayout {
    /// Debug label of the kernel.
    pub label: &'static str,
    /// Entry point name inside the shader module.
    pub entry_point: &'static str,
    /// Shader stages that see the bindings.
    pub visibility: wgpu::ShaderStages,
    /// Ordered binding slots of bind group 0.
    pub slots: &'static [BindingSlot],
}

impl KernelLayout {
    /// Returns the slot declared for `binding`, if any.
    pub fn slot(&self, binding: u32) -> Option<&BindingSlot> {
        self.slots.iter().find(|slot| slot.binding == binding)
    }

    /// Validates a full set of bindings against the declared slots.
    ///
    /// Every declared slot must be bound exactly once, and every bound buffer
    /// must carry the usage and element stride its slot declares.
    pub fn validate(&self, bindings: &[(u32, &BufferDesc)]) -> Result<()> {
        let mut seen = FxHashSet::default();
        for (binding, desc) in bindings {
            let Some(slot) = self.slot(*binding) else {
                return Err(PipelineError::LayoutMismatch {
                    kernel: self.label,
                    binding: *binding,
                    reason: format!("buffer `{}` bound to an undeclared slot", desc.label),
                });
            };
            if !seen.insert(*binding) {
                return Err(PipelineError::LayoutMismatch {
                    kernel: self.label,
                    binding: *binding,
                    reason: "slot bound more than once".to_string(),
                });
            }
            slot.check(self.label, desc)?;
        }

        if let Some(missing) = self.slots.iter().find(|slot| !seen.contains(&slot.binding)) {
            return Err(PipelineError::LayoutMismatch {
                kernel: self.label,
                binding: missing.binding,
                reason: "declared slot has no buffer bound".to_string(),
            });
        }

        Ok(())
    }

    /// Checks every bound buffer against the device's binding size limits.
    pub fn check_limits(
        &self,
        bindings: &[(u32, &BufferDesc)],
        limits: &wgpu::Limits,
    ) -> Result<()> {
        for (binding, desc) in bindings {
            let Some(slot) = self.slot(*binding) else {
                continue;
            };
            let max = slot.access.max_binding_size(limits);
            if desc.size > max {
                return Err(PipelineError::LayoutMismatch {
                    kernel: self.label,
                    binding: *binding,
                    reason: format!(
                        "buffer `{}` holds {} bytes, the device binds at most {max}",
                        desc.label, desc.size
                    ),
                });
            }
        }
        Ok(())
    }

    /// Checks that `workgroups` fits in one dispatch dimension.
    pub fn check_dispatch(&self, workgroups: u64, limits: &wgpu::Limits) -> Result<()> {
        let max = limits.max_compute_workgroups_per_dimension;
        if workgroups > u64::from(max) {
            return Err(PipelineError::DispatchTooLarge {
                kernel: self.label,
                workgroups,
                max,
            });
        }
        Ok(())
    }

    fn layout_entries(&self) -> SmallVec<[wgpu::BindGroupLayoutEntry; 4]> {
        self.slots
            .iter()
            .map(|slot| wgpu::BindGroupLayoutEntry {
                binding: slot.binding,
                visibility: self.visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: slot.access.binding_type(),
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(slot.stride),
                },
                count: None,
            })
            .collect()
    }

    /// Derives the device bind group layout from the declared slots.
    pub fn create_bind_group_layout(&self, device: &wgpu::Device) -> wgpu::BindGroupLayout {
        let entries = self.layout_entries();
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(self.label),
            entries: &entries,
        })
    }
}

/// A kernel layout paired with the device bind group layout derived from it.
#[derive(Debug)]
pub struct Kernel {
    layout: KernelLayout,
    bind_group_layout: wgpu::BindGroupLayout,
}

impl Kernel {
    /// Derives the device bind group layout from a declared contract.
    pub fn new(device: &wgpu::Device, layout: KernelLayout) -> Self {
        let bind_group_layout = layout.create_bind_group_layout(device);
        Self {
            layout,
            bind_group_layout,
        }
    }

    /// The declared contract.
    pub fn layout(&self) -> &KernelLayout {
        &self.layout
    }

    /// The device bind group layout derived from the contract.
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.bind_group_layout
    }

    /// Creates a pipeline layout with this kernel's bind group at index 0.
    pub fn pipeline_layout(&self, device: &wgpu::Device) -> wgpu::PipelineLayout {
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(self.layout.label),
            bind_group_layouts: &[&self.bind_group_layout],
            immediate_size: 0,
        })
    }

    /// Validates `bindings` against the contract and builds the bind group.
    pub fn bind_group(
        &self,
        device: &wgpu::Device,
        registry: &BufferRegistry,
        bindings: &[(u32, BufferHandle)],
    ) -> Result<wgpu::BindGroup> {
        let mut resolved = SmallVec::<[(u32, &BufferDesc, &wgpu::Buffer); 4]>::new();
        for (binding, handle) in bindings {
            let entry = registry.entry(*handle)?;
            resolved.push((*binding, entry.desc(), entry.buffer()));
        }

        let descs = resolved
            .iter()
            .map(|(binding, desc, _)| (*binding, *desc))
            .collect::<SmallVec<[(u32, &BufferDesc); 4]>>();
        self.layout.validate(&descs)?;
        self.layout.check_limits(&descs, &device.limits())?;

        let entries = resolved
            .iter()
            .map(|(binding, _, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect::<SmallVec<[wgpu::BindGroupEntry<'_>; 4]>>();

        debug!(kernel = self.layout.label, "created bind group");
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.layout.label),
            layout: &self.bind_group_layout,
            entries: &entries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPACT: KernelLayout = KernelLayout {
        label: "compact",
        entry_point: "compact_instances",
        visibility: wgpu::ShaderStages::COMPUTE,
        slots: &[
            BindingSlot::read_write(0, 32),
            BindingSlot::read_only(1, 32),
            BindingSlot::uniform(2, 16),
        ],
    };

    fn instances(label: &'static str) -> BufferDesc {
        BufferDesc::array(
            label,
            32,
            8,
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        )
    }

    fn uniforms() -> BufferDesc {
        BufferDesc {
            label: "uniforms",
            size: 16,
            stride: 16,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        }
    }

    #[test]
    fn matching_bindings_validate() {
        let out = instances("compacted");
        let src = instances("staging");
        let uni = uniforms();
        assert!(COMPACT.validate(&[(0, &out), (1, &src), (2, &uni)]).is_ok());
    }

    #[test]
    fn binding_order_does_not_matter() {
        let out = instances("compacted");
        let src = instances("staging");
        let uni = uniforms();
        assert!(COMPACT.validate(&[(2, &uni), (0, &out), (1, &src)]).is_ok());
    }

    #[test]
    fn missing_storage_usage_is_a_capability_error() {
        let out = BufferDesc::array("compacted", 32, 8, wgpu::BufferUsages::COPY_DST);
        let src = instances("staging");
        let uni = uniforms();
        match COMPACT.validate(&[(0, &out), (1, &src), (2, &uni)]) {
            Err(PipelineError::Capability {
                buffer,
                binding,
                required,
                ..
            }) => {
                assert_eq!(buffer, "compacted");
                assert!(binding.contains("binding 0"));
                assert_eq!(required, wgpu::BufferUsages::STORAGE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn storage_buffer_in_uniform_slot_is_a_capability_error() {
        let out = instances("compacted");
        let src = instances("staging");
        let wrong = BufferDesc::array("time", 16, 1, wgpu::BufferUsages::STORAGE);
        assert!(matches!(
            COMPACT.validate(&[(0, &out), (1, &src), (2, &wrong)]),
            Err(PipelineError::Capability { buffer: "time", .. })
        ));
    }

    #[test]
    fn stride_disagreement_is_a_layout_mismatch() {
        let out = instances("compacted");
        let src = BufferDesc::array("staging", 16, 16, wgpu::BufferUsages::STORAGE);
        let uni = uniforms();
        assert!(matches!(
            COMPACT.validate(&[(0, &out), (1, &src), (2, &uni)]),
            Err(PipelineError::LayoutMismatch { binding: 1, .. })
        ));
    }

    #[test]
    fn unbound_slot_is_a_layout_mismatch() {
        let out = instances("compacted");
        let src = instances("staging");
        assert!(matches!(
            COMPACT.validate(&[(0, &out), (1, &src)]),
            Err(PipelineError::LayoutMismatch { binding: 2, .. })
        ));
    }

    #[test]
    fn undeclared_and_duplicate_slots_are_rejected() {
        let out = instances("compacted");
        let src = instances("staging");
        let uni = uniforms();
        assert!(matches!(
            COMPACT.validate(&[(0, &out), (1, &src), (2, &uni), (7, &src)]),
            Err(PipelineError::LayoutMismatch { binding: 7, .. })
        ));
        assert!(matches!(
            COMPACT.validate(&[(0, &out), (0, &out), (1, &src), (2, &uni)]),
            Err(PipelineError::LayoutMismatch { binding: 0, .. })
        ));
    }

    #[test]
    fn bindings_beyond_device_limits_are_rejected() {
        let limits = wgpu::Limits::default();
        let max_records = u64::from(limits.max_storage_buffer_binding_size) / 32;
        let src = instances("staging");
        let uni = uniforms();

        let largest = BufferDesc::array("compacted", 32, max_records, wgpu::BufferUsages::STORAGE);
        assert!(
            COMPACT
                .check_limits(&[(0, &largest), (1, &src), (2, &uni)], &limits)
                .is_ok()
        );

        let oversized =
            BufferDesc::array("compacted", 32, max_records + 1, wgpu::BufferUsages::STORAGE);
        match COMPACT.check_limits(&[(0, &oversized), (1, &src), (2, &uni)], &limits) {
            Err(PipelineError::LayoutMismatch {
                kernel,
                binding,
                reason,
            }) => {
                assert_eq!(kernel, "compact");
                assert_eq!(binding, 0);
                assert!(reason.contains("compacted"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn dispatches_beyond_device_limits_are_rejected() {
        let limits = wgpu::Limits::default();
        let max = limits.max_compute_workgroups_per_dimension;
        assert!(COMPACT.check_dispatch(u64::from(max), &limits).is_ok());
        assert!(matches!(
            COMPACT.check_dispatch(u64::from(max) + 1, &limits),
            Err(PipelineError::DispatchTooLarge { kernel: "compact", .. })
        ));
    }

    #[test]
    fn access_modes_map_to_usage() {
        assert_eq!(
            BindingAccess::ReadOnlyStorage.required_usage(),
            wgpu::BufferUsages::STORAGE
        );
        assert_eq!(
            BindingAccess::Uniform.required_usage(),
            wgpu::BufferUsages::UNIFORM
        );
        assert!(BindingAccess::ReadWriteStorage.writes());
        assert!(!BindingAccess::ReadOnlyStorage.writes());
    }
}
