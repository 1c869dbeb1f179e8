// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::BottomLevelEntry;
use crate::{backend::BufferRange, Backend, DeviceAddress, VulkanError};
use bytemuck::{Pod, Zeroable};
use std::fmt;

/// An instance of a bottom-level acceleration structure, as read by a top-level build.
///
/// The layout matches `VkAccelerationStructureInstanceKHR` and
/// `D3D12_RAYTRACING_INSTANCE_DESC`.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct AccelerationStructureInstance {
    /// A 3x4 transformation matrix to be applied to the bottom-level acceleration structure,
    /// in row-major order.
    ///
    /// The default value is a 3x4 identity matrix.
    pub transform: [[f32; 4]; 3],

    /// The low 24 bits contain the custom index, the high 8 bits contain the visibility mask.
    ///
    /// The default value is 0 for the index and 0xFF for the mask.
    pub instance_custom_index_and_mask: Packed24_8,

    /// The low 24 bits contain the hit-group contribution, the high 8 bits contain the instance
    /// flags.
    ///
    /// The default value is 0 for both.
    pub instance_shader_binding_table_record_offset_and_flags: Packed24_8,

    /// The device address of the bottom-level acceleration structure in this instance.
    pub acceleration_structure_reference: DeviceAddress,
}

impl Default for AccelerationStructureInstance {
    #[inline]
    fn default() -> Self {
        AccelerationStructureInstance {
            transform: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            instance_custom_index_and_mask: Packed24_8::new(0, 0xff),
            instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(0, 0),
            acceleration_structure_reference: 0,
        }
    }
}

impl AccelerationStructureInstance {
    /// Returns the hit-group contribution of the instance.
    #[inline]
    pub fn hit_group_contribution(&self) -> u32 {
        self.instance_shader_binding_table_record_offset_and_flags
            .low_24()
    }

    /// Returns the visibility mask of the instance.
    #[inline]
    pub fn mask(&self) -> u8 {
        self.instance_custom_index_and_mask.high_8()
    }
}

/// A 32-bit packed data type containing a 24-bit value and an 8-bit value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Packed24_8(u32);

impl Packed24_8 {
    /// Returns a new `Packed24_8` value.
    ///
    /// # Panics
    ///
    /// - Panics if `low_24` doesn't fit in 24 bits.
    #[inline]
    pub fn new(low_24: u32, high_8: u8) -> Self {
        assert!(
            low_24 < 1 << 24,
            "the value {} does not fit in 24 bits",
            low_24,
        );

        Packed24_8(low_24 | (u32::from(high_8) << 24))
    }

    /// Returns the value of the low 24 bits.
    #[inline]
    pub fn low_24(&self) -> u32 {
        self.0 & 0xffffff
    }

    /// Returns the value of the high 8 bits.
    #[inline]
    pub fn high_8(&self) -> u8 {
        (self.0 >> 24) as u8
    }
}

impl fmt::Debug for Packed24_8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Packed24_8")
            .field(&self.low_24())
            .field(&self.high_8())
            .finish()
    }
}

/// Fills `instances` with one instance per bottom-level entry, referencing the entry's compacted
/// acceleration structure inside `store`.
///
/// With `per_geometry_hit_entry`, the hit-group contribution of the `i`-th instance is
/// `i * ray_type_count`, so that each geometry selects its own set of hit groups. Otherwise all
/// instances share the hit groups at index 0.
pub(crate) fn fill_instances<B: Backend + ?Sized>(
    backend: &mut B,
    instances: &mut Vec<AccelerationStructureInstance>,
    entries: &[BottomLevelEntry],
    store: &B::RawBuffer,
    ray_type_count: u32,
    per_geometry_hit_entry: bool,
) -> Result<(), VulkanError> {
    instances.clear();

    let mut contribution = 0u32;

    for entry in entries {
        let acceleration_structure_reference = backend.acceleration_structure_address(BufferRange {
            buffer: store,
            offset: entry.store_offset(),
            size: entry.compacted_size(),
        })?;

        let hit_group = if per_geometry_hit_entry {
            contribution
        } else {
            0
        };

        instances.push(AccelerationStructureInstance {
            instance_shader_binding_table_record_offset_and_flags: Packed24_8::new(hit_group, 0),
            acceleration_structure_reference,
            ..Default::default()
        });

        if per_geometry_hit_entry {
            contribution = contribution
                .checked_add(ray_type_count)
                .expect("hit-group contribution overflowed");
        }
    }

    Ok(())
}
