// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Acceleration structure descriptions and the two build stages.
//!
//! The bottom level holds one acceleration structure per group of procedural bounding boxes.
//! After every full rebuild all of them are compacted into one packed store buffer. The top
//! level holds one instance per bottom-level entry and is cached per ray-type count.
//!
//! # Build inputs
//!
//! Geometry descriptions refer to their input data by device address rather than by buffer, the
//! same way the device consumes them. Size queries ignore those addresses, so a description can
//! be queried before its input buffers exist.

use crate::{DeviceAddress, DeviceSize};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

pub(crate) use bottom_level::BottomLevel;
pub use bottom_level::BottomLevelEntry;
pub use instance::{AccelerationStructureInstance, Packed24_8};
pub(crate) use top_level::TopLevel;
pub use top_level::TopLevelState;

pub(crate) mod bottom_level;
pub(crate) mod instance;
pub(crate) mod top_level;

/// The alignment that every acceleration structure offset within a buffer must respect.
///
/// Vulkan requires acceleration structure offsets to be a multiple of 256, which is also the
/// value of `D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BYTE_ALIGNMENT`.
pub const ACCELERATION_STRUCTURE_ALIGNMENT: DeviceSize = 256;

/// The size in bytes of one post-build compacted size value.
pub(crate) const COMPACTED_SIZE_STRIDE: DeviceSize = size_of::<u64>() as DeviceSize;

/// The position of one procedural primitive, as read by an acceleration structure build.
///
/// The renderer writes eight floats per visible point: the minimum corner, the maximum corner
/// and two floats of padding, so that every element starts on a 32-byte boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct AabbPositions {
    /// The minimum of the box, with each component being the minimum along that axis.
    pub min: [f32; 3],

    /// The maximum of the box, with each component being the maximum along that axis.
    pub max: [f32; 3],

    pub _pad: [f32; 2],
}

impl AabbPositions {
    /// The stride between consecutive boxes in a bounding volume buffer.
    pub const STRIDE: DeviceSize = size_of::<AabbPositions>() as DeviceSize;

    #[inline]
    pub const fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        AabbPositions {
            min,
            max,
            _pad: [0.0; 2],
        }
    }
}

/// The type of an acceleration structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccelerationStructureType {
    /// Refers to bottom-level acceleration structures. This type can be bound to a descriptor.
    TopLevel,

    /// Contains geometry data, and is referenced by top-level instances.
    BottomLevel,
}

impl From<AccelerationStructureType> for vk::AccelerationStructureTypeKHR {
    #[inline]
    fn from(val: AccelerationStructureType) -> Self {
        match val {
            AccelerationStructureType::TopLevel => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
            AccelerationStructureType::BottomLevel => {
                vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL
            }
        }
    }
}

/// What mode an acceleration structure build command should operate in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildAccelerationStructureMode {
    /// Build a new acceleration structure from scratch.
    Build,

    /// Update the destination acceleration structure in place, using the data of the source
    /// given in the build command. The structure must have been built with
    /// `ALLOW_UPDATE`.
    Update,
}

impl From<BuildAccelerationStructureMode> for vk::BuildAccelerationStructureModeKHR {
    #[inline]
    fn from(val: BuildAccelerationStructureMode) -> Self {
        match val {
            BuildAccelerationStructureMode::Build => vk::BuildAccelerationStructureModeKHR::BUILD,
            BuildAccelerationStructureMode::Update => {
                vk::BuildAccelerationStructureModeKHR::UPDATE
            }
        }
    }
}

/// What mode an acceleration structure copy command should operate in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CopyAccelerationStructureMode {
    /// Copy the source into the destination as is. The destination must be at least as large as
    /// the source.
    Clone,

    /// Copy the source into the destination, using only as much memory as the compacted size
    /// reported for it. The source must have been built with `ALLOW_COMPACTION`.
    Compact,
}

impl From<CopyAccelerationStructureMode> for vk::CopyAccelerationStructureModeKHR {
    #[inline]
    fn from(val: CopyAccelerationStructureMode) -> Self {
        match val {
            CopyAccelerationStructureMode::Clone => vk::CopyAccelerationStructureModeKHR::CLONE,
            CopyAccelerationStructureMode::Compact => {
                vk::CopyAccelerationStructureModeKHR::COMPACT
            }
        }
    }
}

/// The memory requirements of building an acceleration structure, as reported by the device
/// before the build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccelerationStructureBuildSizes {
    /// The conservative maximum size of the built acceleration structure.
    pub acceleration_structure_size: DeviceSize,

    /// The scratch size needed for a build.
    pub build_scratch_size: DeviceSize,

    /// The scratch size needed for an update.
    pub update_scratch_size: DeviceSize,
}

impl AccelerationStructureBuildSizes {
    /// The scratch size that covers both builds and updates.
    #[inline]
    pub fn max_scratch_size(&self) -> DeviceSize {
        self.build_scratch_size.max(self.update_scratch_size)
    }
}

/// A list of procedural boxes to build into a bottom-level acceleration structure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelerationStructureGeometryAabbsData {
    /// Flags of the geometry. `OPAQUE` skips any-hit invocations for these boxes.
    pub flags: vk::GeometryFlagsKHR,

    /// The device address of the first box.
    pub data: DeviceAddress,

    /// The number of bytes between consecutive boxes. Must be a multiple of 8.
    pub stride: DeviceSize,

    /// The number of boxes to read.
    pub primitive_count: u32,
}

impl AccelerationStructureGeometryAabbsData {
    /// Returns a description of `primitive_count` boxes of type [`AabbPositions`] starting at
    /// `data`.
    #[inline]
    pub fn new(data: DeviceAddress, primitive_count: u32) -> Self {
        AccelerationStructureGeometryAabbsData {
            flags: vk::GeometryFlagsKHR::OPAQUE,
            data,
            stride: AabbPositions::STRIDE,
            primitive_count,
        }
    }
}

/// An array of [`AccelerationStructureInstance`] values to build into a top-level acceleration
/// structure.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AccelerationStructureGeometryInstancesData {
    /// Flags of the geometry.
    pub flags: vk::GeometryFlagsKHR,

    /// The device address of the first instance. Must be a multiple of 16.
    pub data: DeviceAddress,

    /// The number of instances to read.
    pub instance_count: u32,
}

/// The geometries of an acceleration structure build.
#[derive(Clone, Debug, PartialEq)]
pub enum AccelerationStructureGeometries {
    /// Procedural boxes, for a bottom-level acceleration structure.
    Aabbs(Vec<AccelerationStructureGeometryAabbsData>),

    /// Instances, for a top-level acceleration structure.
    Instances(AccelerationStructureGeometryInstancesData),
}

impl AccelerationStructureGeometries {
    /// Returns the number of primitives of each geometry, in order.
    pub fn primitive_counts(&self) -> impl Iterator<Item = u32> + '_ {
        let (aabbs, instances) = match self {
            AccelerationStructureGeometries::Aabbs(geometries) => (geometries.as_slice(), None),
            AccelerationStructureGeometries::Instances(data) => (&[][..], Some(data.instance_count)),
        };

        aabbs
            .iter()
            .map(|geometry| geometry.primitive_count)
            .chain(instances)
    }
}

/// A description of one acceleration structure build or update.
#[derive(Clone, Debug, PartialEq)]
pub struct AccelerationStructureBuildGeometryInfo {
    /// The type of acceleration structure to build.
    pub ty: AccelerationStructureType,

    /// Additional options for the build.
    pub flags: vk::BuildAccelerationStructureFlagsKHR,

    /// Whether to build from scratch or update an existing structure.
    pub mode: BuildAccelerationStructureMode,

    /// The geometries to build.
    pub geometries: AccelerationStructureGeometries,
}

impl AccelerationStructureBuildGeometryInfo {
    /// Returns a build description of a bottom-level acceleration structure over `geometries`.
    #[inline]
    pub fn bottom_level(
        geometries: Vec<AccelerationStructureGeometryAabbsData>,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> Self {
        AccelerationStructureBuildGeometryInfo {
            ty: AccelerationStructureType::BottomLevel,
            flags,
            mode: BuildAccelerationStructureMode::Build,
            geometries: AccelerationStructureGeometries::Aabbs(geometries),
        }
    }

    /// Returns a build description of a top-level acceleration structure over `instances`.
    #[inline]
    pub fn top_level(
        instances: AccelerationStructureGeometryInstancesData,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> Self {
        AccelerationStructureBuildGeometryInfo {
            ty: AccelerationStructureType::TopLevel,
            flags,
            mode: BuildAccelerationStructureMode::Build,
            geometries: AccelerationStructureGeometries::Instances(instances),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AabbPositions, AccelerationStructureBuildGeometryInfo,
        AccelerationStructureGeometryAabbsData, AccelerationStructureGeometryInstancesData,
    };
    use ash::vk;
    use std::mem::size_of;

    #[test]
    fn aabb_layout() {
        assert_eq!(size_of::<AabbPositions>(), 32);
        assert_eq!(AabbPositions::STRIDE, 32);

        let boxes = [AabbPositions::new([0.0, 1.0, 2.0], [3.0, 4.0, 5.0])];
        let floats: &[f32] = bytemuck::cast_slice(&boxes);
        assert_eq!(floats, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.0, 0.0]);
    }

    #[test]
    fn primitive_counts() {
        let info = AccelerationStructureBuildGeometryInfo::bottom_level(
            vec![
                AccelerationStructureGeometryAabbsData::new(0x1000, 4),
                AccelerationStructureGeometryAabbsData::new(0x2000, 7),
            ],
            vk::BuildAccelerationStructureFlagsKHR::empty(),
        );
        assert_eq!(info.geometries.primitive_counts().collect::<Vec<_>>(), [4, 7]);

        let info = AccelerationStructureBuildGeometryInfo::top_level(
            AccelerationStructureGeometryInstancesData {
                flags: vk::GeometryFlagsKHR::empty(),
                data: 0,
                instance_count: 3,
            },
            vk::BuildAccelerationStructureFlagsKHR::empty(),
        );
        assert_eq!(info.geometries.primitive_counts().collect::<Vec<_>>(), [3]);
    }
}
