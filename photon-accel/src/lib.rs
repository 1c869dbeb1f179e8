// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Acceleration structure lifecycle management for a progressive photon mapper.
//!
//! # Brief summary
//!
//! - A progressive photon mapper writes one axis-aligned bounding box per output pixel every
//!   frame, describing the volume in which that pixel's *visible point* collects photons. These
//!   boxes live in a GPU buffer owned by the renderer and are handed to the
//!   [`AccelerationStructureManager`] as a [`BoundingVolumeSet`].
//!
//! - The manager builds one bottom-level acceleration structure per set, compacts them all into
//!   a single tightly packed store buffer, and builds a top-level acceleration structure
//!   instancing them. Photon tracing passes then run ray queries against the top level to find
//!   the visible points a photon lands in.
//!
//! - Top-level structures are cached per ray-type count, because the hit-group contribution
//!   stored in each instance depends on it. Each cached top level has its own
//!   shader-visible view, which is handed to a [`BindingTarget`] with
//!   [`bind_read_only_view`](AccelerationStructureManager::bind_read_only_view).
//!
//! - All GPU work goes through the [`Backend`] trait. With the `vulkan` feature enabled,
//!   [`VulkanBackend`](crate::vulkan::VulkanBackend) implements it on top of `ash`.
//!
//! - Every buffer the manager allocates lives in its [`BufferPool`](buffer::BufferPool) and is
//!   referred to by a generational [`Id`]. Outside code only ever gets read-only information
//!   about those buffers through [`buffer_info`](AccelerationStructureManager::buffer_info).
//!
//! # Per-frame usage
//!
//! ```ignore
//! // Once, after the bounding box buffer exists.
//! let mut manager = AccelerationStructureManager::new(
//!     &backend,
//!     [BoundingVolumeSet::new(&bounding_boxes, width * height)],
//!     Default::default(),
//! );
//!
//! // Every frame, after the pass that writes the bounding boxes.
//! manager.build(&mut backend, 1)?;
//! manager.bind_read_only_view(&mut bindings, "visiblePointsAS", 1);
//!
//! // Once, when the renderer shuts down.
//! manager.destroy(&mut backend);
//! ```

pub use ash;
pub use ash::vk::{DeviceAddress, DeviceSize};
pub use acceleration_structure::{
    AabbPositions, AccelerationStructureBuildGeometryInfo, AccelerationStructureBuildSizes,
    AccelerationStructureGeometries, AccelerationStructureGeometryAabbsData,
    AccelerationStructureGeometryInstancesData, AccelerationStructureInstance,
    AccelerationStructureType, BottomLevelEntry, BuildAccelerationStructureMode,
    CopyAccelerationStructureMode, Packed24_8, TopLevelState, ACCELERATION_STRUCTURE_ALIGNMENT,
};
pub use backend::{
    Backend, BindingTarget, BufferRange, BuildAccelerationStructureInfo,
    CopyAccelerationStructureInfo,
};
pub use buffer::{Buffer, BufferCreateInfo, BufferInfo, BufferRole, MemoryLocation};
pub use manager::{
    AccelerationStructureManager, AccelerationStructureManagerCreateInfo, BoundingVolumeSet,
};
pub use slotmap::Id;
use ash::vk;
use std::{error::Error, fmt};

pub mod acceleration_structure;
pub mod backend;
pub mod buffer;
mod manager;
mod slotmap;
pub mod sync;
#[cfg(feature = "vulkan")]
pub mod vulkan;

/// Rounds `value` up to the next multiple of `alignment`, which must be a power of two.
#[inline]
pub const fn align_up(value: DeviceSize, alignment: DeviceSize) -> DeviceSize {
    debug_assert!(alignment.is_power_of_two());

    (value + alignment - 1) & !(alignment - 1)
}

/// Error type returned by backend operations.
///
/// Everything that can go wrong inside the manager itself is a programming error and panics;
/// this type only carries failures reported by the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VulkanError {
    OutOfHostMemory,
    OutOfDeviceMemory,
    InitializationFailed,
    DeviceLost,
    MemoryMapFailed,
    ExtensionNotPresent,
    FeatureNotPresent,
    TooManyObjects,
    Unknown,
    /// No memory type satisfies the requirements of a buffer.
    NoSuitableMemoryType,
    /// A result code that has no dedicated variant.
    Unnamed(vk::Result),
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => VulkanError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => VulkanError::OutOfDeviceMemory,
            vk::Result::ERROR_INITIALIZATION_FAILED => VulkanError::InitializationFailed,
            vk::Result::ERROR_DEVICE_LOST => VulkanError::DeviceLost,
            vk::Result::ERROR_MEMORY_MAP_FAILED => VulkanError::MemoryMapFailed,
            vk::Result::ERROR_EXTENSION_NOT_PRESENT => VulkanError::ExtensionNotPresent,
            vk::Result::ERROR_FEATURE_NOT_PRESENT => VulkanError::FeatureNotPresent,
            vk::Result::ERROR_TOO_MANY_OBJECTS => VulkanError::TooManyObjects,
            vk::Result::ERROR_UNKNOWN => VulkanError::Unknown,
            result => VulkanError::Unnamed(result),
        }
    }
}

impl Error for VulkanError {}

impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VulkanError::OutOfHostMemory => write!(f, "A host memory allocation has failed."),
            VulkanError::OutOfDeviceMemory => write!(f, "A device memory allocation has failed."),
            VulkanError::InitializationFailed => write!(
                f,
                "Initialization of an object could not be completed for implementation-specific \
                reasons.",
            ),
            VulkanError::DeviceLost => write!(f, "The logical or physical device has been lost."),
            VulkanError::MemoryMapFailed => write!(f, "Mapping of a memory object has failed."),
            VulkanError::ExtensionNotPresent => {
                write!(f, "A requested extension is not supported.")
            }
            VulkanError::FeatureNotPresent => write!(f, "A requested feature is not supported."),
            VulkanError::TooManyObjects => write!(
                f,
                "Too many objects of the type have already been created.",
            ),
            VulkanError::Unknown => write!(
                f,
                "An unknown error has occurred; either the application has provided invalid \
                input, or an implementation failure has occurred.",
            ),
            VulkanError::NoSuitableMemoryType => write!(
                f,
                "No memory type of the device satisfies the requirements of the buffer.",
            ),
            VulkanError::Unnamed(result) => {
                write!(f, "Unnamed error, VkResult value {}", result.as_raw())
            }
        }
    }
}

/// A helper type for non-exhaustive structs.
///
/// This type cannot be constructed outside this crate. Structures with a field of this type can
/// only be constructed by calling a constructor function or `Default::default()`. The effect is
/// similar to the standard Rust `#[non_exhaustive]` attribute, except that it does not prevent
/// update syntax from being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)] // add traits as needed
pub struct NonExhaustive(pub(crate) ());

#[cfg(test)]
mod lib_tests {
    use super::{align_up, VulkanError};
    use ash::vk;

    #[test]
    fn align_up_rounds_to_multiples() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn vulkan_error_from_result() {
        assert_eq!(
            VulkanError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            VulkanError::OutOfDeviceMemory,
        );
        assert_eq!(
            VulkanError::from(vk::Result::ERROR_FRAGMENTATION),
            VulkanError::Unnamed(vk::Result::ERROR_FRAGMENTATION),
        );
    }
}
