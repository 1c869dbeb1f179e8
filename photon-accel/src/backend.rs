// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The device-facing side of the manager.
//!
//! A [`Backend`] creates buffers, answers size queries, and records commands into a single
//! command stream. Recording is asynchronous: only [`Backend::flush`] waits for the device.

use crate::{
    acceleration_structure::{
        AccelerationStructureBuildGeometryInfo, AccelerationStructureBuildSizes,
        CopyAccelerationStructureMode,
    },
    buffer::BufferCreateInfo,
    sync::BufferBarrier,
    DeviceAddress, DeviceSize, VulkanError,
};
use std::fmt;

/// A byte range of a buffer.
#[derive(Debug)]
pub struct BufferRange<'a, R> {
    pub buffer: &'a R,
    pub offset: DeviceSize,
    pub size: DeviceSize,
}

impl<R> Clone for BufferRange<'_, R> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for BufferRange<'_, R> {}

/// Parameters of an acceleration structure build command.
#[derive(Debug)]
pub struct BuildAccelerationStructureInfo<'a, R> {
    /// What to build.
    pub geometry: &'a AccelerationStructureBuildGeometryInfo,

    /// The structure to update. Must be `Some` exactly when `geometry.mode` is
    /// [`Update`](crate::BuildAccelerationStructureMode::Update).
    pub src: Option<BufferRange<'a, R>>,

    /// Where the structure is written.
    pub dst: BufferRange<'a, R>,

    /// Working memory of the build.
    pub scratch: BufferRange<'a, R>,

    /// If `Some`, the compacted size of the structure is written as a `u64` at this location
    /// once the build completes.
    pub compacted_size: Option<BufferRange<'a, R>>,
}

/// Parameters of an acceleration structure copy command.
#[derive(Debug)]
pub struct CopyAccelerationStructureInfo<'a, R> {
    pub src: BufferRange<'a, R>,
    pub dst: BufferRange<'a, R>,
    pub mode: CopyAccelerationStructureMode,
}

/// A device plus the command stream the manager records into.
///
/// Commands are recorded in order and execute asynchronously. The manager issues every barrier
/// its commands need; a backend doesn't have to track buffer state.
pub trait Backend {
    /// A buffer created by the backend.
    type RawBuffer: fmt::Debug;

    /// A shader-visible view of a top-level acceleration structure.
    type AccelerationStructureView: fmt::Debug;

    /// Creates a buffer, writing `create_info.initial_data` into it if given.
    fn create_buffer(
        &mut self,
        create_info: &BufferCreateInfo<'_>,
    ) -> Result<Self::RawBuffer, VulkanError>;

    /// Destroys a buffer.
    ///
    /// Commands recorded since the last [`flush`](Backend::flush) may still use the buffer, so
    /// the backend must defer the destruction until they have completed.
    fn destroy_buffer(&mut self, buffer: Self::RawBuffer);

    /// Returns the device address of the start of `buffer`.
    fn buffer_device_address(&self, buffer: &Self::RawBuffer) -> DeviceAddress;

    /// Writes `data` into a host-visible buffer at `offset`.
    fn write_buffer(
        &mut self,
        buffer: &Self::RawBuffer,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), VulkanError>;

    /// Reads a host-visible buffer at `offset` into `data`.
    fn read_buffer(
        &mut self,
        buffer: &Self::RawBuffer,
        offset: DeviceSize,
        data: &mut [u8],
    ) -> Result<(), VulkanError>;

    /// Returns the memory requirements of building `info`.
    fn acceleration_structure_build_sizes(
        &self,
        info: &AccelerationStructureBuildGeometryInfo,
    ) -> AccelerationStructureBuildSizes;

    /// Returns the address that top-level instances use to refer to the bottom-level
    /// acceleration structure stored in `range`.
    ///
    /// The default implementation returns the device address of the start of the range.
    fn acceleration_structure_address(
        &mut self,
        range: BufferRange<'_, Self::RawBuffer>,
    ) -> Result<DeviceAddress, VulkanError> {
        Ok(self.buffer_device_address(range.buffer) + range.offset)
    }

    /// Records a buffer barrier.
    fn cmd_buffer_barrier(&mut self, barrier: &BufferBarrier<'_, Self::RawBuffer>);

    /// Records an acceleration structure build.
    fn cmd_build_acceleration_structure(
        &mut self,
        info: &BuildAccelerationStructureInfo<'_, Self::RawBuffer>,
    ) -> Result<(), VulkanError>;

    /// Records an acceleration structure copy.
    fn cmd_copy_acceleration_structure(
        &mut self,
        info: &CopyAccelerationStructureInfo<'_, Self::RawBuffer>,
    ) -> Result<(), VulkanError>;

    /// Records a copy of `size` bytes from the start of `src` to the start of `dst`.
    fn cmd_copy_buffer(&mut self, src: &Self::RawBuffer, dst: &Self::RawBuffer, size: DeviceSize);

    /// Submits everything recorded so far and blocks until the device has executed it.
    fn flush(&mut self) -> Result<(), VulkanError>;

    /// Creates a shader-visible view of the top-level acceleration structure stored in `range`.
    fn create_acceleration_structure_view(
        &mut self,
        range: BufferRange<'_, Self::RawBuffer>,
    ) -> Result<Self::AccelerationStructureView, VulkanError>;

    /// Destroys a view. Like buffers, the destruction is deferred until pending commands are
    /// done.
    fn destroy_acceleration_structure_view(&mut self, view: Self::AccelerationStructureView);
}

/// A place that shader resources can be bound to by name, such as a descriptor set or the root
/// variables of a compute pass.
pub trait BindingTarget<B: Backend + ?Sized> {
    /// Binds the acceleration structure `view` to the binding called `name`.
    fn bind_acceleration_structure(&mut self, name: &str, view: &B::AccelerationStructureView);
}
