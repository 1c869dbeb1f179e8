// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Buffers owned by the acceleration structure manager.
//!
//! Every buffer is allocated for one [`BufferRole`], which decides its usage flags and where its
//! memory lives. The [`BufferPool`] is the only owner of these buffers; everything else refers to
//! them by [`Id<Buffer>`](Id).

use crate::{slotmap::SlotMap, Backend, DeviceAddress, DeviceSize, Id, VulkanError};
use ash::vk;
use std::fmt;

/// Marker type for IDs of buffers in a [`BufferPool`].
pub enum Buffer {}

/// The purpose a buffer was allocated for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    /// Working memory of bottom-level builds. Released after each rebuild.
    BottomLevelScratch,

    /// The conservatively sized target of bottom-level builds, before compaction.
    BottomLevelIntermediate,

    /// The packed buffer holding every compacted bottom-level acceleration structure.
    BottomLevelStore,

    /// Receives the compacted sizes written by the device after the bottom-level builds.
    CompactedSizeQuery,

    /// Host-readable copy of the compacted sizes.
    CompactedSizeReadback,

    /// Working memory shared by all top-level builds.
    TopLevelScratch,

    /// A built top-level acceleration structure.
    TopLevelStorage,

    /// The instance descriptors read by a top-level build.
    TopLevelInstances,
}

impl BufferRole {
    pub(crate) const COUNT: usize = 8;

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }

    /// Returns how buffers of this role are going to be used.
    pub fn usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferRole::BottomLevelScratch | BufferRole::TopLevelScratch => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferRole::BottomLevelIntermediate
            | BufferRole::BottomLevelStore
            | BufferRole::TopLevelStorage => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
            BufferRole::CompactedSizeQuery => {
                vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferRole::CompactedSizeReadback => vk::BufferUsageFlags::TRANSFER_DST,
            BufferRole::TopLevelInstances => {
                vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            }
        }
    }

    /// Returns where the memory of buffers of this role lives.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferRole::CompactedSizeReadback => MemoryLocation::Readback,
            BufferRole::TopLevelInstances => MemoryLocation::Upload,
            _ => MemoryLocation::Device,
        }
    }
}

/// Where the memory of a buffer lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryLocation {
    /// Device-local memory, not accessible from the host.
    Device,

    /// Host-visible memory the host writes and the device reads.
    Upload,

    /// Host-visible memory the device writes and the host reads.
    Readback,
}

impl MemoryLocation {
    /// Returns the memory properties a memory type must have to hold such a buffer.
    pub fn memory_property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryLocation::Device => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryLocation::Upload => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryLocation::Readback => {
                vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT
                    | vk::MemoryPropertyFlags::HOST_CACHED
            }
        }
    }

    /// Returns whether the host can map memory of this location.
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, MemoryLocation::Device)
    }
}

/// Parameters to create a new backend buffer.
#[derive(Clone, Debug)]
pub struct BufferCreateInfo<'a> {
    /// The size in bytes of the buffer.
    pub size: DeviceSize,

    /// How the buffer is going to be used.
    pub usage: vk::BufferUsageFlags,

    /// Where the memory of the buffer lives.
    pub location: MemoryLocation,

    /// Bytes to write at the start of the buffer after creation. Only valid for host-visible
    /// locations.
    pub initial_data: Option<&'a [u8]>,
}

impl BufferCreateInfo<'_> {
    /// Returns the create info of a buffer of `size` bytes for `role`.
    #[inline]
    pub fn for_role(role: BufferRole, size: DeviceSize) -> Self {
        BufferCreateInfo {
            size,
            usage: role.usage(),
            location: role.memory_location(),
            initial_data: None,
        }
    }
}

/// A buffer slot in a [`BufferPool`].
pub(crate) struct BufferState<R> {
    raw: R,
    size: DeviceSize,
    device_address: DeviceAddress,
    role: BufferRole,
}

impl<R> BufferState<R> {
    #[inline]
    pub fn raw(&self) -> &R {
        &self.raw
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    #[inline]
    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            size: self.size,
            device_address: self.device_address,
            role: self.role,
        }
    }
}

/// Read-only information about a buffer owned by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    /// The size in bytes of the buffer.
    pub size: DeviceSize,

    /// The device address of the start of the buffer.
    pub device_address: DeviceAddress,

    /// The role the buffer was allocated for.
    pub role: BufferRole,
}

/// Whether [`BufferPool::reserve`] had to allocate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reserved {
    /// A new buffer was allocated, and any previous one released.
    Allocated,

    /// The current buffer was large enough and was kept. The caller must order its previous uses
    /// before the new ones.
    Reused,
}

/// Single owner of every buffer allocated by the manager.
pub struct BufferPool<R> {
    buffers: SlotMap<Buffer, BufferState<R>>,
    allocations: [u32; BufferRole::COUNT],
}

impl<R> Default for BufferPool<R> {
    fn default() -> Self {
        BufferPool {
            buffers: SlotMap::new(),
            allocations: [0; BufferRole::COUNT],
        }
    }
}

impl<R> BufferPool<R> {
    /// Returns the number of live buffers.
    #[inline]
    pub fn len(&self) -> u32 {
        self.buffers.len()
    }

    /// Returns how many buffers have been allocated for `role` over the lifetime of the pool.
    #[inline]
    pub fn allocation_count(&self, role: BufferRole) -> u32 {
        self.allocations[role.index()]
    }

    /// Returns information about the buffer, or `None` if `id` is stale.
    #[inline]
    pub fn info(&self, id: Id<Buffer>) -> Option<BufferInfo> {
        self.buffers.get(id).map(BufferState::info)
    }

    /// Returns the buffer behind `id`.
    ///
    /// # Panics
    ///
    /// - Panics if `id` is stale. The manager only keeps IDs of live buffers, so this is a bug.
    #[inline]
    #[track_caller]
    pub(crate) fn state(&self, id: Id<Buffer>) -> &BufferState<R> {
        match self.buffers.get(id) {
            Some(state) => state,
            None => panic!("{:?} does not refer to a live buffer", id),
        }
    }

    /// Allocates a new buffer of `size` bytes for `role`.
    pub(crate) fn allocate<B>(
        &mut self,
        backend: &mut B,
        role: BufferRole,
        size: DeviceSize,
        initial_data: Option<&[u8]>,
    ) -> Result<Id<Buffer>, VulkanError>
    where
        B: Backend<RawBuffer = R> + ?Sized,
    {
        assert!(size > 0, "tried to allocate an empty {:?} buffer", role);

        let raw = backend.create_buffer(&BufferCreateInfo {
            initial_data,
            ..BufferCreateInfo::for_role(role, size)
        })?;
        let device_address = backend.buffer_device_address(&raw);

        self.allocations[role.index()] += 1;

        let id = self.buffers.insert(BufferState {
            raw,
            size,
            device_address,
            role,
        });

        tracing::debug!(?role, size, ?id, "allocated buffer");

        Ok(id)
    }

    /// Makes sure `current` refers to a buffer of at least `size` bytes.
    ///
    /// Buffers only ever grow: a buffer larger than needed is kept as is.
    pub(crate) fn reserve<B>(
        &mut self,
        backend: &mut B,
        current: &mut Option<Id<Buffer>>,
        role: BufferRole,
        size: DeviceSize,
    ) -> Result<Reserved, VulkanError>
    where
        B: Backend<RawBuffer = R> + ?Sized,
    {
        if let Some(id) = *current {
            let state = self.state(id);
            debug_assert_eq!(state.role, role);

            if state.size >= size {
                tracing::debug!(?role, size, capacity = state.size, "reusing buffer");

                return Ok(Reserved::Reused);
            }
        }

        // Allocate first, so that `current` stays valid if the allocation fails.
        let id = self.allocate(backend, role, size, None)?;

        if let Some(old) = current.replace(id) {
            self.release(backend, old);
        }

        Ok(Reserved::Allocated)
    }

    /// Releases the buffer behind `id`. The backend defers the destruction until the device is
    /// done with it.
    pub(crate) fn release<B>(&mut self, backend: &mut B, id: Id<Buffer>)
    where
        B: Backend<RawBuffer = R> + ?Sized,
    {
        if let Some(state) = self.buffers.remove(id) {
            tracing::debug!(role = ?state.role, size = state.size, ?id, "released buffer");
            backend.destroy_buffer(state.raw);
        }
    }

    /// Releases every buffer in the pool.
    pub(crate) fn clear<B>(&mut self, backend: &mut B)
    where
        B: Backend<RawBuffer = R> + ?Sized,
    {
        for state in self.buffers.drain() {
            backend.destroy_buffer(state.raw);
        }
    }
}

impl<R> fmt::Debug for BufferPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("len", &self.buffers.len())
            .field("allocations", &self.allocations)
            .finish_non_exhaustive()
    }
}
