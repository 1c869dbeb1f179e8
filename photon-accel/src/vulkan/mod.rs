// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! A [`Backend`] on top of a raw Vulkan device.
//!
//! The device must have `VK_KHR_acceleration_structure` enabled, together with the
//! `accelerationStructure` and `bufferDeviceAddress` features. Every buffer gets its own
//! dedicated allocation. Acceleration structure objects are created lazily for each buffer range
//! that a structure is built into or copied into, and live as long as their buffer.
//!
//! All commands are recorded into a single primary command buffer, which is submitted and waited
//! on by [`flush`](Backend::flush). Objects destroyed in between are kept alive until then.

use crate::{
    acceleration_structure::{
        AccelerationStructureBuildGeometryInfo, AccelerationStructureBuildSizes,
        AccelerationStructureGeometries,
    },
    backend::{BindingTarget, BufferRange, BuildAccelerationStructureInfo},
    buffer::{BufferCreateInfo, MemoryLocation},
    sync::BufferBarrier,
    Backend, CopyAccelerationStructureInfo, DeviceAddress, DeviceSize, VulkanError,
};
use ash::{khr, vk};
use foldhash::HashMap;
use smallvec::SmallVec;
use std::{ptr::NonNull, slice};

/// A buffer created by a [`VulkanBackend`].
#[derive(Debug)]
pub struct VulkanBuffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: DeviceSize,
    device_address: DeviceAddress,
    mapping: Option<NonNull<u8>>,
}

impl VulkanBuffer {
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> DeviceSize {
        self.size
    }

    fn mapped_range(&self, offset: DeviceSize, len: usize) -> NonNull<u8> {
        let mapping = match self.mapping {
            Some(mapping) => mapping,
            None => panic!("buffer {:?} is not host-visible", self.handle),
        };
        assert!(
            offset + len as DeviceSize <= self.size,
            "host access out of the bounds of buffer {:?}",
            self.handle,
        );

        // SAFETY: The range was just checked to be inside the mapping.
        unsafe { mapping.add(offset as usize) }
    }
}

/// A top-level acceleration structure, as bound to descriptor sets.
///
/// The object belongs to the buffer it was created on, and is destroyed together with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VulkanAccelerationStructureView {
    handle: vk::AccelerationStructureKHR,
}

impl VulkanAccelerationStructureView {
    #[inline]
    pub fn handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }
}

#[derive(Debug)]
enum Garbage {
    Buffer(vk::Buffer, vk::DeviceMemory),
    AccelerationStructure(vk::AccelerationStructureKHR),
    QueryPool(vk::QueryPool),
}

#[derive(Clone, Copy, Debug)]
struct CachedAccelerationStructure {
    size: DeviceSize,
    handle: vk::AccelerationStructureKHR,
}

/// Parameters to create a new `VulkanBackend`.
#[derive(Clone, Debug)]
pub struct VulkanBackendCreateInfo {
    pub physical_device: vk::PhysicalDevice,

    /// The queue family of `queue`. It must support compute operations.
    pub queue_family_index: u32,

    pub queue: vk::Queue,
}

/// A [`Backend`] recording into one command buffer of a raw Vulkan device.
pub struct VulkanBackend {
    device: ash::Device,
    acceleration_structure_fns: khr::acceleration_structure::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue: vk::Queue,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    query_pool: vk::QueryPool,
    query_capacity: u32,
    next_query: u32,
    acceleration_structures: HashMap<(vk::Buffer, DeviceSize), CachedAccelerationStructure>,
    death_row: Vec<Garbage>,
}

impl VulkanBackend {
    const INITIAL_QUERY_CAPACITY: u32 = 16;

    /// Creates a new backend on `device`, and begins recording.
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        create_info: VulkanBackendCreateInfo,
    ) -> Result<Self, VulkanError> {
        let VulkanBackendCreateInfo {
            physical_device,
            queue_family_index,
            queue,
        } = create_info;

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let acceleration_structure_fns = khr::acceleration_structure::Device::new(instance, device);

        let command_pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let command_pool = unsafe { device.create_command_pool(&command_pool_info, None)? };

        let mut backend = VulkanBackend {
            device: device.clone(),
            acceleration_structure_fns,
            memory_properties,
            queue,
            command_pool,
            command_buffer: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            query_pool: vk::QueryPool::null(),
            query_capacity: 0,
            next_query: 0,
            acceleration_structures: HashMap::default(),
            death_row: Vec::new(),
        };

        // From here on, `Drop` cleans up whatever was created if a step fails.
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        backend.command_buffer = unsafe { device.allocate_command_buffers(&allocate_info)? }[0];
        backend.fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None)? };
        backend.grow_query_pool(Self::INITIAL_QUERY_CAPACITY)?;
        backend.begin()?;

        Ok(backend)
    }

    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the command buffer that commands are currently recorded into.
    ///
    /// It is replaced by a fresh recording after every flush, so the handle must not be kept.
    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    fn begin(&mut self) -> Result<(), VulkanError> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)?
        };

        Ok(())
    }

    fn grow_query_pool(&mut self, capacity: u32) -> Result<(), VulkanError> {
        let create_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR)
            .query_count(capacity);
        let query_pool = unsafe { self.device.create_query_pool(&create_info, None)? };

        // Queries recorded since the last flush may still be in the old pool.
        if self.query_pool != vk::QueryPool::null() {
            self.death_row.push(Garbage::QueryPool(self.query_pool));
        }

        tracing::debug!(capacity, "created compacted-size query pool");

        self.query_pool = query_pool;
        self.query_capacity = capacity;
        self.next_query = 0;

        Ok(())
    }

    fn memory_type_index(
        &self,
        type_bits: u32,
        location: MemoryLocation,
    ) -> Result<u32, VulkanError> {
        let memory_types = &self.memory_properties.memory_types
            [..self.memory_properties.memory_type_count as usize];
        let find = |flags: vk::MemoryPropertyFlags| {
            memory_types
                .iter()
                .enumerate()
                .find(|&(index, memory_type)| {
                    type_bits & (1 << index) != 0 && memory_type.property_flags.contains(flags)
                })
                .map(|(index, _)| index as u32)
        };

        find(location.memory_property_flags())
            .or_else(|| match location {
                // Not every device has cached coherent memory.
                MemoryLocation::Readback => find(MemoryLocation::Upload.memory_property_flags()),
                _ => None,
            })
            .ok_or(VulkanError::NoSuitableMemoryType)
    }

    /// Returns the acceleration structure object over `range`, creating it if needed.
    fn acceleration_structure(
        &mut self,
        range: BufferRange<'_, VulkanBuffer>,
    ) -> Result<vk::AccelerationStructureKHR, VulkanError> {
        let key = (range.buffer.handle, range.offset);

        if let Some(cached) = self.acceleration_structures.get(&key) {
            if cached.size == range.size {
                return Ok(cached.handle);
            }
        }

        // The object type is left generic, so that the same range can hold either level.
        let create_info = vk::AccelerationStructureCreateInfoKHR::default()
            .buffer(range.buffer.handle)
            .offset(range.offset)
            .size(range.size)
            .ty(vk::AccelerationStructureTypeKHR::GENERIC);
        let handle = unsafe {
            self.acceleration_structure_fns
                .create_acceleration_structure(&create_info, None)?
        };

        if let Some(old) = self.acceleration_structures.insert(
            key,
            CachedAccelerationStructure {
                size: range.size,
                handle,
            },
        ) {
            self.death_row
                .push(Garbage::AccelerationStructure(old.handle));
        }

        Ok(handle)
    }

    fn empty_death_row(&mut self) {
        for garbage in self.death_row.drain(..) {
            match garbage {
                Garbage::Buffer(buffer, memory) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    unsafe { self.device.free_memory(memory, None) };
                }
                Garbage::AccelerationStructure(handle) => unsafe {
                    self.acceleration_structure_fns
                        .destroy_acceleration_structure(handle, None);
                },
                Garbage::QueryPool(query_pool) => unsafe {
                    self.device.destroy_query_pool(query_pool, None);
                },
            }
        }
    }

    fn allocate_memory(
        &self,
        buffer: vk::Buffer,
        location: MemoryLocation,
    ) -> Result<vk::DeviceMemory, VulkanError> {
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let memory_type_index = self.memory_type_index(requirements.memory_type_bits, location)?;

        let mut flags_info =
            vk::MemoryAllocateFlagsInfo::default().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
        let mut dedicated_info = vk::MemoryDedicatedAllocateInfo::default().buffer(buffer);
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index)
            .push_next(&mut flags_info)
            .push_next(&mut dedicated_info);
        let memory = unsafe { self.device.allocate_memory(&allocate_info, None)? };

        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, memory, 0) } {
            unsafe { self.device.free_memory(memory, None) };
            return Err(err.into());
        }

        Ok(memory)
    }
}

impl Backend for VulkanBackend {
    type RawBuffer = VulkanBuffer;
    type AccelerationStructureView = VulkanAccelerationStructureView;

    fn create_buffer(
        &mut self,
        create_info: &BufferCreateInfo<'_>,
    ) -> Result<VulkanBuffer, VulkanError> {
        let &BufferCreateInfo {
            size,
            usage,
            location,
            initial_data,
        } = create_info;

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { self.device.create_buffer(&buffer_info, None)? };

        let memory = match self.allocate_memory(handle, location) {
            Ok(memory) => memory,
            Err(err) => {
                unsafe { self.device.destroy_buffer(handle, None) };
                return Err(err);
            }
        };

        let mut buffer = VulkanBuffer {
            handle,
            memory,
            size,
            device_address: 0,
            mapping: None,
        };

        if usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS) {
            let address_info = vk::BufferDeviceAddressInfo::default().buffer(handle);
            buffer.device_address = unsafe { self.device.get_buffer_device_address(&address_info) };
        }

        if location.is_host_visible() {
            let mapping = unsafe {
                self.device
                    .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            };

            match mapping {
                Ok(mapping) => buffer.mapping = NonNull::new(mapping.cast()),
                Err(err) => {
                    self.destroy_buffer(buffer);
                    return Err(err.into());
                }
            }
        }

        if let Some(initial_data) = initial_data {
            self.write_buffer(&buffer, 0, initial_data)?;
        }

        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: VulkanBuffer) {
        let death_row = &mut self.death_row;

        self.acceleration_structures.retain(|&(handle, _), cached| {
            let keep = handle != buffer.handle;

            if !keep {
                death_row.push(Garbage::AccelerationStructure(cached.handle));
            }

            keep
        });

        // Freeing the memory unmaps it.
        death_row.push(Garbage::Buffer(buffer.handle, buffer.memory));
    }

    fn buffer_device_address(&self, buffer: &VulkanBuffer) -> DeviceAddress {
        buffer.device_address
    }

    fn write_buffer(
        &mut self,
        buffer: &VulkanBuffer,
        offset: DeviceSize,
        data: &[u8],
    ) -> Result<(), VulkanError> {
        let dst = buffer.mapped_range(offset, data.len());

        // SAFETY: The memory is host-coherent, and the manager orders host writes before device
        // reads with barriers.
        unsafe { dst.as_ptr().copy_from_nonoverlapping(data.as_ptr(), data.len()) };

        Ok(())
    }

    fn read_buffer(
        &mut self,
        buffer: &VulkanBuffer,
        offset: DeviceSize,
        data: &mut [u8],
    ) -> Result<(), VulkanError> {
        let src = buffer.mapped_range(offset, data.len());

        // SAFETY: Only called after a flush, when the device is idle.
        unsafe {
            src.as_ptr()
                .copy_to_nonoverlapping(data.as_mut_ptr(), data.len())
        };

        Ok(())
    }

    fn acceleration_structure_build_sizes(
        &self,
        info: &AccelerationStructureBuildGeometryInfo,
    ) -> AccelerationStructureBuildSizes {
        let geometries = geometries_vk(info);
        let build_info = build_geometry_info_vk(info, &geometries);
        let max_primitive_counts = info
            .geometries
            .primitive_counts()
            .collect::<SmallVec<[_; 1]>>();
        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();

        unsafe {
            self.acceleration_structure_fns
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &max_primitive_counts,
                    &mut sizes,
                )
        };

        AccelerationStructureBuildSizes {
            acceleration_structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
            update_scratch_size: sizes.update_scratch_size,
        }
    }

    fn acceleration_structure_address(
        &mut self,
        range: BufferRange<'_, VulkanBuffer>,
    ) -> Result<DeviceAddress, VulkanError> {
        let handle = self.acceleration_structure(range)?;
        let address_info =
            vk::AccelerationStructureDeviceAddressInfoKHR::default().acceleration_structure(handle);

        Ok(unsafe {
            self.acceleration_structure_fns
                .get_acceleration_structure_device_address(&address_info)
        })
    }

    fn cmd_buffer_barrier(&mut self, barrier: &BufferBarrier<'_, VulkanBuffer>) {
        let ((src_stage, src_access), (dst_stage, dst_access)) = barrier.scopes();
        let buffer_barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(barrier.buffer().handle)
            .offset(0)
            .size(vk::WHOLE_SIZE);

        unsafe {
            self.device.cmd_pipeline_barrier(
                self.command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                slice::from_ref(&buffer_barrier),
                &[],
            )
        };
    }

    fn cmd_build_acceleration_structure(
        &mut self,
        info: &BuildAccelerationStructureInfo<'_, VulkanBuffer>,
    ) -> Result<(), VulkanError> {
        let &BuildAccelerationStructureInfo {
            geometry,
            src,
            dst,
            scratch,
            compacted_size,
        } = info;

        let dst_handle = self.acceleration_structure(dst)?;
        let src_handle = match src {
            Some(src) => self.acceleration_structure(src)?,
            None => vk::AccelerationStructureKHR::null(),
        };

        let geometries = geometries_vk(geometry);
        let build_info = build_geometry_info_vk(geometry, &geometries)
            .src_acceleration_structure(src_handle)
            .dst_acceleration_structure(dst_handle)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.buffer.device_address + scratch.offset,
            });
        let build_range_infos = geometry
            .geometries
            .primitive_counts()
            .map(|primitive_count| {
                vk::AccelerationStructureBuildRangeInfoKHR::default()
                    .primitive_count(primitive_count)
            })
            .collect::<SmallVec<[_; 1]>>();

        if compacted_size.is_some() && self.next_query == self.query_capacity {
            self.grow_query_pool(self.query_capacity * 2)?;
        }

        unsafe {
            self.acceleration_structure_fns
                .cmd_build_acceleration_structures(
                    self.command_buffer,
                    slice::from_ref(&build_info),
                    &[build_range_infos.as_slice()],
                )
        };

        if let Some(compacted_size) = compacted_size {
            let query = self.next_query;
            self.next_query += 1;

            let build_barrier = vk::MemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                .dst_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR);

            unsafe {
                self.device
                    .cmd_reset_query_pool(self.command_buffer, self.query_pool, query, 1)
            };
            unsafe {
                self.device.cmd_pipeline_barrier(
                    self.command_buffer,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::DependencyFlags::empty(),
                    slice::from_ref(&build_barrier),
                    &[],
                    &[],
                )
            };
            unsafe {
                self.acceleration_structure_fns
                    .cmd_write_acceleration_structures_properties(
                        self.command_buffer,
                        slice::from_ref(&dst_handle),
                        vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR,
                        self.query_pool,
                        query,
                    )
            };
            unsafe {
                self.device.cmd_copy_query_pool_results(
                    self.command_buffer,
                    self.query_pool,
                    query,
                    1,
                    compacted_size.buffer.handle,
                    compacted_size.offset,
                    compacted_size.size,
                    vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
                )
            };
        }

        Ok(())
    }

    fn cmd_copy_acceleration_structure(
        &mut self,
        info: &CopyAccelerationStructureInfo<'_, VulkanBuffer>,
    ) -> Result<(), VulkanError> {
        let src = self.acceleration_structure(info.src)?;
        let dst = self.acceleration_structure(info.dst)?;
        let copy_info = vk::CopyAccelerationStructureInfoKHR::default()
            .src(src)
            .dst(dst)
            .mode(info.mode.into());

        unsafe {
            self.acceleration_structure_fns
                .cmd_copy_acceleration_structure(self.command_buffer, &copy_info)
        };

        Ok(())
    }

    fn cmd_copy_buffer(&mut self, src: &VulkanBuffer, dst: &VulkanBuffer, size: DeviceSize) {
        let region = vk::BufferCopy::default().size(size);

        unsafe {
            self.device.cmd_copy_buffer(
                self.command_buffer,
                src.handle,
                dst.handle,
                slice::from_ref(&region),
            )
        };
    }

    fn flush(&mut self) -> Result<(), VulkanError> {
        let submit_info =
            vk::SubmitInfo::default().command_buffers(slice::from_ref(&self.command_buffer));

        unsafe { self.device.end_command_buffer(self.command_buffer)? };
        unsafe {
            self.device
                .queue_submit(self.queue, slice::from_ref(&submit_info), self.fence)?
        };
        unsafe {
            self.device
                .wait_for_fences(slice::from_ref(&self.fence), true, u64::MAX)?
        };
        unsafe { self.device.reset_fences(slice::from_ref(&self.fence))? };
        unsafe {
            self.device
                .reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?
        };

        self.empty_death_row();
        self.next_query = 0;

        self.begin()
    }

    fn create_acceleration_structure_view(
        &mut self,
        range: BufferRange<'_, VulkanBuffer>,
    ) -> Result<VulkanAccelerationStructureView, VulkanError> {
        Ok(VulkanAccelerationStructureView {
            handle: self.acceleration_structure(range)?,
        })
    }

    fn destroy_acceleration_structure_view(&mut self, _view: VulkanAccelerationStructureView) {}
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let _ = unsafe { self.device.device_wait_idle() };

        for (_, cached) in self.acceleration_structures.drain() {
            self.death_row
                .push(Garbage::AccelerationStructure(cached.handle));
        }

        if self.query_pool != vk::QueryPool::null() {
            self.death_row.push(Garbage::QueryPool(self.query_pool));
        }

        self.empty_death_row();

        unsafe { self.device.destroy_fence(self.fence, None) };
        unsafe { self.device.destroy_command_pool(self.command_pool, None) };
    }
}

fn geometries_vk(
    info: &AccelerationStructureBuildGeometryInfo,
) -> SmallVec<[vk::AccelerationStructureGeometryKHR<'static>; 1]> {
    match &info.geometries {
        AccelerationStructureGeometries::Aabbs(geometries) => geometries
            .iter()
            .map(|geometry| {
                vk::AccelerationStructureGeometryKHR::default()
                    .geometry_type(vk::GeometryTypeKHR::AABBS)
                    .geometry(vk::AccelerationStructureGeometryDataKHR {
                        aabbs: vk::AccelerationStructureGeometryAabbsDataKHR::default()
                            .data(vk::DeviceOrHostAddressConstKHR {
                                device_address: geometry.data,
                            })
                            .stride(geometry.stride),
                    })
                    .flags(geometry.flags)
            })
            .collect(),
        AccelerationStructureGeometries::Instances(instances) => {
            let geometry = vk::AccelerationStructureGeometryKHR::default()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR {
                    instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                        .array_of_pointers(false)
                        .data(vk::DeviceOrHostAddressConstKHR {
                            device_address: instances.data,
                        }),
                })
                .flags(instances.flags);

            SmallVec::from_buf([geometry])
        }
    }
}

fn build_geometry_info_vk<'a>(
    info: &AccelerationStructureBuildGeometryInfo,
    geometries: &'a [vk::AccelerationStructureGeometryKHR<'static>],
) -> vk::AccelerationStructureBuildGeometryInfoKHR<'a> {
    vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(info.ty.into())
        .flags(info.flags)
        .mode(info.mode.into())
        .geometries(geometries)
}

/// Descriptor set bindings, looked up by name.
pub struct DescriptorBindings {
    device: ash::Device,
    bindings: HashMap<String, (vk::DescriptorSet, u32)>,
}

impl DescriptorBindings {
    #[inline]
    pub fn new(device: &ash::Device) -> Self {
        DescriptorBindings {
            device: device.clone(),
            bindings: HashMap::default(),
        }
    }

    /// Makes `name` refer to `binding` of `descriptor_set`. The binding must be of type
    /// `ACCELERATION_STRUCTURE_KHR`.
    pub fn insert(&mut self, name: impl Into<String>, descriptor_set: vk::DescriptorSet, binding: u32) {
        self.bindings.insert(name.into(), (descriptor_set, binding));
    }
}

impl BindingTarget<VulkanBackend> for DescriptorBindings {
    fn bind_acceleration_structure(&mut self, name: &str, view: &VulkanAccelerationStructureView) {
        let (descriptor_set, binding) = match self.bindings.get(name) {
            Some(&target) => target,
            None => panic!("there is no descriptor binding called `{}`", name),
        };

        let mut acceleration_structure_info =
            vk::WriteDescriptorSetAccelerationStructureKHR::default()
                .acceleration_structures(slice::from_ref(&view.handle));
        let mut write = vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .push_next(&mut acceleration_structure_info);
        write.descriptor_count = 1;

        unsafe {
            self.device
                .update_descriptor_sets(slice::from_ref(&write), &[])
        };
    }
}
