// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    instance::fill_instances, AccelerationStructureBuildGeometryInfo,
    AccelerationStructureBuildSizes, AccelerationStructureGeometryInstancesData,
    AccelerationStructureInstance, BottomLevel, BuildAccelerationStructureMode,
};
use crate::{
    backend::{BufferRange, BuildAccelerationStructureInfo},
    buffer::{Buffer, BufferPool, BufferRole},
    sync::{BufferAccess, BufferBarrier},
    Backend, DeviceAddress, Id, VulkanError,
};
use ash::vk;
use foldhash::HashMap;
use std::collections::hash_map::Entry;

/// Whether a top-level acceleration structure holds a valid build that can be updated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TopLevelState {
    /// The storage was allocated but never built into.
    #[default]
    Fresh,

    /// The storage holds a complete build.
    BuiltOnce,
}

/// A cached top-level acceleration structure, for one ray-type count.
#[derive(Debug)]
pub(crate) struct TopLevelEntry<V> {
    storage: Id<Buffer>,
    instances: Id<Buffer>,
    view: Option<V>,
    instance_count: u32,
    state: TopLevelState,
}

impl<V> TopLevelEntry<V> {
    #[inline]
    pub fn storage(&self) -> Id<Buffer> {
        self.storage
    }

    #[inline]
    pub fn view(&self) -> Option<&V> {
        self.view.as_ref()
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }
}

/// The top level: one acceleration structure per ray-type count, sharing one scratch buffer.
#[derive(Debug)]
pub(crate) struct TopLevel<V> {
    entries: HashMap<u32, TopLevelEntry<V>>,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    update: bool,
    scratch: Option<Id<Buffer>>,
    scratch_used: bool,
    build_sizes: AccelerationStructureBuildSizes,
    sized_instance_count: u32,
    instances: Vec<AccelerationStructureInstance>,
}

impl<V> TopLevel<V> {
    pub fn new(flags: vk::BuildAccelerationStructureFlagsKHR, update: bool) -> Self {
        let flags = if update {
            flags | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE
        } else {
            flags
        };

        TopLevel {
            entries: HashMap::default(),
            flags,
            update,
            scratch: None,
            scratch_used: false,
            build_sizes: AccelerationStructureBuildSizes::default(),
            sized_instance_count: 0,
            instances: Vec::new(),
        }
    }

    #[inline]
    pub fn entry(&self, ray_type_count: u32) -> Option<&TopLevelEntry<V>> {
        self.entries.get(&ray_type_count)
    }

    #[inline]
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Builds, or updates, the top-level acceleration structure of `ray_type_count` over every
    /// entry of `bottom_level`.
    pub fn build<B>(
        &mut self,
        backend: &mut B,
        pool: &mut BufferPool<B::RawBuffer>,
        bottom_level: &BottomLevel,
        ray_type_count: u32,
        per_geometry_hit_entry: bool,
    ) -> Result<(), VulkanError>
    where
        B: Backend<AccelerationStructureView = V> + ?Sized,
    {
        let store = match bottom_level.store() {
            Some(store) => store,
            None => panic!("the bottom level must be built before the top level"),
        };

        assert_eq!(
            bottom_level.built_entry_count(),
            bottom_level.entries().len(),
            "the bottom-level geometry changed since the last bottom-level build",
        );

        fill_instances(
            backend,
            &mut self.instances,
            bottom_level.entries(),
            pool.state(store).raw(),
            ray_type_count,
            per_geometry_hit_entry,
        )?;

        let instance_count = u32::try_from(self.instances.len())
            .expect("the number of instances does not fit in 32 bits");
        assert!(instance_count != 0, "a top-level build needs at least one instance");

        // The scratch buffer is sized once, for the instance count of the very first build.
        if self.scratch.is_none() {
            let build_sizes = backend
                .acceleration_structure_build_sizes(&self.geometry(0, instance_count));

            assert!(
                build_sizes.update_scratch_size <= build_sizes.build_scratch_size,
                "the update scratch size ({}) exceeds the build scratch size ({})",
                build_sizes.update_scratch_size,
                build_sizes.build_scratch_size,
            );

            self.scratch = Some(pool.allocate(
                backend,
                BufferRole::TopLevelScratch,
                build_sizes.build_scratch_size,
                None,
            )?);
            self.build_sizes = build_sizes;
            self.sized_instance_count = instance_count;
        }

        let instance_data: &[u8] = bytemuck::cast_slice(&self.instances);

        let entry = match self.entries.entry(ray_type_count) {
            Entry::Occupied(entry) => {
                let entry = entry.into_mut();

                assert_eq!(
                    entry.instance_count, instance_count,
                    "the number of instances changed since the top level of ray-type count {} \
                    was first built",
                    ray_type_count,
                );

                backend.write_buffer(pool.state(entry.instances).raw(), 0, instance_data)?;

                entry
            }
            Entry::Vacant(entry) => {
                let storage = pool.allocate(
                    backend,
                    BufferRole::TopLevelStorage,
                    self.build_sizes.acceleration_structure_size,
                    None,
                )?;
                let instances = match pool.allocate(
                    backend,
                    BufferRole::TopLevelInstances,
                    instance_data.len() as u64,
                    Some(instance_data),
                ) {
                    Ok(id) => id,
                    Err(err) => {
                        pool.release(backend, storage);
                        return Err(err);
                    }
                };

                entry.insert(TopLevelEntry {
                    storage,
                    instances,
                    view: None,
                    instance_count,
                    state: TopLevelState::Fresh,
                })
            }
        };

        assert_eq!(
            instance_count, self.sized_instance_count,
            "the shared top-level scratch buffer was sized for {} instances, not {}",
            self.sized_instance_count, instance_count,
        );

        let storage = pool.state(entry.storage);
        let instances = pool.state(entry.instances);
        let scratch = pool.state(self.scratch.unwrap_or(Id::INVALID));

        let storage_range = BufferRange {
            buffer: storage.raw(),
            offset: 0,
            size: self.build_sizes.acceleration_structure_size,
        };
        let mode = if self.update && entry.state == TopLevelState::BuiltOnce {
            BuildAccelerationStructureMode::Update
        } else {
            BuildAccelerationStructureMode::Build
        };
        let geometry = AccelerationStructureBuildGeometryInfo {
            mode,
            ..top_level_geometry(self.flags, instances.info().device_address, instance_count)
        };

        backend.cmd_buffer_barrier(&BufferBarrier::Transition {
            buffer: instances.raw(),
            access: BufferAccess::AccelerationStructureBuildInput,
        });

        if self.scratch_used {
            backend.cmd_buffer_barrier(&BufferBarrier::Hazard {
                buffer: scratch.raw(),
            });
        }

        backend.cmd_build_acceleration_structure(&BuildAccelerationStructureInfo {
            geometry: &geometry,
            src: (mode == BuildAccelerationStructureMode::Update).then_some(storage_range),
            dst: storage_range,
            scratch: BufferRange {
                buffer: scratch.raw(),
                offset: 0,
                size: scratch.size(),
            },
            compacted_size: None,
        })?;
        self.scratch_used = true;

        backend.cmd_buffer_barrier(&BufferBarrier::Hazard {
            buffer: storage.raw(),
        });

        if entry.view.is_none() {
            entry.view = Some(backend.create_acceleration_structure_view(storage_range)?);
        }

        entry.state = TopLevelState::BuiltOnce;

        tracing::trace!(ray_type_count, instance_count, ?mode, "built top-level acceleration structure");

        Ok(())
    }

    fn geometry(
        &self,
        data: DeviceAddress,
        instance_count: u32,
    ) -> AccelerationStructureBuildGeometryInfo {
        top_level_geometry(self.flags, data, instance_count)
    }

    /// Destroys every view and releases every buffer of the top level.
    pub fn release<B>(&mut self, backend: &mut B, pool: &mut BufferPool<B::RawBuffer>)
    where
        B: Backend<AccelerationStructureView = V> + ?Sized,
    {
        for (_, entry) in self.entries.drain() {
            if let Some(view) = entry.view {
                backend.destroy_acceleration_structure_view(view);
            }

            pool.release(backend, entry.storage);
            pool.release(backend, entry.instances);
        }

        if let Some(scratch) = self.scratch.take() {
            pool.release(backend, scratch);
        }

        self.scratch_used = false;
    }
}

fn top_level_geometry(
    flags: vk::BuildAccelerationStructureFlagsKHR,
    data: DeviceAddress,
    instance_count: u32,
) -> AccelerationStructureBuildGeometryInfo {
    AccelerationStructureBuildGeometryInfo::top_level(
        AccelerationStructureGeometryInstancesData {
            flags: vk::GeometryFlagsKHR::empty(),
            data,
            instance_count,
        },
        flags,
    )
}

#[cfg(test)]
mod tests {
    use super::{TopLevel, TopLevelState};
    use crate::{
        acceleration_structure::{AccelerationStructureGeometryAabbsData, BottomLevel},
        buffer::{BufferPool, BufferRole},
        tests::{Command, MockBackend},
        Backend, BufferCreateInfo, BuildAccelerationStructureMode,
    };
    use ash::vk;

    fn built_bottom_level(
        backend: &mut MockBackend,
        pool: &mut BufferPool<<MockBackend as Backend>::RawBuffer>,
        counts: &[u32],
    ) -> BottomLevel {
        let source = backend
            .create_buffer(&BufferCreateInfo::for_role(BufferRole::TopLevelInstances, 256))
            .unwrap();
        let mut bottom_level = BottomLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty());
        bottom_level.prepare_geometry(
            counts
                .iter()
                .map(|&count| AccelerationStructureGeometryAabbsData::new(0x4000, count)),
        );
        bottom_level.build(backend, pool, &[&source]).unwrap();
        backend.take_commands();

        bottom_level
    }

    #[test]
    fn repeat_build_does_not_reallocate() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = built_bottom_level(&mut backend, &mut pool, &[4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 1, true)
            .unwrap();
        let storage = top_level.entry(1).unwrap().storage();

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 1, true)
            .unwrap();

        assert_eq!(top_level.entry(1).unwrap().storage(), storage);
        assert_eq!(pool.allocation_count(BufferRole::TopLevelStorage), 1);
        assert_eq!(pool.allocation_count(BufferRole::TopLevelInstances), 1);
        assert_eq!(pool.allocation_count(BufferRole::TopLevelScratch), 1);
        assert_eq!(backend.view_count(), 1);
    }

    #[test]
    fn scratch_hazard_between_builds() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = built_bottom_level(&mut backend, &mut pool, &[4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 1, true)
            .unwrap();
        let first = backend.take_commands();
        assert!(matches!(first[0], Command::Transition { .. }));
        assert!(matches!(first[1], Command::Build { .. }));
        assert!(matches!(first[2], Command::Hazard { .. }));

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 2, true)
            .unwrap();
        let second = backend.take_commands();
        let scratch = pool.state(top_level.scratch.unwrap()).raw().clone();
        assert!(matches!(second[0], Command::Transition { .. }));
        assert_eq!(second[1], Command::Hazard { buffer: scratch });
        assert!(matches!(second[2], Command::Build { .. }));
    }

    #[test]
    fn hit_group_contributions() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = built_bottom_level(&mut backend, &mut pool, &[4, 4, 4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 2, true)
            .unwrap();
        let contributions = top_level
            .instances
            .iter()
            .map(|instance| instance.hit_group_contribution())
            .collect::<Vec<_>>();
        assert_eq!(contributions, [0, 2, 4]);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 3, false)
            .unwrap();
        assert!(top_level
            .instances
            .iter()
            .all(|instance| instance.hit_group_contribution() == 0 && instance.mask() == 0xff));

        let store = pool.info(bottom_level.store().unwrap()).unwrap();
        for (instance, entry) in top_level.instances.iter().zip(bottom_level.entries()) {
            assert_eq!(
                instance.acceleration_structure_reference,
                store.device_address + entry.store_offset(),
            );
        }
    }

    #[test]
    fn update_mode() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = built_bottom_level(&mut backend, &mut pool, &[4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), true);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 1, true)
            .unwrap();
        assert_eq!(top_level.entry(1).unwrap().state, TopLevelState::BuiltOnce);
        top_level
            .build(&mut backend, &mut pool, &bottom_level, 1, true)
            .unwrap();

        let modes = backend
            .take_commands()
            .into_iter()
            .filter_map(|command| match command {
                Command::Build {
                    mode,
                    flags,
                    has_src,
                    ..
                } => {
                    assert!(flags.contains(vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE));
                    assert_eq!(has_src, mode == BuildAccelerationStructureMode::Update);
                    Some(mode)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            modes,
            [
                BuildAccelerationStructureMode::Build,
                BuildAccelerationStructureMode::Update,
            ],
        );
    }

    #[test]
    #[should_panic(expected = "the bottom level must be built before the top level")]
    fn top_level_before_bottom_level() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = BottomLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty());
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        let _ = top_level.build(&mut backend, &mut pool, &bottom_level, 1, true);
    }

    #[test]
    #[should_panic(expected = "the bottom-level geometry changed")]
    fn entries_added_after_bottom_level_build() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let mut bottom_level = built_bottom_level(&mut backend, &mut pool, &[4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        bottom_level.prepare_geometry(
            [4, 4].map(|count| AccelerationStructureGeometryAabbsData::new(0x4000, count)),
        );

        let _ = top_level.build(&mut backend, &mut pool, &bottom_level, 1, true);
    }

    #[test]
    fn shared_hit_groups_ignore_ray_type_count() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = built_bottom_level(&mut backend, &mut pool, &[4, 4, 4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, u32::MAX, false)
            .unwrap();

        assert_eq!(top_level.instances.len(), 3);
        assert!(top_level
            .instances
            .iter()
            .all(|instance| instance.hit_group_contribution() == 0));
    }

    #[test]
    fn release_destroys_views() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let bottom_level = built_bottom_level(&mut backend, &mut pool, &[4]);
        let mut top_level = TopLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty(), false);

        top_level
            .build(&mut backend, &mut pool, &bottom_level, 1, true)
            .unwrap();
        top_level
            .build(&mut backend, &mut pool, &bottom_level, 2, true)
            .unwrap();
        assert_eq!(backend.view_count(), 2);

        top_level.release(&mut backend, &mut pool);
        assert_eq!(backend.view_count(), 0);
        assert!(top_level.entry(1).is_none());
        assert!(top_level.scratch.is_none());
    }
}
