// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use crate::{
    acceleration_structure::{
        AccelerationStructureGeometryAabbsData, BottomLevel, BottomLevelEntry, TopLevel,
    },
    backend::BindingTarget,
    buffer::{Buffer, BufferInfo, BufferPool, BufferRole},
    Backend, Id, NonExhaustive, VulkanError,
};
use ash::vk;
use smallvec::SmallVec;
use std::fmt;

/// A GPU buffer of bounding boxes, owned by the renderer.
///
/// The buffer holds `count` consecutive [`AabbPositions`](crate::AabbPositions). Its contents may
/// be rewritten every frame, as long as the writes are recorded before the manager's builds.
pub struct BoundingVolumeSet<'a, B: Backend + ?Sized> {
    buffer: &'a B::RawBuffer,
    count: u32,
}

impl<'a, B: Backend + ?Sized> BoundingVolumeSet<'a, B> {
    /// Returns a new `BoundingVolumeSet` over the first `count` boxes of `buffer`.
    ///
    /// # Panics
    ///
    /// - Panics if `count` is zero.
    #[inline]
    pub fn new(buffer: &'a B::RawBuffer, count: u32) -> Self {
        assert!(count != 0, "a bounding volume set must hold at least one box");

        BoundingVolumeSet { buffer, count }
    }

    #[inline]
    pub fn buffer(&self) -> &'a B::RawBuffer {
        self.buffer
    }

    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }
}

impl<B: Backend + ?Sized> Clone for BoundingVolumeSet<'_, B> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: Backend + ?Sized> Copy for BoundingVolumeSet<'_, B> {}

impl<B: Backend + ?Sized> fmt::Debug for BoundingVolumeSet<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundingVolumeSet")
            .field("buffer", self.buffer)
            .field("count", &self.count)
            .finish()
    }
}

/// Parameters to create a new `AccelerationStructureManager`.
#[derive(Clone, Debug)]
pub struct AccelerationStructureManagerCreateInfo {
    /// Flags of the bottom-level builds. `ALLOW_COMPACTION` is always added.
    ///
    /// The default value is `PREFER_FAST_TRACE`.
    pub bottom_level_flags: vk::BuildAccelerationStructureFlagsKHR,

    /// Flags of the top-level builds. `ALLOW_UPDATE` is added when `top_level_update` is set.
    ///
    /// The default value is `PREFER_FAST_TRACE`.
    pub top_level_flags: vk::BuildAccelerationStructureFlagsKHR,

    /// Flags of the bounding box geometries.
    ///
    /// The default value is `OPAQUE`.
    pub geometry_flags: vk::GeometryFlagsKHR,

    /// Whether top-level structures that were already built are updated in place, instead of
    /// being rebuilt from scratch every frame.
    ///
    /// The default value is `false`.
    pub top_level_update: bool,

    pub _ne: NonExhaustive,
}

impl Default for AccelerationStructureManagerCreateInfo {
    #[inline]
    fn default() -> Self {
        AccelerationStructureManagerCreateInfo {
            bottom_level_flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            top_level_flags: vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE,
            geometry_flags: vk::GeometryFlagsKHR::OPAQUE,
            top_level_update: false,
            _ne: NonExhaustive(()),
        }
    }
}

/// Builds and owns the acceleration structures over a set of bounding volumes.
///
/// The manager exclusively owns every buffer it allocates, and borrows the bounding volume
/// buffers for `'a`. Call [`destroy`](Self::destroy) to release everything; dropping the manager
/// instead leaks its buffers.
pub struct AccelerationStructureManager<'a, B: Backend + ?Sized> {
    bounding_volumes: SmallVec<[BoundingVolumeSet<'a, B>; 1]>,
    geometry_flags: vk::GeometryFlagsKHR,
    pool: BufferPool<B::RawBuffer>,
    bottom_level: BottomLevel,
    top_level: TopLevel<B::AccelerationStructureView>,
}

impl<'a, B: Backend + ?Sized> AccelerationStructureManager<'a, B> {
    /// Creates a new manager with one bottom-level acceleration structure per element of
    /// `bounding_volumes`.
    ///
    /// Nothing is allocated until the first build.
    ///
    /// # Panics
    ///
    /// - Panics if `bounding_volumes` is empty.
    pub fn new(
        backend: &B,
        bounding_volumes: impl IntoIterator<Item = BoundingVolumeSet<'a, B>>,
        create_info: AccelerationStructureManagerCreateInfo,
    ) -> Self {
        let AccelerationStructureManagerCreateInfo {
            bottom_level_flags,
            top_level_flags,
            geometry_flags,
            top_level_update,
            _ne: _,
        } = create_info;

        let mut manager = AccelerationStructureManager {
            bounding_volumes: SmallVec::new(),
            geometry_flags,
            pool: BufferPool::default(),
            bottom_level: BottomLevel::new(bottom_level_flags),
            top_level: TopLevel::new(top_level_flags, top_level_update),
        };
        manager.set_bounding_volumes(backend, bounding_volumes);

        manager
    }

    /// Replaces the bounding volume sets and marks the bottom level for a rebuild.
    ///
    /// Top-level structures that were already built keep their instance count. Building one of
    /// them again after the number of sets changed panics.
    ///
    /// # Panics
    ///
    /// - Panics if `bounding_volumes` is empty.
    pub fn set_bounding_volumes(
        &mut self,
        backend: &B,
        bounding_volumes: impl IntoIterator<Item = BoundingVolumeSet<'a, B>>,
    ) {
        self.bounding_volumes = bounding_volumes.into_iter().collect();

        assert!(
            !self.bounding_volumes.is_empty(),
            "the manager needs at least one bounding volume set",
        );

        self.prepare_geometry(backend);
        self.bottom_level.request_rebuild();
    }

    fn prepare_geometry(&mut self, backend: &B) {
        let geometry_flags = self.geometry_flags;

        self.bottom_level
            .prepare_geometry(self.bounding_volumes.iter().map(|set| {
                AccelerationStructureGeometryAabbsData {
                    flags: geometry_flags,
                    ..AccelerationStructureGeometryAabbsData::new(
                        backend.buffer_device_address(set.buffer),
                        set.count,
                    )
                }
            }));
    }

    /// Marks the bottom level for a rebuild on the next
    /// [`build_bottom_level`](Self::build_bottom_level).
    #[inline]
    pub fn request_bottom_level_rebuild(&mut self) {
        self.bottom_level.request_rebuild();
    }

    /// Rebuilds and compacts every bottom-level acceleration structure.
    pub fn build_acceleration_structures(&mut self, backend: &mut B) -> Result<(), VulkanError> {
        self.bottom_level.request_rebuild();

        self.build_bottom_level(backend)
    }

    /// Rebuilds the bottom level if a rebuild is pending. Either way, the bounding volume buffers
    /// are made visible to the builds that follow.
    pub fn build_bottom_level(&mut self, backend: &mut B) -> Result<(), VulkanError> {
        if self.bottom_level.is_rebuild_pending() {
            self.prepare_geometry(backend);
        }

        let sources = self
            .bounding_volumes
            .iter()
            .map(|set| set.buffer)
            .collect::<SmallVec<[_; 1]>>();

        self.bottom_level.build(backend, &mut self.pool, &sources)
    }

    /// Builds the top-level acceleration structure for `ray_type_count` over the current bottom
    /// level.
    ///
    /// With `per_geometry_hit_entry`, each bottom-level entry gets its own set of
    /// `ray_type_count` hit groups. Otherwise they all use the hit groups at index 0.
    ///
    /// # Panics
    ///
    /// - Panics if the bottom level was never built.
    /// - Panics if the bounding volume sets were replaced and the bottom level was not rebuilt
    ///   since.
    /// - Panics if the number of bottom-level entries changed since the top level for
    ///   `ray_type_count` was first built.
    pub fn build_top_level(
        &mut self,
        backend: &mut B,
        ray_type_count: u32,
        per_geometry_hit_entry: bool,
    ) -> Result<(), VulkanError> {
        self.top_level.build(
            backend,
            &mut self.pool,
            &self.bottom_level,
            ray_type_count,
            per_geometry_hit_entry,
        )
    }

    /// Rebuilds everything for this frame: the bottom level, then the top level for
    /// `ray_type_count` with one hit-group entry per geometry.
    pub fn build(&mut self, backend: &mut B, ray_type_count: u32) -> Result<(), VulkanError> {
        self.build_acceleration_structures(backend)?;
        self.build_top_level(backend, ray_type_count, true)
    }

    /// Binds the view of the top level for `ray_type_count` to the binding called `name`.
    ///
    /// # Panics
    ///
    /// - Panics if no top level was built for `ray_type_count`.
    pub fn bind_read_only_view<T>(&self, target: &mut T, name: &str, ray_type_count: u32)
    where
        T: BindingTarget<B> + ?Sized,
    {
        let view = match self.top_level.entry(ray_type_count).and_then(|entry| entry.view()) {
            Some(view) => view,
            None => panic!(
                "no top-level acceleration structure was built for ray-type count {}",
                ray_type_count,
            ),
        };

        target.bind_acceleration_structure(name, view);
    }

    /// Returns the storage buffer of the top level for `ray_type_count`, if it was built.
    #[inline]
    pub fn top_level_buffer(&self, ray_type_count: u32) -> Option<Id<Buffer>> {
        self.top_level
            .entry(ray_type_count)
            .map(|entry| entry.storage())
    }

    /// Returns the number of instances of the top level for `ray_type_count`, if it was built.
    #[inline]
    pub fn top_level_instance_count(&self, ray_type_count: u32) -> Option<u32> {
        self.top_level
            .entry(ray_type_count)
            .map(|entry| entry.instance_count())
    }

    /// Returns the ray-type counts that a top level was built for, in no particular order.
    #[inline]
    pub fn top_level_keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.top_level.keys()
    }

    /// Returns the buffer holding every compacted bottom-level acceleration structure.
    #[inline]
    pub fn bottom_level_store(&self) -> Option<Id<Buffer>> {
        self.bottom_level.store()
    }

    #[inline]
    pub fn bottom_level_entries(&self) -> &[BottomLevelEntry] {
        self.bottom_level.entries()
    }

    /// Returns information about a buffer owned by the manager, or `None` if it was released.
    #[inline]
    pub fn buffer_info(&self, id: Id<Buffer>) -> Option<BufferInfo> {
        self.pool.info(id)
    }

    /// Returns how many buffers were allocated for `role` since the manager was created.
    #[inline]
    pub fn allocation_count(&self, role: BufferRole) -> u32 {
        self.pool.allocation_count(role)
    }

    /// Destroys every view and buffer owned by the manager.
    pub fn destroy(mut self, backend: &mut B) {
        self.top_level.release(backend, &mut self.pool);
        self.bottom_level.release(backend, &mut self.pool);
        self.pool.clear(backend);
    }
}

impl<B: Backend + ?Sized> Drop for AccelerationStructureManager<'_, B> {
    fn drop(&mut self) {
        if self.pool.len() != 0 {
            tracing::warn!(
                buffers = self.pool.len(),
                "acceleration structure manager dropped without being destroyed, leaking its \
                buffers",
            );
        }
    }
}

impl<B: Backend + ?Sized> fmt::Debug for AccelerationStructureManager<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccelerationStructureManager")
            .field("bounding_volumes", &self.bounding_volumes)
            .field("pool", &self.pool)
            .field("bottom_level", &self.bottom_level)
            .field("top_level", &self.top_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AccelerationStructureManager, AccelerationStructureManagerCreateInfo, BoundingVolumeSet,
    };
    use crate::{
        acceleration_structure::ACCELERATION_STRUCTURE_ALIGNMENT,
        tests::{init_tracing, Command, MockBackend, MockBindings, MockBuffer},
        AabbPositions, Backend, BufferCreateInfo, BufferRole, BuildAccelerationStructureMode,
        MemoryLocation, VulkanError,
    };
    use ash::vk;

    fn bounding_boxes(backend: &mut MockBackend, count: u32) -> <MockBackend as Backend>::RawBuffer {
        let boxes = (0..count)
            .map(|i| {
                let x = i as f32;
                AabbPositions::new([x, 0.0, 0.0], [x + 0.5, 0.5, 0.5])
            })
            .collect::<Vec<_>>();

        backend
            .create_buffer(&BufferCreateInfo {
                size: u64::from(count) * AabbPositions::STRIDE,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                location: MemoryLocation::Upload,
                initial_data: Some(bytemuck::cast_slice(&boxes)),
            })
            .unwrap()
    }

    #[test]
    fn two_ray_type_counts() {
        init_tracing();

        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 4);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 4)],
            Default::default(),
        );

        manager.build_acceleration_structures(&mut backend).unwrap();
        manager.build_top_level(&mut backend, 1, true).unwrap();
        manager.build_top_level(&mut backend, 2, true).unwrap();

        let mut keys = manager.top_level_keys().collect::<Vec<_>>();
        keys.sort_unstable();
        assert_eq!(keys, [1, 2]);
        assert_eq!(manager.top_level_instance_count(1), Some(1));
        assert_eq!(manager.top_level_instance_count(2), Some(1));
        assert_ne!(manager.top_level_buffer(1), manager.top_level_buffer(2));

        let mut bindings = MockBindings::default();
        manager.bind_read_only_view(&mut bindings, "visiblePointsAS", 1);
        manager.bind_read_only_view(&mut bindings, "visiblePointsAS", 2);
        assert_eq!(bindings.bound.len(), 2);
        assert_ne!(bindings.bound[0].1, bindings.bound[1].1);

        // A single entry has a contribution of 0, whatever the ray-type count.
        let contributions = backend
            .built_instances()
            .iter()
            .map(|instance| instance.hit_group_contribution())
            .collect::<Vec<_>>();
        assert_eq!(contributions, [0, 0]);

        manager.destroy(&mut backend);
        assert_eq!(backend.live_buffer_count(), 1);
        assert_eq!(backend.view_count(), 0);
    }

    #[test]
    fn per_frame_build() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 64);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 64)],
            Default::default(),
        );

        for _ in 0..3 {
            manager.build(&mut backend, 1).unwrap();
        }

        assert_eq!(manager.allocation_count(BufferRole::BottomLevelScratch), 3);
        assert_eq!(manager.allocation_count(BufferRole::BottomLevelIntermediate), 1);
        assert_eq!(manager.allocation_count(BufferRole::BottomLevelStore), 1);
        assert_eq!(manager.allocation_count(BufferRole::CompactedSizeQuery), 3);
        assert_eq!(manager.allocation_count(BufferRole::TopLevelScratch), 1);
        assert_eq!(manager.allocation_count(BufferRole::TopLevelStorage), 1);
        assert_eq!(manager.allocation_count(BufferRole::TopLevelInstances), 1);

        let entries = manager.bottom_level_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].build_info().flags,
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
                | vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION,
        );

        let store = manager.buffer_info(manager.bottom_level_store().unwrap()).unwrap();
        assert_eq!(store.role, BufferRole::BottomLevelStore);
        assert_eq!(store.size % ACCELERATION_STRUCTURE_ALIGNMENT, 0);

        manager.destroy(&mut backend);
    }

    #[test]
    fn bottom_level_rebuild_on_request() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 8);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 8)],
            Default::default(),
        );

        manager.build_bottom_level(&mut backend).unwrap();
        manager.build_bottom_level(&mut backend).unwrap();
        assert_eq!(manager.allocation_count(BufferRole::BottomLevelScratch), 1);

        manager.request_bottom_level_rebuild();
        manager.build_bottom_level(&mut backend).unwrap();
        assert_eq!(manager.allocation_count(BufferRole::BottomLevelScratch), 2);

        manager.destroy(&mut backend);
    }

    #[test]
    fn stale_ids_after_growth() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 16);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 16)],
            Default::default(),
        );

        backend.set_compaction_ratio(1, 4);
        manager.build_acceleration_structures(&mut backend).unwrap();
        let first = manager.bottom_level_store().unwrap();

        backend.set_compaction_ratio(1, 1);
        manager.build_acceleration_structures(&mut backend).unwrap();
        let second = manager.bottom_level_store().unwrap();

        assert_ne!(first, second);
        assert!(manager.buffer_info(first).is_none());
        assert!(manager.buffer_info(second).is_some());

        manager.destroy(&mut backend);
    }

    #[test]
    fn update_mode_issues_updates() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 4);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 4)],
            AccelerationStructureManagerCreateInfo {
                top_level_update: true,
                ..Default::default()
            },
        );

        manager.build(&mut backend, 1).unwrap();
        manager.build(&mut backend, 1).unwrap();

        let top_level_modes = backend
            .take_commands()
            .into_iter()
            .filter_map(|command| match command {
                Command::Build {
                    ty: crate::AccelerationStructureType::TopLevel,
                    mode,
                    ..
                } => Some(mode),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(
            top_level_modes,
            [
                BuildAccelerationStructureMode::Build,
                BuildAccelerationStructureMode::Update,
            ],
        );

        manager.destroy(&mut backend);
    }

    #[test]
    fn allocation_failure_propagates() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 4);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 4)],
            Default::default(),
        );

        backend.fail_allocations(true);
        assert_eq!(
            manager.build(&mut backend, 1),
            Err(VulkanError::OutOfDeviceMemory),
        );
        assert!(manager.bottom_level_store().is_none());

        backend.fail_allocations(false);
        manager.build(&mut backend, 1).unwrap();
        assert!(manager.top_level_buffer(1).is_some());

        manager.destroy(&mut backend);
    }

    #[test]
    fn bind_before_build() {
        let backend = MockBackend::new();
        let boxes = MockBuffer(0);
        let manager = AccelerationStructureManager::<MockBackend>::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 4)],
            Default::default(),
        );
        let mut bindings = MockBindings::default();

        assert_should_panic!(
            "no top-level acceleration structure was built for ray-type count 1",
            {
                manager.bind_read_only_view(&mut bindings, "visiblePointsAS", 1);
            }
        );
    }

    #[test]
    #[should_panic(expected = "the number of instances changed")]
    fn instance_count_change() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 8);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 8)],
            Default::default(),
        );

        manager.build(&mut backend, 1).unwrap();

        manager.set_bounding_volumes(
            &backend,
            [
                BoundingVolumeSet::new(&boxes, 4),
                BoundingVolumeSet::new(&boxes, 4),
            ],
        );
        let _ = manager.build(&mut backend, 1);
    }

    #[test]
    #[should_panic(expected = "the bottom-level geometry changed")]
    fn top_level_after_new_sets_without_rebuild() {
        let mut backend = MockBackend::new();
        let boxes = bounding_boxes(&mut backend, 8);
        let mut manager = AccelerationStructureManager::new(
            &backend,
            [BoundingVolumeSet::new(&boxes, 8)],
            Default::default(),
        );

        manager.build_bottom_level(&mut backend).unwrap();

        manager.set_bounding_volumes(
            &backend,
            [
                BoundingVolumeSet::new(&boxes, 4),
                BoundingVolumeSet::new(&boxes, 4),
            ],
        );
        let _ = manager.build_top_level(&mut backend, 1, true);
    }

    #[test]
    #[should_panic(expected = "at least one box")]
    fn empty_bounding_volume_set() {
        let boxes = MockBuffer(0);
        BoundingVolumeSet::<MockBackend>::new(&boxes, 0);
    }
}
