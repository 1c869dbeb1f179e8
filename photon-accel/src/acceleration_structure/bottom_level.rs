// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

use super::{
    AccelerationStructureBuildGeometryInfo, AccelerationStructureBuildSizes,
    AccelerationStructureGeometries, AccelerationStructureGeometryAabbsData,
    CopyAccelerationStructureMode, ACCELERATION_STRUCTURE_ALIGNMENT, COMPACTED_SIZE_STRIDE,
};
use crate::{
    align_up,
    backend::{BufferRange, BuildAccelerationStructureInfo, CopyAccelerationStructureInfo},
    buffer::{Buffer, BufferPool, BufferRole, Reserved},
    sync::{BufferAccess, BufferBarrier},
    Backend, DeviceSize, Id, VulkanError,
};
use ash::vk;

/// One bottom-level acceleration structure, built over one group of bounding boxes.
#[derive(Clone, Debug, PartialEq)]
pub struct BottomLevelEntry {
    build_info: AccelerationStructureBuildGeometryInfo,
    build_sizes: AccelerationStructureBuildSizes,
    scratch_offset: DeviceSize,
    intermediate_offset: DeviceSize,
    compacted_size: DeviceSize,
    store_offset: DeviceSize,
}

impl BottomLevelEntry {
    fn new(
        geometry: AccelerationStructureGeometryAabbsData,
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> Self {
        BottomLevelEntry {
            build_info: AccelerationStructureBuildGeometryInfo::bottom_level(vec![geometry], flags),
            build_sizes: AccelerationStructureBuildSizes::default(),
            scratch_offset: 0,
            intermediate_offset: 0,
            compacted_size: 0,
            store_offset: 0,
        }
    }

    /// Returns the build description of the entry.
    #[inline]
    pub fn build_info(&self) -> &AccelerationStructureBuildGeometryInfo {
        &self.build_info
    }

    /// Returns the sizes the device reported before the last rebuild.
    #[inline]
    pub fn build_sizes(&self) -> &AccelerationStructureBuildSizes {
        &self.build_sizes
    }

    /// Returns the offset of the entry's region of the scratch buffer, during the last rebuild.
    #[inline]
    pub fn scratch_offset(&self) -> DeviceSize {
        self.scratch_offset
    }

    /// Returns the offset the entry was built at in the intermediate buffer, before compaction.
    #[inline]
    pub fn intermediate_offset(&self) -> DeviceSize {
        self.intermediate_offset
    }

    /// Returns the compacted size of the entry's acceleration structure.
    #[inline]
    pub fn compacted_size(&self) -> DeviceSize {
        self.compacted_size
    }

    /// Returns the offset of the entry's acceleration structure in the packed store.
    #[inline]
    pub fn store_offset(&self) -> DeviceSize {
        self.store_offset
    }
}

/// The bottom level: its entries and the buffers they are built in.
#[derive(Debug)]
pub(crate) struct BottomLevel {
    entries: Vec<BottomLevelEntry>,
    flags: vk::BuildAccelerationStructureFlagsKHR,
    scratch: Option<Id<Buffer>>,
    intermediate: Option<Id<Buffer>>,
    store: Option<Id<Buffer>>,
    store_size: DeviceSize,
    built_entry_count: usize,
    rebuild_pending: bool,
}

impl BottomLevel {
    pub fn new(flags: vk::BuildAccelerationStructureFlagsKHR) -> Self {
        BottomLevel {
            entries: Vec::new(),
            // The final size is only known after the build, so compaction is always on.
            flags: flags | vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION,
            scratch: None,
            intermediate: None,
            store: None,
            store_size: 0,
            built_entry_count: 0,
            rebuild_pending: true,
        }
    }

    #[inline]
    pub fn entries(&self) -> &[BottomLevelEntry] {
        &self.entries
    }

    #[inline]
    pub fn store(&self) -> Option<Id<Buffer>> {
        self.store
    }

    /// Returns the number of entries that the last completed rebuild compacted into the store.
    #[inline]
    pub fn built_entry_count(&self) -> usize {
        self.built_entry_count
    }

    #[inline]
    pub fn is_rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    #[inline]
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    /// Sets the geometry of each entry, one entry per element of `geometries`.
    ///
    /// Only the descriptions are touched; sizes and offsets are recomputed by the next rebuild.
    pub fn prepare_geometry(
        &mut self,
        geometries: impl IntoIterator<Item = AccelerationStructureGeometryAabbsData>,
    ) {
        let mut len = 0;

        for geometry in geometries {
            match self.entries.get_mut(len) {
                Some(entry) => {
                    entry.build_info.flags = self.flags;
                    entry.build_info.geometries =
                        AccelerationStructureGeometries::Aabbs(vec![geometry]);
                }
                None => self.entries.push(BottomLevelEntry::new(geometry, self.flags)),
            }

            len += 1;
        }

        self.entries.truncate(len);
    }

    /// Rebuilds every entry if a rebuild is pending, and compacts them into the store.
    ///
    /// `sources` are the buffers holding the bounding boxes; they are transitioned for reading
    /// in every case.
    pub fn build<B>(
        &mut self,
        backend: &mut B,
        pool: &mut BufferPool<B::RawBuffer>,
        sources: &[&B::RawBuffer],
    ) -> Result<(), VulkanError>
    where
        B: Backend + ?Sized,
    {
        for &buffer in sources {
            backend.cmd_buffer_barrier(&BufferBarrier::Transition {
                buffer,
                access: BufferAccess::AccelerationStructureBuildInput,
            });
        }

        if !self.rebuild_pending {
            return Ok(());
        }

        assert!(
            !self.entries.is_empty(),
            "there is no bottom-level geometry to build",
        );

        self.built_entry_count = 0;

        let mut total_max_size = 0;
        let mut total_scratch_size = 0;

        for entry in &mut self.entries {
            entry.build_sizes = backend.acceleration_structure_build_sizes(&entry.build_info);

            entry.intermediate_offset = total_max_size;
            total_max_size += align_up(
                entry.build_sizes.acceleration_structure_size,
                ACCELERATION_STRUCTURE_ALIGNMENT,
            );

            entry.scratch_offset = total_scratch_size;
            total_scratch_size += align_up(
                entry.build_sizes.max_scratch_size(),
                ACCELERATION_STRUCTURE_ALIGNMENT,
            );
        }

        if pool.reserve(
            backend,
            &mut self.scratch,
            BufferRole::BottomLevelScratch,
            total_scratch_size,
        )? == Reserved::Reused
        {
            hazard(backend, pool, self.scratch);
        }

        if pool.reserve(
            backend,
            &mut self.intermediate,
            BufferRole::BottomLevelIntermediate,
            total_max_size,
        )? == Reserved::Reused
        {
            hazard(backend, pool, self.intermediate);
        }

        let query_size = self.entries.len() as DeviceSize * COMPACTED_SIZE_STRIDE;
        let query = pool.allocate(backend, BufferRole::CompactedSizeQuery, query_size, None)?;
        let readback = match pool.allocate(
            backend,
            BufferRole::CompactedSizeReadback,
            query_size,
            None,
        ) {
            Ok(id) => id,
            Err(err) => {
                pool.release(backend, query);
                return Err(err);
            }
        };

        let compacted_sizes = self.build_intermediate(backend, pool, query, readback);

        pool.release(backend, query);
        pool.release(backend, readback);

        let total_compacted_size = self.record_compacted_sizes(&compacted_sizes?);

        if pool.reserve(
            backend,
            &mut self.store,
            BufferRole::BottomLevelStore,
            total_compacted_size,
        )? == Reserved::Reused
        {
            hazard(backend, pool, self.store);
        }

        self.compact(backend, pool)?;

        assert_eq!(
            self.store_size, total_compacted_size,
            "the compacted acceleration structures don't fill the store exactly",
        );

        hazard(backend, pool, self.store);

        if let Some(scratch) = self.scratch.take() {
            pool.release(backend, scratch);
        }

        self.built_entry_count = self.entries.len();
        self.rebuild_pending = false;

        tracing::debug!(
            entries = self.entries.len(),
            intermediate_size = total_max_size,
            compacted_size = total_compacted_size,
            store_capacity = pool.state(self.store.unwrap_or(Id::INVALID)).size(),
            "rebuilt bottom-level acceleration structures",
        );

        Ok(())
    }

    /// Builds every entry into the intermediate buffer and reads back the compacted sizes.
    ///
    /// This waits for the device twice: once for the builds, once for the copy of the sizes into
    /// host-visible memory. Nothing else could overlap with it, and it only runs on rebuilds.
    fn build_intermediate<B>(
        &self,
        backend: &mut B,
        pool: &BufferPool<B::RawBuffer>,
        query: Id<Buffer>,
        readback: Id<Buffer>,
    ) -> Result<Vec<u64>, VulkanError>
    where
        B: Backend + ?Sized,
    {
        let scratch = pool.state(self.scratch.unwrap_or(Id::INVALID)).raw();
        let intermediate = pool.state(self.intermediate.unwrap_or(Id::INVALID)).raw();
        let query = pool.state(query);
        let readback = pool.state(readback).raw();

        for (index, entry) in self.entries.iter().enumerate() {
            backend.cmd_build_acceleration_structure(&BuildAccelerationStructureInfo {
                geometry: &entry.build_info,
                src: None,
                dst: BufferRange {
                    buffer: intermediate,
                    offset: entry.intermediate_offset,
                    size: entry.build_sizes.acceleration_structure_size,
                },
                scratch: BufferRange {
                    buffer: scratch,
                    offset: entry.scratch_offset,
                    size: entry.build_sizes.max_scratch_size(),
                },
                compacted_size: Some(BufferRange {
                    buffer: query.raw(),
                    offset: index as DeviceSize * COMPACTED_SIZE_STRIDE,
                    size: COMPACTED_SIZE_STRIDE,
                }),
            })?;
        }

        backend.flush()?;

        backend.cmd_buffer_barrier(&BufferBarrier::Transition {
            buffer: query.raw(),
            access: BufferAccess::TransferSource,
        });
        backend.cmd_copy_buffer(query.raw(), readback, query.size());

        backend.flush()?;

        let mut compacted_sizes = vec![0u64; self.entries.len()];
        backend.read_buffer(readback, 0, bytemuck::cast_slice_mut(&mut compacted_sizes))?;

        Ok(compacted_sizes)
    }

    /// Stores the compacted size of each entry and returns the aligned total.
    fn record_compacted_sizes(&mut self, compacted_sizes: &[u64]) -> DeviceSize {
        assert_eq!(compacted_sizes.len(), self.entries.len());

        let mut total = 0;

        for (entry, &compacted_size) in self.entries.iter_mut().zip(compacted_sizes) {
            assert!(
                compacted_size != 0,
                "the device reported an empty compacted acceleration structure",
            );
            assert!(
                compacted_size <= entry.build_sizes.acceleration_structure_size,
                "the compacted size ({}) exceeds the size estimated before the build ({})",
                compacted_size,
                entry.build_sizes.acceleration_structure_size,
            );

            entry.compacted_size = compacted_size;
            total += align_up(compacted_size, ACCELERATION_STRUCTURE_ALIGNMENT);
        }

        total
    }

    /// Copies every entry from the intermediate buffer to its final place in the store.
    fn compact<B>(
        &mut self,
        backend: &mut B,
        pool: &BufferPool<B::RawBuffer>,
    ) -> Result<(), VulkanError>
    where
        B: Backend + ?Sized,
    {
        hazard(backend, pool, self.intermediate);

        let intermediate = pool.state(self.intermediate.unwrap_or(Id::INVALID)).raw();
        let store = pool.state(self.store.unwrap_or(Id::INVALID)).raw();
        let mut offset = 0;

        for entry in &mut self.entries {
            backend.cmd_copy_acceleration_structure(&CopyAccelerationStructureInfo {
                src: BufferRange {
                    buffer: intermediate,
                    offset: entry.intermediate_offset,
                    size: entry.build_sizes.acceleration_structure_size,
                },
                dst: BufferRange {
                    buffer: store,
                    offset,
                    size: entry.compacted_size,
                },
                mode: CopyAccelerationStructureMode::Compact,
            })?;

            entry.store_offset = offset;
            offset += align_up(entry.compacted_size, ACCELERATION_STRUCTURE_ALIGNMENT);
        }

        self.store_size = offset;

        Ok(())
    }

    /// Releases every buffer of the bottom level.
    pub fn release<B>(&mut self, backend: &mut B, pool: &mut BufferPool<B::RawBuffer>)
    where
        B: Backend + ?Sized,
    {
        for id in [
            self.scratch.take(),
            self.intermediate.take(),
            self.store.take(),
        ]
        .into_iter()
        .flatten()
        {
            pool.release(backend, id);
        }

        self.store_size = 0;
        self.rebuild_pending = true;
    }
}

fn hazard<B>(backend: &mut B, pool: &BufferPool<B::RawBuffer>, id: Option<Id<Buffer>>)
where
    B: Backend + ?Sized,
{
    let buffer = pool.state(id.unwrap_or(Id::INVALID)).raw();

    backend.cmd_buffer_barrier(&BufferBarrier::Hazard { buffer });
}

#[cfg(test)]
mod tests {
    use super::BottomLevel;
    use crate::{
        acceleration_structure::{
            AccelerationStructureGeometryAabbsData, ACCELERATION_STRUCTURE_ALIGNMENT,
        },
        buffer::{BufferPool, BufferRole},
        tests::{Command, MockBackend},
        Backend, BufferCreateInfo,
    };
    use ash::vk;

    fn bottom_level(counts: &[u32]) -> BottomLevel {
        let mut bottom_level = BottomLevel::new(vk::BuildAccelerationStructureFlagsKHR::empty());
        bottom_level.prepare_geometry(counts.iter().enumerate().map(|(index, &count)| {
            let address = 0x10_0000 * (index as u64 + 1);
            AccelerationStructureGeometryAabbsData::new(address, count)
        }));

        bottom_level
    }

    fn source(backend: &mut MockBackend) -> <MockBackend as Backend>::RawBuffer {
        backend
            .create_buffer(&BufferCreateInfo::for_role(BufferRole::TopLevelInstances, 1024))
            .unwrap()
    }

    #[test]
    fn offsets_are_aligned_and_packed() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let source = source(&mut backend);
        let mut bottom_level = bottom_level(&[4, 100, 37]);

        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();

        let mut expected_offset = 0;

        for entry in bottom_level.entries() {
            assert_eq!(entry.scratch_offset() % ACCELERATION_STRUCTURE_ALIGNMENT, 0);
            assert_eq!(
                entry.intermediate_offset() % ACCELERATION_STRUCTURE_ALIGNMENT,
                0,
            );
            assert_eq!(entry.store_offset() % ACCELERATION_STRUCTURE_ALIGNMENT, 0);
            assert!(entry.compacted_size() <= entry.build_sizes().acceleration_structure_size);
            assert_eq!(entry.store_offset(), expected_offset);

            expected_offset += crate::align_up(
                entry.compacted_size(),
                ACCELERATION_STRUCTURE_ALIGNMENT,
            );
        }

        assert_eq!(bottom_level.store_size, expected_offset);
        assert!(!bottom_level.is_rebuild_pending());
    }

    #[test]
    fn rebuild_sequence() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let source = source(&mut backend);
        let mut bottom_level = bottom_level(&[16]);

        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();

        let commands = backend.take_commands();
        let builds = commands
            .iter()
            .filter(|command| matches!(command, Command::Build { .. }))
            .count();
        let copies = commands
            .iter()
            .filter(|command| matches!(command, Command::CopyAccelerationStructure { .. }))
            .count();
        let flushes = commands
            .iter()
            .filter(|command| matches!(command, Command::Flush))
            .count();

        assert_eq!(builds, 1);
        assert_eq!(copies, 1);
        assert_eq!(flushes, 2);
        assert!(matches!(commands[0], Command::Transition { .. }));
        assert!(matches!(commands.last(), Some(Command::Hazard { .. })));

        // Scratch and query buffers don't outlive the rebuild.
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.allocation_count(BufferRole::CompactedSizeQuery), 1);
        assert_eq!(pool.allocation_count(BufferRole::CompactedSizeReadback), 1);
    }

    #[test]
    fn no_rebuild_pending_only_transitions() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let source = source(&mut backend);
        let mut bottom_level = bottom_level(&[16]);

        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();
        backend.take_commands();

        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();

        let commands = backend.take_commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(commands[0], Command::Transition { .. }));
    }

    #[test]
    fn store_never_shrinks() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let source = source(&mut backend);
        let mut bottom_level = bottom_level(&[64]);

        backend.set_compaction_ratio(1, 4);
        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();
        let first_capacity = pool.info(bottom_level.store().unwrap()).unwrap().size;

        backend.set_compaction_ratio(3, 4);
        bottom_level.request_rebuild();
        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();
        let grown = bottom_level.store().unwrap();
        let grown_capacity = pool.info(grown).unwrap().size;
        assert!(grown_capacity > first_capacity);
        assert_eq!(pool.allocation_count(BufferRole::BottomLevelStore), 2);

        backend.set_compaction_ratio(1, 8);
        bottom_level.request_rebuild();
        bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .unwrap();
        assert_eq!(bottom_level.store(), Some(grown));
        assert_eq!(pool.info(grown).unwrap().size, grown_capacity);
        assert!(bottom_level.store_size < grown_capacity);
        assert_eq!(pool.allocation_count(BufferRole::BottomLevelStore), 2);
    }

    #[test]
    #[should_panic(expected = "exceeds the size estimated before the build")]
    fn compacted_size_over_estimate() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let source = source(&mut backend);
        let mut bottom_level = bottom_level(&[8]);

        backend.set_compaction_ratio(2, 1);
        let _ = bottom_level.build(&mut backend, &mut pool, &[&source]);
    }

    #[test]
    fn allocation_failure_releases_query_buffers() {
        let mut backend = MockBackend::new();
        let mut pool = BufferPool::default();
        let source = source(&mut backend);
        let mut bottom_level = bottom_level(&[8]);

        // Scratch, intermediate and query succeed, the readback buffer fails.
        backend.fail_allocations_after(3);
        assert!(bottom_level
            .build(&mut backend, &mut pool, &[&source])
            .is_err());
        assert_eq!(pool.allocation_count(BufferRole::CompactedSizeQuery), 1);
        assert_eq!(pool.len(), 2);
        assert!(bottom_level.is_rebuild_pending());
    }
}
