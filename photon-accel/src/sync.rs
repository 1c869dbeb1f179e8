// Copyright (c) 2026 The photon-accel developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! Ordering of GPU work on buffers.
//!
//! The manager never waits for the device except at the two explicit flushes of a bottom-level
//! rebuild. Everything else is ordered by recording barriers between commands.

use ash::vk;

/// How a buffer is about to be accessed by the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferAccess {
    /// Read as the input of an acceleration structure build: bounding boxes or instances.
    AccelerationStructureBuildInput,

    /// Read as the source of a transfer.
    TransferSource,
}

impl BufferAccess {
    /// Returns the pipeline stages and access flags that the access happens in.
    pub fn dst_scope(self) -> (vk::PipelineStageFlags, vk::AccessFlags) {
        match self {
            BufferAccess::AccelerationStructureBuildInput => (
                vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                vk::AccessFlags::SHADER_READ,
            ),
            BufferAccess::TransferSource => (
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_READ,
            ),
        }
    }
}

/// A barrier on a single buffer.
#[derive(Debug)]
pub enum BufferBarrier<'a, R> {
    /// Makes previous writes to the buffer, from any stage or from the host, visible to the
    /// given access.
    Transition { buffer: &'a R, access: BufferAccess },

    /// Orders acceleration structure reads and writes on the buffer before the ones that follow.
    /// Used whenever a buffer is reused, and after a structure has been written so that later
    /// builds, copies and shaders see it.
    Hazard { buffer: &'a R },
}

impl<'a, R> BufferBarrier<'a, R> {
    /// Returns the buffer the barrier applies to.
    #[inline]
    pub fn buffer(&self) -> &'a R {
        match *self {
            BufferBarrier::Transition { buffer, .. } | BufferBarrier::Hazard { buffer } => buffer,
        }
    }

    /// Returns the source and destination scopes of the barrier, as pipeline stages and access
    /// flags.
    pub fn scopes(
        &self,
    ) -> (
        (vk::PipelineStageFlags, vk::AccessFlags),
        (vk::PipelineStageFlags, vk::AccessFlags),
    ) {
        match *self {
            BufferBarrier::Transition { access, .. } => (
                (
                    vk::PipelineStageFlags::ALL_COMMANDS | vk::PipelineStageFlags::HOST,
                    vk::AccessFlags::SHADER_WRITE
                        | vk::AccessFlags::TRANSFER_WRITE
                        | vk::AccessFlags::HOST_WRITE
                        | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
                ),
                access.dst_scope(),
            ),
            BufferBarrier::Hazard { .. } => {
                let access = vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR;

                (
                    (
                        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                        access | vk::AccessFlags::SHADER_WRITE,
                    ),
                    (
                        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
                            | vk::PipelineStageFlags::COMPUTE_SHADER
                            | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                        access | vk::AccessFlags::SHADER_READ,
                    ),
                )
            }
        }
    }
}
