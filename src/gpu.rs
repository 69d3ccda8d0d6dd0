//! The graphics-device collaborator interface.
//!
//! The renderer core never owns a device; everything it needs from one is
//! expressed here so a backend (or a test double) can be plugged in behind
//! the trait. Buffer writes model map/unmap and are the only operations the
//! frame loop treats as fallible: a failed write degrades to "skip the rest
//! of this camera's work this frame".

use bitflags::bitflags;
use thiserror::Error;

use crate::handles::{BufferId, MaterialId, ProgramId, QueryId, ResourceId, VisualId};

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("buffer {0:?} mapping failed")]
    MapFailed(BufferId),
    #[error("write of {size} bytes exceeds capacity {capacity} of buffer {buffer:?}")]
    WriteOutOfBounds { buffer: BufferId, size: u64, capacity: u64 },
    #[error("out of device memory allocating '{label}' ({size} bytes)")]
    OutOfMemory { label: String, size: u64 },
    #[error("device lost")]
    DeviceLost,
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct BufferUsage: u32 {
        const UNIFORM = 1 << 0;
        const STORAGE = 1 << 1;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct ClearFlags: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum DepthTest {
    #[default]
    LessEqual,
    Less,
    Equal,
    Always,
    Disabled,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum BlendMode {
    #[default]
    Replace,
    Alpha,
    Additive,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum CullMode {
    #[default]
    Back,
    Front,
    None,
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct RenderState {
    pub depth_test: DepthTest,
    pub depth_write: bool,
    pub blend: BlendMode,
    pub cull: CullMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: DepthTest::default(),
            depth_write: true,
            blend: BlendMode::default(),
            cull: CullMode::default(),
        }
    }
}

/// Result of a resolved disjoint timing query.
#[derive(Clone, Copy, Debug)]
pub struct DisjointTiming {
    /// Timestamp ticks per second.
    pub frequency: u64,
    /// True when the GPU clock was interrupted during the window; timestamp
    /// deltas from that window are meaningless.
    pub disjoint: bool,
}

pub trait RenderDevice {
    fn create_buffer(&mut self, label: &str, size: u64, usage: BufferUsage)
        -> Result<BufferId, GpuError>;
    fn destroy_buffer(&mut self, buffer: BufferId);
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError>;

    fn bind_program(&mut self, program: ProgramId);
    fn bind_resources(&mut self, first_slot: u32, resources: &[ResourceId]);
    fn bind_storage(&mut self, first_slot: u32, resources: &[ResourceId]);
    fn bind_storage_buffer(&mut self, slot: u32, buffer: BufferId);
    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferId);
    fn bind_material(&mut self, material: MaterialId);
    fn bind_visual(&mut self, visual: VisualId);
    fn set_render_state(&mut self, state: &RenderState);

    fn bind_targets(&mut self, colors: &[ResourceId], depth: Option<ResourceId>);
    fn unbind_targets(&mut self);
    fn unbind_resources(&mut self, first_slot: u32, count: u32);
    fn clear_bound_targets(&mut self, flags: ClearFlags, color: [f32; 4], depth: f32);
    fn copy_resource(&mut self, src: ResourceId, dst: ResourceId);

    fn draw(&mut self, vertex_count: u32, instance_count: u32);
    /// Full-screen triangle: three vertices, no vertex or index buffers.
    fn draw_fullscreen(&mut self);
    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32);

    fn create_timestamp_query(&mut self) -> QueryId;
    fn create_disjoint_query(&mut self) -> QueryId;
    fn begin_disjoint_query(&mut self, query: QueryId);
    fn end_disjoint_query(&mut self, query: QueryId);
    fn write_timestamp(&mut self, query: QueryId);
    /// Polls a disjoint query; `None` while the GPU has not produced the
    /// result yet. Never blocks.
    fn disjoint_result(&mut self, query: QueryId) -> Option<DisjointTiming>;
    fn timestamp_result(&mut self, query: QueryId) -> Option<u64>;
}

/// A GPU buffer that grows by doubling and never shrinks within a frame.
pub struct GrowableBuffer {
    label: &'static str,
    usage: BufferUsage,
    id: BufferId,
    capacity: u64,
}

impl GrowableBuffer {
    const MIN_CAPACITY: u64 = 256;

    pub fn new(label: &'static str, usage: BufferUsage) -> Self {
        Self { label, usage, id: BufferId::INVALID, capacity: 0 }
    }

    pub fn id(&self) -> Option<BufferId> {
        self.id.is_valid().then_some(self.id)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn ensure(&mut self, device: &mut dyn RenderDevice, size: u64) -> Result<BufferId, GpuError> {
        if self.id.is_valid() && self.capacity >= size {
            return Ok(self.id);
        }
        let mut capacity = self.capacity.max(Self::MIN_CAPACITY);
        while capacity < size {
            capacity *= 2;
        }
        let new_id = device.create_buffer(self.label, capacity, self.usage)?;
        if self.id.is_valid() {
            device.destroy_buffer(self.id);
        }
        self.id = new_id;
        self.capacity = capacity;
        Ok(new_id)
    }

    pub fn write(&mut self, device: &mut dyn RenderDevice, data: &[u8]) -> Result<BufferId, GpuError> {
        let id = self.ensure(device, (data.len() as u64).max(1))?;
        device.write_buffer(id, 0, data)?;
        Ok(id)
    }
}

/// A device that accepts everything and draws nothing. Used for headless
/// operation (dedicated servers, CI) and as a base for test doubles.
#[derive(Default)]
pub struct NullDevice {
    next_buffer: u32,
    next_query: u32,
    pub created_sizes: Vec<u64>,
    pub destroyed_buffers: u32,
}

impl RenderDevice for NullDevice {
    fn create_buffer(&mut self, _label: &str, size: u64, _usage: BufferUsage) -> Result<BufferId, GpuError> {
        self.created_sizes.push(size);
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        Ok(id)
    }

    fn destroy_buffer(&mut self, _buffer: BufferId) {
        self.destroyed_buffers += 1;
    }

    fn write_buffer(&mut self, _buffer: BufferId, _offset: u64, _data: &[u8]) -> Result<(), GpuError> {
        Ok(())
    }

    fn bind_program(&mut self, _program: ProgramId) {}
    fn bind_resources(&mut self, _first_slot: u32, _resources: &[ResourceId]) {}
    fn bind_storage(&mut self, _first_slot: u32, _resources: &[ResourceId]) {}
    fn bind_storage_buffer(&mut self, _slot: u32, _buffer: BufferId) {}
    fn bind_constant_buffer(&mut self, _slot: u32, _buffer: BufferId) {}
    fn bind_material(&mut self, _material: MaterialId) {}
    fn bind_visual(&mut self, _visual: VisualId) {}
    fn set_render_state(&mut self, _state: &RenderState) {}
    fn bind_targets(&mut self, _colors: &[ResourceId], _depth: Option<ResourceId>) {}
    fn unbind_targets(&mut self) {}
    fn unbind_resources(&mut self, _first_slot: u32, _count: u32) {}
    fn clear_bound_targets(&mut self, _flags: ClearFlags, _color: [f32; 4], _depth: f32) {}
    fn copy_resource(&mut self, _src: ResourceId, _dst: ResourceId) {}
    fn draw(&mut self, _vertex_count: u32, _instance_count: u32) {}
    fn draw_fullscreen(&mut self) {}
    fn dispatch(&mut self, _groups_x: u32, _groups_y: u32, _groups_z: u32) {}

    fn create_timestamp_query(&mut self) -> QueryId {
        let id = QueryId(self.next_query);
        self.next_query += 1;
        id
    }

    fn create_disjoint_query(&mut self) -> QueryId {
        self.create_timestamp_query()
    }

    fn begin_disjoint_query(&mut self, _query: QueryId) {}
    fn end_disjoint_query(&mut self, _query: QueryId) {}
    fn write_timestamp(&mut self, _query: QueryId) {}

    fn disjoint_result(&mut self, _query: QueryId) -> Option<DisjointTiming> {
        None
    }

    fn timestamp_result(&mut self, _query: QueryId) -> Option<u64> {
        None
    }
}
