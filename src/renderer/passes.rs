//! The block/pass scheduling state machine.
//!
//! Both levels are forward-only cursors over the shader's declared
//! description tree: `next()` hands out the following element or `None`
//! forever once exhausted. A non-lighting block runs exactly once; a
//! lighting block re-runs until every collected forward light record has
//! been consumed in `lights_per_pass` slices, each slice uploaded into the
//! per-pass light buffer and count constant before its passes execute.

use bytemuck::{Pod, Zeroable};

use crate::gpu::{BufferUsage, GpuError, GrowableBuffer, RenderDevice};
use crate::lights::ForwardLightGpu;
use crate::registry::{BlockDesc, PassDesc, PassMode, ShaderDesc};

/// Storage slot layout shared between the scheduler and shading programs.
pub const TILE_OFFSET_BUFFER_SLOT: u32 = 0;
pub const LIGHT_INDEX_BUFFER_SLOT: u32 = 1;
pub const POINT_LIGHT_BUFFER_SLOT: u32 = 2;
pub const SPOT_LIGHT_BUFFER_SLOT: u32 = 3;
pub const DIRECTIONAL_LIGHT_BUFFER_SLOT: u32 = 4;
pub const FORWARD_LIGHT_BUFFER_SLOT: u32 = 5;
pub const LIGHT_COUNT_UNIFORM_SLOT: u32 = 0;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
struct LightCountUniform {
    count: u32,
    _pad: [u32; 3],
}

/// Owns the per-pass forward light slice buffer and its count constant.
pub struct ForwardLightBinding {
    records: GrowableBuffer,
    count: GrowableBuffer,
}

impl Default for ForwardLightBinding {
    fn default() -> Self {
        Self {
            records: GrowableBuffer::new("Forward Light Slice", BufferUsage::STORAGE),
            count: GrowableBuffer::new("Forward Light Count", BufferUsage::UNIFORM),
        }
    }
}

impl ForwardLightBinding {
    /// Uploads one slice and binds both buffers for the passes that follow.
    pub fn upload_slice(
        &mut self,
        device: &mut dyn RenderDevice,
        slice: &[ForwardLightGpu],
    ) -> Result<(), GpuError> {
        let records = self.records.write(device, bytemuck::cast_slice(slice))?;
        let uniform = LightCountUniform { count: slice.len() as u32, _pad: [0; 3] };
        let count = self.count.write(device, bytemuck::bytes_of(&uniform))?;
        device.bind_storage_buffer(FORWARD_LIGHT_BUFFER_SLOT, records);
        device.bind_constant_buffer(LIGHT_COUNT_UNIFORM_SLOT, count);
        Ok(())
    }
}

/// Forward-only cursor over a shader's blocks.
#[derive(Default)]
pub struct BlockWalk {
    next: usize,
}

impl BlockWalk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next<'d>(&mut self, shader: &'d ShaderDesc) -> Option<BlockRun<'d>> {
        let desc = shader.blocks.get(self.next)?;
        self.next += 1;
        Some(BlockRun { desc, base: false, light_cursor: 0, invocations: 0 })
    }
}

pub struct BlockRun<'d> {
    pub desc: &'d BlockDesc,
    /// Set once a non-lighting block has had its single invocation.
    base: bool,
    light_cursor: usize,
    invocations: u32,
}

impl<'d> BlockRun<'d> {
    /// Completed invocations, counting the one `prepare` just enabled.
    pub fn invocation(&self) -> u32 {
        self.invocations
    }

    /// Returns whether the block is enabled for this invocation. Lighting
    /// blocks upload the next light slice as a side effect and stay enabled
    /// until all lights are consumed; with no lights at all they still run
    /// once with a zero count.
    pub fn prepare(
        &mut self,
        device: &mut dyn RenderDevice,
        lights: &[ForwardLightGpu],
        lights_per_pass: usize,
        binding: &mut ForwardLightBinding,
    ) -> Result<bool, GpuError> {
        if !self.desc.lighting {
            if self.base {
                return Ok(false);
            }
            self.base = true;
            self.invocations += 1;
            return Ok(true);
        }

        if self.invocations > 0 && self.light_cursor >= lights.len() {
            return Ok(false);
        }
        let end = (self.light_cursor + lights_per_pass.max(1)).min(lights.len());
        binding.upload_slice(device, &lights[self.light_cursor..end])?;
        self.light_cursor = end;
        self.invocations += 1;
        Ok(true)
    }
}

/// Forward-only cursor over a block's passes.
#[derive(Default)]
pub struct PassWalk {
    next: usize,
}

impl PassWalk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next<'d>(&mut self, block: &'d BlockDesc) -> Option<PassRun<'d>> {
        let desc = block.passes.get(self.next)?;
        let index = self.next;
        self.next += 1;
        Some(PassRun { desc, index })
    }
}

pub struct PassRun<'d> {
    pub desc: &'d PassDesc,
    pub index: usize,
}

impl PassRun<'_> {
    /// Binds the pass's program, resources, state, and targets, firing the
    /// block's declared clears on the first invocation of its first pass,
    /// and returns the pass mode the caller executes.
    pub fn prepare(&self, device: &mut dyn RenderDevice, block: &BlockDesc, fire_clears: bool) -> PassMode {
        device.bind_program(self.desc.program);
        if !self.desc.resources.is_empty() {
            device.bind_resources(0, &self.desc.resources);
        }
        if !self.desc.storage.is_empty() {
            device.bind_storage(0, &self.desc.storage);
        }
        device.set_render_state(&self.desc.state);
        device.bind_targets(&self.desc.targets, self.desc.depth_target);
        if fire_clears {
            if let Some(clear) = &block.clear {
                device.clear_bound_targets(clear.flags, clear.color, clear.depth);
            }
        }
        self.desc.mode
    }

    /// Unbinds target-only state so nothing leaks into the next pass.
    pub fn finish(&self, device: &mut dyn RenderDevice) {
        device.unbind_targets();
        if !self.desc.resources.is_empty() {
            device.unbind_resources(0, self.desc.resources.len() as u32);
        }
    }
}
