//! Shared test doubles: a recording render device and fixture catalogs.
#![allow(dead_code)]

use std::collections::HashMap;

use merlin_renderer::gpu::{
    BufferUsage, ClearFlags, DisjointTiming, GpuError, RenderDevice, RenderState,
};
use merlin_renderer::handles::{
    BufferId, MaterialId, ProgramId, QueryId, ResourceId, ShaderId, VisualId,
};
use merlin_renderer::registry::{
    BlockDesc, MaterialCatalog, PassDesc, ResourceCatalog, ShaderCatalog, ShaderDesc, TargetClear,
};

pub struct MockDevice {
    next_buffer: u32,
    next_query: u32,
    pub buffers: HashMap<BufferId, Vec<u8>>,
    pub fail_writes: bool,
    pub writes: Vec<(BufferId, usize)>,
    pub bound_programs: Vec<ProgramId>,
    pub bound_visuals: Vec<VisualId>,
    pub bound_materials: Vec<MaterialId>,
    pub bound_storage_buffers: Vec<(u32, BufferId)>,
    pub bound_constant_buffers: Vec<(u32, BufferId)>,
    pub draws: u32,
    pub fullscreen_draws: u32,
    pub dispatches: Vec<[u32; 3]>,
    pub clears: u32,
    pub copies: Vec<(ResourceId, ResourceId)>,
    pub target_binds: u32,
    pub target_unbinds: u32,
    pub now_ticks: u64,
    pub tick_step: u64,
    pub frequency: u64,
    pub results_ready: bool,
    pub force_disjoint: bool,
    timestamps: HashMap<QueryId, u64>,
    disjoint_flags: HashMap<QueryId, bool>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            next_buffer: 0,
            next_query: 0,
            buffers: HashMap::new(),
            fail_writes: false,
            writes: Vec::new(),
            bound_programs: Vec::new(),
            bound_visuals: Vec::new(),
            bound_materials: Vec::new(),
            bound_storage_buffers: Vec::new(),
            bound_constant_buffers: Vec::new(),
            draws: 0,
            fullscreen_draws: 0,
            dispatches: Vec::new(),
            clears: 0,
            copies: Vec::new(),
            target_binds: 0,
            target_unbinds: 0,
            now_ticks: 0,
            tick_step: 1,
            frequency: 1000,
            results_ready: true,
            force_disjoint: false,
            timestamps: HashMap::new(),
            disjoint_flags: HashMap::new(),
        }
    }
}

impl RenderDevice for MockDevice {
    fn create_buffer(&mut self, _label: &str, size: u64, _usage: BufferUsage) -> Result<BufferId, GpuError> {
        let id = BufferId(self.next_buffer);
        self.next_buffer += 1;
        self.buffers.insert(id, vec![0; size as usize]);
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<(), GpuError> {
        if self.fail_writes {
            return Err(GpuError::MapFailed(buffer));
        }
        let backing = self.buffers.get_mut(&buffer).ok_or(GpuError::MapFailed(buffer))?;
        let end = offset as usize + data.len();
        if end > backing.len() {
            return Err(GpuError::WriteOutOfBounds {
                buffer,
                size: data.len() as u64,
                capacity: backing.len() as u64,
            });
        }
        backing[offset as usize..end].copy_from_slice(data);
        self.writes.push((buffer, data.len()));
        Ok(())
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.bound_programs.push(program);
    }

    fn bind_resources(&mut self, _first_slot: u32, _resources: &[ResourceId]) {}

    fn bind_storage(&mut self, _first_slot: u32, _resources: &[ResourceId]) {}

    fn bind_storage_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.bound_storage_buffers.push((slot, buffer));
    }

    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.bound_constant_buffers.push((slot, buffer));
    }

    fn bind_material(&mut self, material: MaterialId) {
        self.bound_materials.push(material);
    }

    fn bind_visual(&mut self, visual: VisualId) {
        self.bound_visuals.push(visual);
    }

    fn set_render_state(&mut self, _state: &RenderState) {}

    fn bind_targets(&mut self, _colors: &[ResourceId], _depth: Option<ResourceId>) {
        self.target_binds += 1;
    }

    fn unbind_targets(&mut self) {
        self.target_unbinds += 1;
    }

    fn unbind_resources(&mut self, _first_slot: u32, _count: u32) {}

    fn clear_bound_targets(&mut self, _flags: ClearFlags, _color: [f32; 4], _depth: f32) {
        self.clears += 1;
    }

    fn copy_resource(&mut self, src: ResourceId, dst: ResourceId) {
        self.copies.push((src, dst));
    }

    fn draw(&mut self, _vertex_count: u32, _instance_count: u32) {
        self.draws += 1;
    }

    fn draw_fullscreen(&mut self) {
        self.fullscreen_draws += 1;
    }

    fn dispatch(&mut self, groups_x: u32, groups_y: u32, groups_z: u32) {
        self.dispatches.push([groups_x, groups_y, groups_z]);
    }

    fn create_timestamp_query(&mut self) -> QueryId {
        let id = QueryId(self.next_query);
        self.next_query += 1;
        id
    }

    fn create_disjoint_query(&mut self) -> QueryId {
        self.create_timestamp_query()
    }

    fn begin_disjoint_query(&mut self, _query: QueryId) {}

    fn end_disjoint_query(&mut self, query: QueryId) {
        self.disjoint_flags.insert(query, self.force_disjoint);
    }

    fn write_timestamp(&mut self, query: QueryId) {
        self.now_ticks += self.tick_step;
        self.timestamps.insert(query, self.now_ticks);
    }

    fn disjoint_result(&mut self, query: QueryId) -> Option<DisjointTiming> {
        if !self.results_ready {
            return None;
        }
        Some(DisjointTiming {
            frequency: self.frequency,
            disjoint: self.disjoint_flags.get(&query).copied().unwrap_or(false),
        })
    }

    fn timestamp_result(&mut self, query: QueryId) -> Option<u64> {
        self.timestamps.get(&query).copied()
    }
}

#[derive(Default)]
pub struct TestShaders {
    next: u32,
    pub descs: HashMap<ShaderId, ShaderDesc>,
}

impl TestShaders {
    pub fn add(&mut self, desc: ShaderDesc) -> ShaderId {
        let id = ShaderId(self.next);
        self.next += 1;
        self.descs.insert(id, desc);
        id
    }
}

impl ShaderCatalog for TestShaders {
    fn shader_by_name(&self, name: &str) -> Option<ShaderId> {
        self.descs.iter().find(|(_, desc)| desc.name == name).map(|(id, _)| *id)
    }

    fn shader_desc(&self, shader: ShaderId) -> Option<&ShaderDesc> {
        self.descs.get(&shader)
    }
}

#[derive(Default)]
pub struct TestMaterials {
    pub map: HashMap<MaterialId, ShaderId>,
}

impl MaterialCatalog for TestMaterials {
    fn shader_for_material(&self, material: MaterialId) -> Option<ShaderId> {
        self.map.get(&material).copied()
    }
}

#[derive(Default)]
pub struct TestResources {
    pub map: HashMap<String, ResourceId>,
}

impl ResourceCatalog for TestResources {
    fn resolve(&self, name: &str) -> Option<ResourceId> {
        self.map.get(name).copied()
    }
}

/// One-block forward shader with a single pass, optionally lighting-driven.
pub fn forward_shader(name: &str, priority: u32, lighting: bool, program: ProgramId) -> ShaderDesc {
    ShaderDesc {
        name: name.to_string(),
        priority,
        needs_lighting: lighting,
        output: Some("scene.color".to_string()),
        blocks: vec![BlockDesc {
            name: "base".to_string(),
            lighting,
            clear: Some(TargetClear::default()),
            passes: vec![PassDesc::forward("main", program)],
        }],
    }
}
