//! Shader, material, and resource registry collaborator interfaces, plus the
//! Block/Pass description tree the pass scheduler walks.
//!
//! The description tree is owned by whatever loads shader descriptions; the
//! renderer only iterates it read-only once per frame.

use crate::gpu::{ClearFlags, RenderState};
use crate::handles::{MaterialId, ProgramId, ResourceId, ShaderId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PassMode {
    Forward,
    Deferred,
    Compute,
}

#[derive(Clone, Copy, Debug)]
pub struct TargetClear {
    pub flags: ClearFlags,
    pub color: [f32; 4],
    pub depth: f32,
}

impl Default for TargetClear {
    fn default() -> Self {
        Self { flags: ClearFlags::COLOR | ClearFlags::DEPTH, color: [0.0; 4], depth: 1.0 }
    }
}

#[derive(Clone, Debug)]
pub struct PassDesc {
    pub name: String,
    pub mode: PassMode,
    pub program: ProgramId,
    /// Shader-visible inputs, bound from slot 0 in declaration order.
    pub resources: Vec<ResourceId>,
    /// Unordered-access outputs.
    pub storage: Vec<ResourceId>,
    pub state: RenderState,
    pub targets: Vec<ResourceId>,
    pub depth_target: Option<ResourceId>,
    pub compute_groups: [u32; 3],
}

impl PassDesc {
    pub fn forward(name: impl Into<String>, program: ProgramId) -> Self {
        Self::with_mode(name, PassMode::Forward, program)
    }

    pub fn deferred(name: impl Into<String>, program: ProgramId) -> Self {
        Self::with_mode(name, PassMode::Deferred, program)
    }

    pub fn compute(name: impl Into<String>, program: ProgramId, groups: [u32; 3]) -> Self {
        let mut pass = Self::with_mode(name, PassMode::Compute, program);
        pass.compute_groups = groups;
        pass
    }

    fn with_mode(name: impl Into<String>, mode: PassMode, program: ProgramId) -> Self {
        Self {
            name: name.into(),
            mode,
            program,
            resources: Vec::new(),
            storage: Vec::new(),
            state: RenderState::default(),
            targets: Vec::new(),
            depth_target: None,
            compute_groups: [1, 1, 1],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlockDesc {
    pub name: String,
    /// Gates whether collected light records are sliced into this block's
    /// passes; a lighting block runs once per slice of lights.
    pub lighting: bool,
    /// Fires against the bound targets on the first invocation of the
    /// block's first pass.
    pub clear: Option<TargetClear>,
    pub passes: Vec<PassDesc>,
}

#[derive(Clone, Debug)]
pub struct ShaderDesc {
    pub name: String,
    /// Ascending draw-order priority; lower priorities are scheduled first.
    pub priority: u32,
    pub needs_lighting: bool,
    /// Name of the resource this shader's final pass writes, resolved
    /// through the resource registry at composite time.
    pub output: Option<String>,
    pub blocks: Vec<BlockDesc>,
}

pub trait ShaderCatalog {
    fn shader_by_name(&self, name: &str) -> Option<ShaderId>;
    fn shader_desc(&self, shader: ShaderId) -> Option<&ShaderDesc>;
}

pub trait MaterialCatalog {
    fn shader_for_material(&self, material: MaterialId) -> Option<ShaderId>;
}

pub trait ResourceCatalog {
    fn resolve(&self, name: &str) -> Option<ResourceId>;
}
