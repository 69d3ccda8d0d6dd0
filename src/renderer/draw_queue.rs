//! Per-camera draw-call collection and sorting.
//!
//! Accepted calls are sorted by one packed integer key so calls sharing a
//! material, visual, and shader end up adjacent, then partitioned into
//! contiguous shader runs scheduled in draw-order priority buckets.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Mutex;

use crate::gpu::RenderDevice;
use crate::handles::{MaterialId, ShaderId, VisualId};
use crate::registry::{MaterialCatalog, ShaderCatalog};

pub type DrawFn = Box<dyn Fn(&mut dyn RenderDevice) + Send + Sync>;

pub struct DrawCall {
    pub material: MaterialId,
    pub visual: VisualId,
    pub shader: ShaderId,
    pub draw: DrawFn,
}

impl DrawCall {
    fn sort_key(&self) -> u64 {
        pack_sort_key(self.material, self.visual, self.shader)
    }
}

/// Material in the high bits, then visual, then shader: ascending order
/// groups calls by material first and keeps material/visual rebinds minimal
/// inside each shader run.
pub fn pack_sort_key(material: MaterialId, visual: VisualId, shader: ShaderId) -> u64 {
    ((material.0 as u64 & 0xFF_FFFF) << 40)
        | ((visual.0 as u64 & 0xFF_FFFF) << 16)
        | (shader.0 as u64 & 0xFFFF)
}

#[derive(Default)]
pub struct DrawQueue {
    calls: Mutex<Vec<DrawCall>>,
}

impl DrawQueue {
    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().unwrap().is_empty()
    }

    fn push(&self, call: DrawCall) {
        self.calls.lock().unwrap().push(call);
    }

    /// Drains the queue, stably sorted by the packed key; equal keys keep
    /// their submission order.
    pub fn take_sorted(&self) -> Vec<DrawCall> {
        let mut calls = std::mem::take(&mut *self.calls.lock().unwrap());
        calls.sort_by_key(DrawCall::sort_key);
        calls
    }
}

/// Submission scope handed to collect observers; only valid for the duration
/// of the collect notification.
pub struct CollectScope<'a> {
    queue: &'a DrawQueue,
    materials: &'a dyn MaterialCatalog,
    forced_shader: Option<ShaderId>,
}

impl<'a> CollectScope<'a> {
    pub fn new(
        queue: &'a DrawQueue,
        materials: &'a dyn MaterialCatalog,
        forced_shader: Option<ShaderId>,
    ) -> Self {
        Self { queue, materials, forced_shader }
    }

    /// Invalid handles and materials with no resolvable shader are dropped
    /// silently; that is a caller contract violation, not a frame error.
    pub fn queue_draw_call(&self, visual: VisualId, material: MaterialId, draw: DrawFn) {
        if !visual.is_valid() || !material.is_valid() {
            log::trace!("draw call dropped: invalid visual or material handle");
            return;
        }
        let shader = self
            .forced_shader
            .or_else(|| self.materials.shader_for_material(material))
            .filter(|shader| shader.is_valid());
        let Some(shader) = shader else {
            log::trace!("draw call dropped: material {material:?} resolves to no shader");
            return;
        };
        self.queue.push(DrawCall { material, visual, shader, draw });
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ShaderRun {
    pub shader: ShaderId,
    pub range: Range<usize>,
}

/// Splits the sorted call list into maximal runs of adjacent calls sharing a
/// shader.
pub fn partition_runs(calls: &[DrawCall]) -> Vec<ShaderRun> {
    let mut runs = Vec::new();
    let mut start = 0;
    for index in 1..=calls.len() {
        if index == calls.len() || calls[index].shader != calls[start].shader {
            runs.push(ShaderRun { shader: calls[start].shader, range: start..index });
            start = index;
        }
    }
    runs
}

/// Buckets runs by the owning shader's declared priority; iteration over the
/// result is in ascending priority order. Runs whose shader has no
/// description are configuration errors and are skipped.
pub fn bucket_by_priority(
    runs: Vec<ShaderRun>,
    shaders: &dyn ShaderCatalog,
) -> BTreeMap<u32, Vec<ShaderRun>> {
    let mut buckets: BTreeMap<u32, Vec<ShaderRun>> = BTreeMap::new();
    for run in runs {
        let Some(desc) = shaders.shader_desc(run.shader) else {
            log::warn!("shader {:?} has no description, dropping {} draw calls", run.shader, run.range.len());
            continue;
        };
        buckets.entry(desc.priority).or_default().push(run);
    }
    buckets
}
