//! Per-kind light collections: entity tracking, batched visibility culling,
//! and GPU-ready record assembly.
//!
//! Collections hold stable `Entity` handles; component data is looked up
//! through the world at rebuild time, so an entity destroyed between the
//! lifecycle notification and the frame simply drops out of the records.

use bevy_ecs::prelude::{Component, Entity, World};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::sync::Mutex;
use wide::f32x4;

use crate::camera::Frustum;
use crate::gpu::{BufferUsage, GpuError, GrowableBuffer, RenderDevice};
use crate::jobs::JobPool;

#[derive(Component, Clone, Copy, Debug)]
pub struct DirectionalLight {
    pub radiance: Vec3,
    pub direction: Vec3,
}

#[derive(Component, Clone, Copy, Debug)]
pub struct PointLight {
    pub radiance: Vec3,
    pub position: Vec3,
    pub radius: f32,
    pub range: f32,
}

impl PointLight {
    pub fn effective_radius(&self) -> f32 {
        self.range + self.radius
    }
}

#[derive(Component, Clone, Copy, Debug)]
pub struct SpotLight {
    pub radiance: Vec3,
    pub position: Vec3,
    pub direction: Vec3,
    pub radius: f32,
    pub range: f32,
    pub inner_angle: f32,
    pub outer_angle: f32,
    pub falloff: f32,
}

impl SpotLight {
    pub fn effective_radius(&self) -> f32 {
        self.range + self.radius
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct DirectionalLightGpu {
    pub radiance: [f32; 4],
    /// View-space direction, w unused.
    pub direction: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct PointLightGpu {
    /// View-space position, w = light radius.
    pub position_radius: [f32; 4],
    /// rgb = radiance, w = range.
    pub radiance_range: [f32; 4],
}

impl PointLightGpu {
    pub fn position(&self) -> Vec3 {
        Vec3::from_slice(&self.position_radius[..3])
    }

    pub fn effective_radius(&self) -> f32 {
        self.position_radius[3] + self.radiance_range[3]
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct SpotLightGpu {
    pub position_radius: [f32; 4],
    pub radiance_range: [f32; 4],
    /// View-space direction, w unused.
    pub direction: [f32; 4],
    /// x = inner angle, y = outer angle, z = falloff.
    pub cone: [f32; 4],
}

impl SpotLightGpu {
    pub fn position(&self) -> Vec3 {
        Vec3::from_slice(&self.position_radius[..3])
    }

    pub fn effective_radius(&self) -> f32 {
        self.position_radius[3] + self.radiance_range[3]
    }
}

/// Uniform layout consumed by forward lighting passes, sliced
/// `lights_per_pass` records at a time.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct ForwardLightGpu {
    /// xyz = view-space position, w = radius.
    pub position: [f32; 4],
    /// rgb = radiance, w = range.
    pub radiance: [f32; 4],
    /// xyz = view-space direction, w = kind.
    pub direction: [f32; 4],
    /// x = inner angle, y = outer angle, z = falloff.
    pub params: [f32; 4],
}

impl ForwardLightGpu {
    pub const KIND_DIRECTIONAL: f32 = 0.0;
    pub const KIND_POINT: f32 = 1.0;
    pub const KIND_SPOT: f32 = 2.0;
}

/// SoA sphere batch padded to a multiple of four for the 4-wide frustum test.
#[derive(Default)]
pub struct SphereBatch {
    xs: Vec<f32>,
    ys: Vec<f32>,
    zs: Vec<f32>,
    radii: Vec<f32>,
}

impl SphereBatch {
    pub fn clear(&mut self) {
        self.xs.clear();
        self.ys.clear();
        self.zs.clear();
        self.radii.clear();
    }

    pub fn push(&mut self, center: Vec3, radius: f32) {
        self.xs.push(center.x);
        self.ys.push(center.y);
        self.zs.push(center.z);
        self.radii.push(radius);
    }

    pub fn pad(&mut self) {
        while self.xs.len() % 4 != 0 {
            self.push(Vec3::ZERO, 0.0);
        }
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    fn lane(values: &[f32], at: usize) -> f32x4 {
        f32x4::from([values[at], values[at + 1], values[at + 2], values[at + 3]])
    }
}

/// Tests four spheres at a time against all six planes: a sphere is visible
/// when its worst-case plane distance plus radius stays non-negative. The
/// returned mask has the padded length; padding lanes are forced to false so
/// the count of visible entries never exceeds `live`.
pub fn cull_spheres(batch: &SphereBatch, frustum: &Frustum, live: usize) -> Vec<bool> {
    let padded = batch.len();
    debug_assert_eq!(padded % 4, 0);
    let mut mask = vec![false; padded];
    for base in (0..padded).step_by(4) {
        let cx = SphereBatch::lane(&batch.xs, base);
        let cy = SphereBatch::lane(&batch.ys, base);
        let cz = SphereBatch::lane(&batch.zs, base);
        let radius = SphereBatch::lane(&batch.radii, base);
        let mut worst = f32x4::splat(f32::MAX);
        for plane in &frustum.planes {
            let dist = cx * f32x4::splat(plane.x)
                + cy * f32x4::splat(plane.y)
                + cz * f32x4::splat(plane.z)
                + f32x4::splat(plane.w);
            worst = worst.min(dist + radius);
        }
        let lanes = worst.to_array();
        for (lane, visible) in lanes.iter().zip(&mut mask[base..base + 4]) {
            *visible = *lane >= 0.0;
        }
    }
    for visible in mask.iter_mut().skip(live) {
        *visible = false;
    }
    mask
}

fn track(entities: &Mutex<Vec<Entity>>, entity: Entity) {
    let mut entities = entities.lock().unwrap();
    if !entities.contains(&entity) {
        entities.push(entity);
    }
}

fn untrack(entities: &Mutex<Vec<Entity>>, entity: Entity) {
    entities.lock().unwrap().retain(|tracked| *tracked != entity);
}

/// Directional lights are unbounded and skip visibility culling entirely.
pub struct DirectionalLights {
    entities: Mutex<Vec<Entity>>,
    records: Vec<DirectionalLightGpu>,
    buffer: GrowableBuffer,
}

impl Default for DirectionalLights {
    fn default() -> Self {
        Self {
            entities: Mutex::new(Vec::new()),
            records: Vec::new(),
            buffer: GrowableBuffer::new("Directional Light Records", BufferUsage::STORAGE),
        }
    }
}

impl DirectionalLights {
    pub fn add(&self, entity: Entity) {
        track(&self.entities, entity);
    }

    pub fn remove(&self, entity: Entity) {
        untrack(&self.entities, entity);
    }

    pub fn tracked(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn records(&self) -> &[DirectionalLightGpu] {
        &self.records
    }

    pub fn rebuild(&mut self, world: &World, view: Mat4) {
        self.records.clear();
        let entities = self.entities.lock().unwrap();
        for &entity in entities.iter() {
            let Some(light) = world.get::<DirectionalLight>(entity) else { continue };
            let direction = view.transform_vector3(light.direction).normalize_or_zero();
            self.records.push(DirectionalLightGpu {
                radiance: [light.radiance.x, light.radiance.y, light.radiance.z, 0.0],
                direction: [direction.x, direction.y, direction.z, 0.0],
            });
        }
    }
}

pub struct PointLights {
    entities: Mutex<Vec<Entity>>,
    records: Vec<PointLightGpu>,
    buffer: GrowableBuffer,
    batch: SphereBatch,
    visibility: Vec<bool>,
}

impl Default for PointLights {
    fn default() -> Self {
        Self {
            entities: Mutex::new(Vec::new()),
            records: Vec::new(),
            buffer: GrowableBuffer::new("Point Light Records", BufferUsage::STORAGE),
            batch: SphereBatch::default(),
            visibility: Vec::new(),
        }
    }
}

impl PointLights {
    pub fn add(&self, entity: Entity) {
        track(&self.entities, entity);
    }

    pub fn remove(&self, entity: Entity) {
        untrack(&self.entities, entity);
    }

    pub fn tracked(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn records(&self) -> &[PointLightGpu] {
        &self.records
    }

    pub fn visibility(&self) -> &[bool] {
        &self.visibility
    }

    pub fn rebuild(&mut self, world: &World, frustum: &Frustum, view: Mat4) {
        self.records.clear();
        self.batch.clear();
        let entities = self.entities.lock().unwrap();
        let mut live = Vec::with_capacity(entities.len());
        for &entity in entities.iter() {
            let Some(light) = world.get::<PointLight>(entity).copied() else { continue };
            live.push(light);
        }
        drop(entities);
        for light in &live {
            self.batch.push(light.position, light.effective_radius());
        }
        self.batch.pad();
        self.visibility = cull_spheres(&self.batch, frustum, live.len());
        for (light, _) in live.iter().zip(&self.visibility).filter(|(_, visible)| **visible) {
            let position = view.transform_point3(light.position);
            self.records.push(PointLightGpu {
                position_radius: [position.x, position.y, position.z, light.radius],
                radiance_range: [light.radiance.x, light.radiance.y, light.radiance.z, light.range],
            });
        }
    }
}

pub struct SpotLights {
    entities: Mutex<Vec<Entity>>,
    records: Vec<SpotLightGpu>,
    buffer: GrowableBuffer,
    batch: SphereBatch,
    visibility: Vec<bool>,
}

impl Default for SpotLights {
    fn default() -> Self {
        Self {
            entities: Mutex::new(Vec::new()),
            records: Vec::new(),
            buffer: GrowableBuffer::new("Spot Light Records", BufferUsage::STORAGE),
            batch: SphereBatch::default(),
            visibility: Vec::new(),
        }
    }
}

impl SpotLights {
    pub fn add(&self, entity: Entity) {
        track(&self.entities, entity);
    }

    pub fn remove(&self, entity: Entity) {
        untrack(&self.entities, entity);
    }

    pub fn tracked(&self) -> usize {
        self.entities.lock().unwrap().len()
    }

    pub fn records(&self) -> &[SpotLightGpu] {
        &self.records
    }

    pub fn visibility(&self) -> &[bool] {
        &self.visibility
    }

    pub fn rebuild(&mut self, world: &World, frustum: &Frustum, view: Mat4) {
        self.records.clear();
        self.batch.clear();
        let entities = self.entities.lock().unwrap();
        let mut live = Vec::with_capacity(entities.len());
        for &entity in entities.iter() {
            let Some(light) = world.get::<SpotLight>(entity).copied() else { continue };
            live.push(light);
        }
        drop(entities);
        for light in &live {
            self.batch.push(light.position, light.effective_radius());
        }
        self.batch.pad();
        self.visibility = cull_spheres(&self.batch, frustum, live.len());
        for (light, _) in live.iter().zip(&self.visibility).filter(|(_, visible)| **visible) {
            let position = view.transform_point3(light.position);
            let direction = view.transform_vector3(light.direction).normalize_or_zero();
            self.records.push(SpotLightGpu {
                position_radius: [position.x, position.y, position.z, light.radius],
                radiance_range: [light.radiance.x, light.radiance.y, light.radiance.z, light.range],
                direction: [direction.x, direction.y, direction.z, 0.0],
                cone: [light.inner_angle, light.outer_angle, light.falloff, 0.0],
            });
        }
    }
}

pub struct LightCollections {
    pub directional: DirectionalLights,
    pub point: PointLights,
    pub spot: SpotLights,
}

impl Default for LightCollections {
    fn default() -> Self {
        Self {
            directional: DirectionalLights::default(),
            point: PointLights::default(),
            spot: SpotLights::default(),
        }
    }
}

impl LightCollections {
    /// Rebuilds all three kinds concurrently and joins before returning;
    /// cluster assignment reads all three record lists afterwards.
    pub fn rebuild_all(&mut self, jobs: &JobPool, world: &World, frustum: &Frustum, view: Mat4) {
        let Self { directional, point, spot } = self;
        jobs.fork_join3(
            || directional.rebuild(world, view),
            || point.rebuild(world, frustum, view),
            || spot.rebuild(world, frustum, view),
        );
    }

    pub fn upload(&mut self, device: &mut dyn RenderDevice) -> Result<(), GpuError> {
        if !self.directional.records.is_empty() {
            self.directional.buffer.write(device, bytemuck::cast_slice(&self.directional.records))?;
        }
        if !self.point.records.is_empty() {
            self.point.buffer.write(device, bytemuck::cast_slice(&self.point.records))?;
        }
        if !self.spot.records.is_empty() {
            self.spot.buffer.write(device, bytemuck::cast_slice(&self.spot.records))?;
        }
        Ok(())
    }

    pub fn point_buffer(&self) -> &GrowableBuffer {
        &self.point.buffer
    }

    pub fn spot_buffer(&self) -> &GrowableBuffer {
        &self.spot.buffer
    }

    pub fn directional_buffer(&self) -> &GrowableBuffer {
        &self.directional.buffer
    }

    /// Concatenates records into the forward lighting layout: directional
    /// first, then point, then spot.
    pub fn assemble_forward(&self, out: &mut Vec<ForwardLightGpu>) {
        out.clear();
        for record in &self.directional.records {
            out.push(ForwardLightGpu {
                position: [0.0; 4],
                radiance: record.radiance,
                direction: [
                    record.direction[0],
                    record.direction[1],
                    record.direction[2],
                    ForwardLightGpu::KIND_DIRECTIONAL,
                ],
                params: [0.0; 4],
            });
        }
        for record in &self.point.records {
            out.push(ForwardLightGpu {
                position: record.position_radius,
                radiance: record.radiance_range,
                direction: [0.0, 0.0, 0.0, ForwardLightGpu::KIND_POINT],
                params: [0.0; 4],
            });
        }
        for record in &self.spot.records {
            out.push(ForwardLightGpu {
                position: record.position_radius,
                radiance: record.radiance_range,
                direction: [
                    record.direction[0],
                    record.direction[1],
                    record.direction[2],
                    ForwardLightGpu::KIND_SPOT,
                ],
                params: record.cone,
            });
        }
    }
}
