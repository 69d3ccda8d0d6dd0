//! Cluster grid assignment: maps each visible light's view-space bounding
//! sphere onto a fixed-resolution screen-space grid and records per-cell
//! light index lists, flattened afterwards into the tile directory the
//! shading passes consume.
//!
//! The clip-region math finds the tangent lines from the camera origin to
//! the sphere via the closed-form roots of the quadratic boundary equation.
//! The per-cell separation test is a heuristic, not an exact sphere vs
//! sub-frustum intersection: it can include a cell the sphere misses, but
//! never excludes one the sphere touches.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::camera::RenderCamera;
use crate::config::ClusterConfig;
use crate::gpu::{BufferUsage, GpuError, GrowableBuffer, RenderDevice};
use crate::jobs::JobPool;
use crate::lights::{PointLightGpu, SpotLightGpu};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LightKind {
    Point,
    Spot,
}

/// Camera parameters the assignment math needs, in a positive-depth view
/// space (depth = distance in front of the camera).
#[derive(Clone, Copy, Debug)]
pub struct ClusterView {
    pub proj_scale_x: f32,
    pub proj_scale_y: f32,
    pub near: f32,
    pub far: f32,
}

impl ClusterView {
    pub fn from_camera(camera: &RenderCamera) -> Self {
        let (proj_scale_x, proj_scale_y) = camera.projection_scale();
        Self { proj_scale_x, proj_scale_y, near: camera.near, far: camera.far }
    }

    fn depth_range(&self) -> f32 {
        (self.far - self.near).max(1e-4)
    }
}

#[derive(Clone, Default)]
pub struct GridCell {
    pub point_lights: SmallVec<[u16; 8]>,
    pub spot_lights: SmallVec<[u16; 8]>,
}

impl GridCell {
    fn reset(&mut self) {
        self.point_lights.clear();
        self.spot_lights.clear();
    }

    pub fn total(&self) -> usize {
        self.point_lights.len() + self.spot_lights.len()
    }
}

/// Per-cell directory entry into the flattened light index list.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct TileOffsetCount {
    pub index_offset: u32,
    pub point_count: u16,
    pub spot_count: u16,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ClusterMetrics {
    pub point_lights: u32,
    pub spot_lights: u32,
    pub grid_dims: [u32; 3],
    pub active_cells: u32,
    pub total_cells: u32,
    pub max_lights_per_cell: u32,
    pub overflow_rejections: u32,
    pub light_assignments: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct ClusterCacheKey {
    view_key: [i32; 4],
    lights_hash: u64,
}

#[derive(Clone, Copy, Debug, Default)]
struct ClusterCache {
    key: ClusterCacheKey,
    metrics: ClusterMetrics,
    valid: bool,
}

const CACHE_QUANTIZE: f32 = 1.0 / 1024.0;

impl ClusterCache {
    fn key_for(view: &ClusterView, lights_hash: u64) -> ClusterCacheKey {
        let quantize = |value: f32| (value / CACHE_QUANTIZE).round() as i32;
        ClusterCacheKey {
            view_key: [
                quantize(view.proj_scale_x),
                quantize(view.proj_scale_y),
                quantize(view.near),
                quantize(view.far),
            ],
            lights_hash,
        }
    }

    fn matches(&self, key: ClusterCacheKey) -> bool {
        self.valid && self.key == key
    }

    fn update(&mut self, key: ClusterCacheKey, metrics: ClusterMetrics) {
        self.key = key;
        self.metrics = metrics;
        self.valid = true;
    }

    fn invalidate(&mut self) {
        self.valid = false;
    }
}

pub struct ClusterGrid {
    dims: [u32; 3],
    max_per_cell: u16,
    cells: Vec<GridCell>,
    offsets: Vec<TileOffsetCount>,
    indices: Vec<u32>,
    total_indices: AtomicU32,
    overflow: AtomicU32,
    metrics: ClusterMetrics,
    cache: ClusterCache,
    offset_buffer: GrowableBuffer,
    index_buffer: GrowableBuffer,
}

impl ClusterGrid {
    pub fn new(config: &ClusterConfig) -> Self {
        let dims = [config.grid_x.max(1), config.grid_y.max(1), config.grid_z.max(1)];
        let cell_count = config.cell_count();
        Self {
            dims,
            max_per_cell: config.max_lights_per_cell.max(1),
            cells: vec![GridCell::default(); cell_count],
            offsets: Vec::with_capacity(cell_count),
            indices: Vec::new(),
            total_indices: AtomicU32::new(0),
            overflow: AtomicU32::new(0),
            metrics: ClusterMetrics::default(),
            cache: ClusterCache::default(),
            offset_buffer: GrowableBuffer::new("Tile Offset Counts", BufferUsage::STORAGE),
            index_buffer: GrowableBuffer::new("Tile Light Indices", BufferUsage::STORAGE),
        }
    }

    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn metrics(&self) -> &ClusterMetrics {
        &self.metrics
    }

    pub fn offsets(&self) -> &[TileOffsetCount] {
        &self.offsets
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn cell(&self, x: u32, y: u32, z: u32) -> &GridCell {
        &self.cells[self.flat_index(x, y, z)]
    }

    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    /// z-major linear order; flattening visits cells in exactly this order.
    fn flat_index(&self, x: u32, y: u32, z: u32) -> usize {
        (z as usize * self.dims[0] as usize * self.dims[1] as usize)
            + (y as usize * self.dims[0] as usize)
            + x as usize
    }

    pub fn rebuild(
        &mut self,
        jobs: &JobPool,
        view: &ClusterView,
        points: &[PointLightGpu],
        spots: &[SpotLightGpu],
    ) {
        let lights_hash = hash_light_records(points, spots);
        let key = ClusterCache::key_for(view, lights_hash);
        if self.cache.matches(key) {
            self.metrics = self.cache.metrics;
            return;
        }

        self.clear_cells(jobs);
        self.total_indices.store(0, Ordering::Relaxed);
        self.overflow.store(0, Ordering::Relaxed);

        if points.len() > u16::MAX as usize || spots.len() > u16::MAX as usize {
            log::warn!(
                "cluster grid indexes at most {} lights per kind, extra lights are ignored",
                u16::MAX
            );
        }
        for (index, light) in points.iter().enumerate().take(u16::MAX as usize) {
            self.assign_light(jobs, view, light.position(), light.effective_radius(), index as u16, LightKind::Point);
        }
        for (index, light) in spots.iter().enumerate().take(u16::MAX as usize) {
            self.assign_light(jobs, view, light.position(), light.effective_radius(), index as u16, LightKind::Spot);
        }

        self.flatten();
        self.update_metrics(points.len() as u32, spots.len() as u32);
        self.cache.update(key, self.metrics);
    }

    fn clear_cells(&mut self, jobs: &JobPool) {
        let cells = &mut self.cells;
        jobs.install(|| cells.par_iter_mut().for_each(GridCell::reset));
    }

    /// Clips the light's sphere to a screen rectangle and depth-slice range,
    /// then resolves per-cell membership with the separation test. Cell
    /// population is forked across the depth-slice range; each fork owns a
    /// contiguous z-slab of cells.
    fn assign_light(
        &mut self,
        jobs: &JobPool,
        view: &ClusterView,
        position: Vec3,
        radius: f32,
        light_index: u16,
        kind: LightKind,
    ) {
        let depth = -position.z;
        let Some(clip) = compute_clip_region(position.x, position.y, depth, radius, view) else {
            return;
        };

        // Clip [-1, 1] to screen [0, 1], y flipped to a top-left origin.
        let screen_x0 = 0.5 * (clip[0] + 1.0);
        let screen_x1 = 0.5 * (clip[2] + 1.0);
        let screen_y0 = 0.5 * (1.0 - clip[3]);
        let screen_y1 = 0.5 * (1.0 - clip[1]);
        // A zero-radius light degenerates to a zero-area rectangle, which is
        // still one cell; only an inverted rectangle means "fully clipped".
        if screen_x0 > screen_x1 || screen_y0 > screen_y1 {
            return;
        }

        let [w, h, d] = self.dims;
        let x0 = range_start(screen_x0, w);
        let x1 = range_end(screen_x1, w);
        let y0 = range_start(screen_y0, h);
        let y1 = range_end(screen_y1, h);

        let inv_depth_range = 1.0 / view.depth_range();
        let z_min = ((depth - radius - view.near) * inv_depth_range).clamp(0.0, 1.0);
        let z_max = ((depth + radius - view.near) * inv_depth_range).clamp(0.0, 1.0);
        let z0 = range_start(z_min, d);
        let z1 = range_end(z_max, d);
        if x0 > x1 || y0 > y1 || z0 > z1 {
            return;
        }

        let slab_len = (w * h) as usize;
        let first = z0 as usize * slab_len;
        let last = (z1 as usize + 1) * slab_len;
        let slabs = &mut self.cells[first..last];
        let dims = self.dims;
        let max_per_cell = self.max_per_cell as usize;
        let total = &self.total_indices;
        let overflow = &self.overflow;

        jobs.install(|| {
            slabs.par_chunks_mut(slab_len).enumerate().for_each(|(slab_offset, slab)| {
                let z = z0 + slab_offset as u32;
                for y in y0..=y1 {
                    for x in x0..=x1 {
                        if is_separated(dims, view, position, radius, x, y, z) {
                            continue;
                        }
                        let cell = &mut slab[(y * w + x) as usize];
                        let list = match kind {
                            LightKind::Point => &mut cell.point_lights,
                            LightKind::Spot => &mut cell.spot_lights,
                        };
                        if list.len() >= max_per_cell {
                            overflow.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        list.push(light_index);
                        total.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        });
    }

    /// Walks cells in z-major order, recording each cell's offset into the
    /// flat index list and appending its point then spot indices.
    fn flatten(&mut self) {
        self.offsets.clear();
        self.indices.clear();
        self.indices.reserve(self.total_indices.load(Ordering::Relaxed) as usize);
        let mut offset = 0u32;
        for cell in &self.cells {
            let point_count = cell.point_lights.len() as u16;
            let spot_count = cell.spot_lights.len() as u16;
            self.offsets.push(TileOffsetCount { index_offset: offset, point_count, spot_count });
            for &index in &cell.point_lights {
                self.indices.push(index as u32);
            }
            for &index in &cell.spot_lights {
                self.indices.push(index as u32);
            }
            offset += point_count as u32 + spot_count as u32;
        }
    }

    fn update_metrics(&mut self, point_lights: u32, spot_lights: u32) {
        let active_cells = self.cells.iter().filter(|cell| cell.total() > 0).count() as u32;
        let max_lights_per_cell =
            self.cells.iter().map(GridCell::total).max().unwrap_or(0) as u32;
        self.metrics = ClusterMetrics {
            point_lights,
            spot_lights,
            grid_dims: self.dims,
            active_cells,
            total_cells: self.cells.len() as u32,
            max_lights_per_cell,
            overflow_rejections: self.overflow.load(Ordering::Relaxed),
            light_assignments: self.total_indices.load(Ordering::Relaxed),
        };
    }

    pub fn upload(&mut self, device: &mut dyn RenderDevice) -> Result<(), GpuError> {
        self.offset_buffer.write(device, bytemuck::cast_slice(&self.offsets))?;
        if !self.indices.is_empty() {
            self.index_buffer.write(device, bytemuck::cast_slice(&self.indices))?;
        }
        Ok(())
    }

    pub fn offset_buffer(&self) -> &GrowableBuffer {
        &self.offset_buffer
    }

    pub fn index_buffer(&self) -> &GrowableBuffer {
        &self.index_buffer
    }
}

fn range_start(norm: f32, count: u32) -> u32 {
    if count <= 1 {
        return 0;
    }
    let value = (norm * count as f32).floor();
    value.clamp(0.0, (count - 1) as f32) as u32
}

fn range_end(norm: f32, count: u32) -> u32 {
    if count <= 1 {
        return 0;
    }
    let value = (norm * count as f32).ceil() as i32 - 1;
    value.clamp(0, count as i32 - 1) as u32
}

/// One tangent-line root: tightens the clip interval along one axis. `nc` is
/// the x (or y) component of the tangent plane normal, `lc`/`lz` the light
/// center on that axis and its depth.
fn update_clip_region_root(nc: f32, lc: f32, lz: f32, radius: f32, scale: f32, min: &mut f32, max: &mut f32) {
    if nc.abs() <= f32::EPSILON || lz <= 0.0 {
        return;
    }
    let nz = (radius - nc * lc) / lz;
    let denom = lz - (nz / nc) * lc;
    if denom.abs() <= f32::EPSILON {
        return;
    }
    let pz = (lc * lc + lz * lz - radius * radius) / denom;
    if pz > 0.0 {
        let boundary = -nz * scale / nc;
        if nc > 0.0 {
            *min = min.max(boundary);
        } else {
            *max = max.min(boundary);
        }
    }
}

fn update_clip_region(lc: f32, lz: f32, radius: f32, scale: f32, min: &mut f32, max: &mut f32) {
    let radius_sq = radius * radius;
    let lc_lz_sq = lc * lc + lz * lz;
    if lc_lz_sq <= f32::EPSILON {
        return;
    }
    let discriminant = radius_sq * lc * lc - lc_lz_sq * (radius_sq - lz * lz);
    if discriminant > 0.0 {
        let a = radius * lc;
        let b = discriminant.sqrt();
        update_clip_region_root((a + b) / lc_lz_sq, lc, lz, radius, scale, min, max);
        update_clip_region_root((a - b) / lc_lz_sq, lc, lz, radius, scale, min, max);
    }
}

/// Projects the sphere onto each axis independently; returns the clip-space
/// rectangle `[min_x, min_y, max_x, max_y]` in [-1, 1], or `None` when the
/// sphere sits entirely behind the near-clip-adjusted camera.
fn compute_clip_region(lx: f32, ly: f32, lz: f32, radius: f32, view: &ClusterView) -> Option<[f32; 4]> {
    if lz + radius < view.near {
        return None;
    }
    let mut min_x = -1.0f32;
    let mut max_x = 1.0f32;
    let mut min_y = -1.0f32;
    let mut max_y = 1.0f32;
    update_clip_region(lx, lz, radius, view.proj_scale_x, &mut min_x, &mut max_x);
    update_clip_region(ly, lz, radius, view.proj_scale_y, &mut min_y, &mut max_y);
    Some([min_x, min_y, max_x, max_y])
}

/// Separation heuristic between a light sphere and one cell's sub-frustum.
///
/// Reconstructs the cell's corners at its near/far depth bounds, takes the
/// tangent plane through the light position facing the cell's center, and
/// rejects the cell only when even the nearest corner lies further along
/// that normal than the light's effective radius. Works well in practice;
/// kept as-is rather than replaced by an exact intersection test.
fn is_separated(dims: [u32; 3], view: &ClusterView, light: Vec3, radius: f32, x: u32, y: u32, z: u32) -> bool {
    let (w, h, d) = (dims[0] as f32, dims[1] as f32, dims[2] as f32);
    let depth_near = view.near + view.depth_range() * (z as f32 / d);
    let depth_far = view.near + view.depth_range() * ((z + 1) as f32 / d);

    // Cell edges in clip space; grid row 0 is the top of the screen.
    let ndc_x0 = 2.0 * x as f32 / w - 1.0;
    let ndc_x1 = 2.0 * (x + 1) as f32 / w - 1.0;
    let ndc_y0 = 1.0 - 2.0 * (y + 1) as f32 / h;
    let ndc_y1 = 1.0 - 2.0 * y as f32 / h;

    let corner = |ndc_x: f32, ndc_y: f32, depth: f32| {
        Vec3::new(ndc_x / view.proj_scale_x * depth, ndc_y / view.proj_scale_y * depth, -depth)
    };

    let center_depth = 0.5 * (depth_near + depth_far);
    let center = corner(0.5 * (ndc_x0 + ndc_x1), 0.5 * (ndc_y0 + ndc_y1), center_depth);
    let axis = center - light;
    if axis.length_squared() <= 1e-12 {
        return false;
    }
    let normal = axis / axis.length();

    let mut min_distance = f32::MAX;
    for (ndc_x, ndc_y) in [(ndc_x0, ndc_y0), (ndc_x0, ndc_y1), (ndc_x1, ndc_y0), (ndc_x1, ndc_y1)] {
        let near_distance = (corner(ndc_x, ndc_y, depth_near) - light).dot(normal);
        let far_distance = (corner(ndc_x, ndc_y, depth_far) - light).dot(normal);
        min_distance = min_distance.min(near_distance.min(far_distance));
    }
    min_distance > radius
}

fn hash_light_records(points: &[PointLightGpu], spots: &[SpotLightGpu]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;
    let mut hash = FNV_OFFSET ^ (points.len() as u64) ^ ((spots.len() as u64) << 32);
    let mut eat = |bytes: &[u8]| {
        for &byte in bytes {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV_PRIME);
        }
    };
    eat(bytemuck::cast_slice(points));
    eat(bytemuck::cast_slice(spots));
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_view() -> ClusterView {
        ClusterView { proj_scale_x: 1.0, proj_scale_y: 1.0, near: 0.1, far: 100.0 }
    }

    fn grid(config_dims: [u32; 3]) -> (ClusterGrid, JobPool) {
        let config = ClusterConfig {
            grid_x: config_dims[0],
            grid_y: config_dims[1],
            grid_z: config_dims[2],
            max_lights_per_cell: 255,
        };
        (ClusterGrid::new(&config), JobPool::new(3).expect("pool"))
    }

    fn point_record(position: Vec3, radius: f32, range: f32) -> PointLightGpu {
        PointLightGpu {
            position_radius: [position.x, position.y, position.z, radius],
            radiance_range: [1.0, 1.0, 1.0, range],
        }
    }

    #[test]
    fn clip_region_is_empty_behind_the_camera() {
        let view = test_view();
        assert!(compute_clip_region(0.0, 0.0, -5.0, 1.0, &view).is_none());
        assert!(compute_clip_region(0.0, 0.0, 5.0, 1.0, &view).is_some());
    }

    #[test]
    fn clip_region_tightens_for_offset_lights() {
        let view = test_view();
        let clip = compute_clip_region(3.0, 0.0, 10.0, 1.0, &view).expect("visible");
        // A sphere right of center must not touch the left clip edge.
        assert!(clip[0] > -1.0);
        assert!(clip[2] <= 1.0);
        assert!(clip[0] < clip[2]);
    }

    #[test]
    fn zero_radius_light_at_cell_center_lands_in_exactly_that_cell() {
        let (mut grid, jobs) = grid([8, 8, 8]);
        let view = test_view();
        let (x, y, z) = (3u32, 4u32, 2u32);
        let ndc_x = 2.0 * (x as f32 + 0.5) / 8.0 - 1.0;
        let ndc_y = 1.0 - 2.0 * (y as f32 + 0.5) / 8.0;
        let depth = view.near + (view.far - view.near) * ((z as f32 + 0.5) / 8.0);
        let center = Vec3::new(ndc_x * depth, ndc_y * depth, -depth);

        grid.rebuild(&jobs, &view, &[point_record(center, 0.0, 0.0)], &[]);

        assert_eq!(grid.cell(x, y, z).point_lights.as_slice(), &[0]);
        assert_eq!(grid.metrics().light_assignments, 1);
        let total: u32 = grid
            .offsets()
            .iter()
            .map(|entry| entry.point_count as u32 + entry.spot_count as u32)
            .sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn flattening_offsets_chain_across_all_cells() {
        let (mut grid, jobs) = grid([4, 4, 4]);
        let view = test_view();
        let records = [
            point_record(Vec3::new(0.0, 0.0, -10.0), 0.5, 4.0),
            point_record(Vec3::new(2.0, 1.0, -30.0), 0.5, 8.0),
            point_record(Vec3::new(-3.0, -2.0, -60.0), 1.0, 12.0),
        ];
        grid.rebuild(&jobs, &view, &records, &[]);

        let offsets = grid.offsets();
        assert_eq!(offsets.len(), grid.cell_count());
        for pair in offsets.windows(2) {
            let expected =
                pair[0].index_offset + pair[0].point_count as u32 + pair[0].spot_count as u32;
            assert_eq!(expected, pair[1].index_offset);
        }
        let last = offsets[offsets.len() - 1];
        assert_eq!(
            last.index_offset + last.point_count as u32 + last.spot_count as u32,
            grid.indices().len() as u32
        );
        assert_eq!(grid.indices().len() as u32, grid.metrics().light_assignments);
    }

    #[test]
    fn light_behind_camera_contributes_nothing() {
        let (mut grid, jobs) = grid([4, 4, 4]);
        let view = test_view();
        grid.rebuild(&jobs, &view, &[point_record(Vec3::new(0.0, 0.0, 50.0), 1.0, 10.0)], &[]);
        assert_eq!(grid.metrics().light_assignments, 0);
        assert!(grid.indices().is_empty());
    }

    #[test]
    fn separation_rejects_far_cells_but_not_touching_ones() {
        let view = test_view();
        let dims = [8, 8, 8];
        // Light near the lower-left of the view at shallow depth; a cell at
        // the opposite corner and far depth is clearly separated.
        let light = Vec3::new(-8.0, -8.0, -10.0);
        assert!(is_separated(dims, &view, light, 1.0, 7, 0, 7));
        // A cell whose center contains the light cannot be separated.
        assert!(!is_separated(dims, &view, light, 1.0, 1, 6, 0));
    }

    #[test]
    fn cache_skips_identical_rebuilds() {
        let (mut grid, jobs) = grid([4, 4, 4]);
        let view = test_view();
        let records = [point_record(Vec3::new(0.0, 0.0, -10.0), 0.5, 4.0)];
        grid.rebuild(&jobs, &view, &records, &[]);
        let first = grid.metrics().light_assignments;
        grid.rebuild(&jobs, &view, &records, &[]);
        assert_eq!(grid.metrics().light_assignments, first);

        let moved = [point_record(Vec3::new(1.0, 0.0, -10.0), 0.5, 4.0)];
        grid.rebuild(&jobs, &view, &moved, &[]);
        assert_eq!(grid.metrics().point_lights, 1);
    }
}
