//! Frame orchestration: drains the camera queue once per engine tick, drives
//! draw-call collection, lighting, cluster assignment, and the pass
//! scheduler for each camera, then composites, runs the post-process chain,
//! and raises the overlay notification.
//!
//! No failure in here is fatal: a camera whose GPU uploads fail simply
//! renders nothing this frame and the loop moves on.

pub mod clusters;
pub mod draw_queue;
pub mod passes;
pub mod profiler;

use anyhow::{Context, Result};
use bevy_ecs::prelude::World;
use std::sync::Mutex;
use std::time::Duration;

use crate::camera::RenderCamera;
use crate::config::RendererConfig;
use crate::events::{CollectContext, CollectFn, ObserverHandle, ObserverSet, OverlayFn};
use crate::gpu::{ClearFlags, RenderDevice};
use crate::handles::{MaterialId, ResourceId, VisualId};
use crate::jobs::JobPool;
use crate::lights::{ForwardLightGpu, LightCollections};
use crate::registry::{MaterialCatalog, PassMode, ResourceCatalog, ShaderCatalog, ShaderDesc};

use clusters::{ClusterGrid, ClusterMetrics, ClusterView};
use draw_queue::{bucket_by_priority, partition_runs, CollectScope, DrawCall, DrawQueue};
use passes::{
    BlockWalk, ForwardLightBinding, PassWalk, DIRECTIONAL_LIGHT_BUFFER_SLOT,
    LIGHT_INDEX_BUFFER_SLOT, POINT_LIGHT_BUFFER_SLOT, SPOT_LIGHT_BUFFER_SLOT,
    TILE_OFFSET_BUFFER_SLOT,
};
use profiler::GpuProfiler;

/// Collaborators supplied by the embedding application for one tick.
pub struct FrameContext<'a> {
    pub world: &'a World,
    pub device: &'a mut dyn RenderDevice,
    pub shaders: &'a dyn ShaderCatalog,
    pub materials: &'a dyn MaterialCatalog,
    pub resources: &'a dyn ResourceCatalog,
}

pub struct Renderer {
    config: RendererConfig,
    jobs: JobPool,
    cameras: Mutex<Vec<RenderCamera>>,
    draw_queue: DrawQueue,
    lights: LightCollections,
    clusters: ClusterGrid,
    forward_lights: Vec<ForwardLightGpu>,
    light_binding: ForwardLightBinding,
    collect_observers: ObserverSet<CollectFn>,
    overlay_observers: ObserverSet<OverlayFn>,
    profiler: GpuProfiler,
    time_seconds: f64,
    frame_index: u64,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Result<Self> {
        let jobs = JobPool::new(config.workers)?;
        let clusters = ClusterGrid::new(&config.cluster);
        let profiler = GpuProfiler::new(
            config.profiler.history_samples,
            Duration::from_millis(config.profiler.refresh_interval_ms),
        );
        Ok(Self {
            config,
            jobs,
            cameras: Mutex::new(Vec::new()),
            draw_queue: DrawQueue::default(),
            lights: LightCollections::default(),
            clusters,
            forward_lights: Vec::new(),
            light_binding: ForwardLightBinding::default(),
            collect_observers: ObserverSet::new(),
            overlay_observers: ObserverSet::new(),
            profiler,
            time_seconds: 0.0,
            frame_index: 0,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn lights(&self) -> &LightCollections {
        &self.lights
    }

    pub fn clusters(&self) -> &ClusterGrid {
        &self.clusters
    }

    pub fn cluster_metrics(&self) -> &ClusterMetrics {
        self.clusters.metrics()
    }

    pub fn profiler(&self) -> &GpuProfiler {
        &self.profiler
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Accumulated frame time handed to `on_update`, in seconds.
    pub fn time_seconds(&self) -> f64 {
        self.time_seconds
    }

    /// Fire-and-forget: appends to the camera queue without blocking the
    /// caller; the camera is consumed and discarded within the next tick.
    pub fn queue_camera(&self, camera: RenderCamera) {
        self.cameras.lock().unwrap().push(camera);
    }

    pub fn subscribe_collect(&mut self, observer: Box<CollectFn>) -> ObserverHandle {
        self.collect_observers.subscribe(observer)
    }

    pub fn unsubscribe_collect(&mut self, handle: ObserverHandle) -> bool {
        self.collect_observers.unsubscribe(handle)
    }

    pub fn subscribe_overlay(&mut self, observer: Box<OverlayFn>) -> ObserverHandle {
        self.overlay_observers.subscribe(observer)
    }

    pub fn unsubscribe_overlay(&mut self, handle: ObserverHandle) -> bool {
        self.overlay_observers.unsubscribe(handle)
    }

    /// Drives one engine tick: every queued camera, then the screen
    /// fallback clear, the post chain, and the overlay notification.
    pub fn on_update(&mut self, ctx: &mut FrameContext<'_>, frame_time: f32) {
        self.time_seconds += frame_time as f64;
        self.profiler.begin_frame(ctx.device);

        let queued = std::mem::take(&mut *self.cameras.lock().unwrap());
        let screen = ctx.resources.resolve(&self.config.screen_output);
        let mut any_output = false;
        for camera in &queued {
            match self.render_camera(ctx, camera, screen) {
                Ok(true) => any_output = true,
                Ok(false) => {}
                Err(err) => log::warn!("camera '{}' skipped this frame: {err:#}", camera.name),
            }
        }
        self.profiler.time_stamp(ctx.device, "scene");

        if !any_output {
            if let Some(screen) = screen {
                ctx.device.bind_targets(&[screen], None);
                ctx.device.clear_bound_targets(ClearFlags::COLOR, self.config.clear_color, 1.0);
                ctx.device.unbind_targets();
            }
        }

        self.run_post_chain(ctx);
        self.profiler.time_stamp(ctx.device, "post");

        for observer in self.overlay_observers.iter() {
            observer(ctx.device);
        }
        self.profiler.time_stamp(ctx.device, "overlay");

        self.profiler.end_frame(ctx.device);
        self.profiler.update_event_data(ctx.device);
        self.frame_index += 1;
    }

    /// Returns Ok(true) when the camera produced output. Any GPU upload
    /// failure abandons the camera's remaining work and propagates here, to
    /// be logged and swallowed by the tick loop.
    fn render_camera(
        &mut self,
        ctx: &mut FrameContext<'_>,
        camera: &RenderCamera,
        screen: Option<ResourceId>,
    ) -> Result<bool> {
        self.draw_queue.clear();
        let collect_ctx = CollectContext {
            frustum: camera.frustum,
            view: camera.view,
            projection: camera.projection,
        };
        {
            let scope = CollectScope::new(&self.draw_queue, ctx.materials, camera.forced_shader);
            for observer in self.collect_observers.iter() {
                observer(&collect_ctx, &scope);
            }
        }
        if self.draw_queue.is_empty() {
            return Ok(false);
        }

        let shaders = ctx.shaders;
        let calls = self.draw_queue.take_sorted();
        let runs = partition_runs(&calls);
        let needs_lighting = runs
            .iter()
            .any(|run| shaders.shader_desc(run.shader).is_some_and(|desc| desc.needs_lighting));
        if needs_lighting {
            self.update_lighting(ctx.world, ctx.device, camera)?;
        } else {
            self.forward_lights.clear();
        }

        let buckets = bucket_by_priority(runs, shaders);
        for runs in buckets.into_values() {
            for run in runs {
                let Some(shader) = shaders.shader_desc(run.shader) else { continue };
                self.execute_shader(ctx.device, shader, &calls[run.range.clone()])?;
            }
        }

        let target = camera.target.or(screen);
        if let (Some(source), Some(target)) = (ctx.resources.resolve(&self.config.scene_output), target)
        {
            ctx.device.copy_resource(source, target);
        }
        Ok(true)
    }

    /// Fork-join light rebuild, cluster assignment, and the GPU uploads that
    /// make both visible to shading passes.
    fn update_lighting(
        &mut self,
        world: &World,
        device: &mut dyn RenderDevice,
        camera: &RenderCamera,
    ) -> Result<()> {
        self.lights.rebuild_all(&self.jobs, world, &camera.frustum, camera.view);
        let cluster_view = ClusterView::from_camera(camera);
        self.clusters.rebuild(
            &self.jobs,
            &cluster_view,
            self.lights.point.records(),
            self.lights.spot.records(),
        );
        self.lights.upload(device).context("light record upload")?;
        self.clusters.upload(device).context("cluster buffer upload")?;

        if let Some(id) = self.clusters.offset_buffer().id() {
            device.bind_storage_buffer(TILE_OFFSET_BUFFER_SLOT, id);
        }
        if let Some(id) = self.clusters.index_buffer().id() {
            device.bind_storage_buffer(LIGHT_INDEX_BUFFER_SLOT, id);
        }
        if let Some(id) = self.lights.point_buffer().id() {
            device.bind_storage_buffer(POINT_LIGHT_BUFFER_SLOT, id);
        }
        if let Some(id) = self.lights.spot_buffer().id() {
            device.bind_storage_buffer(SPOT_LIGHT_BUFFER_SLOT, id);
        }
        if let Some(id) = self.lights.directional_buffer().id() {
            device.bind_storage_buffer(DIRECTIONAL_LIGHT_BUFFER_SLOT, id);
        }

        self.lights.assemble_forward(&mut self.forward_lights);
        Ok(())
    }

    /// Walks one shader's block/pass tree against its sorted draw-call run.
    fn execute_shader(
        &mut self,
        device: &mut dyn RenderDevice,
        shader: &ShaderDesc,
        calls: &[DrawCall],
    ) -> Result<()> {
        let lights_per_pass = self.config.lighting.lights_per_pass as usize;
        let mut blocks = BlockWalk::new();
        while let Some(mut block) = blocks.next(shader) {
            loop {
                let enabled = block
                    .prepare(device, &self.forward_lights, lights_per_pass, &mut self.light_binding)
                    .with_context(|| format!("light slice upload for shader '{}'", shader.name))?;
                if !enabled {
                    break;
                }
                let first_invocation = block.invocation() == 1;
                let mut passes = PassWalk::new();
                while let Some(pass) = passes.next(block.desc) {
                    let fire_clears = first_invocation && pass.index == 0;
                    match pass.prepare(device, block.desc, fire_clears) {
                        PassMode::Forward => draw_forward(device, calls),
                        PassMode::Deferred => device.draw_fullscreen(),
                        PassMode::Compute => {
                            let [x, y, z] = pass.desc.compute_groups;
                            device.dispatch(x, y, z);
                        }
                    }
                    pass.finish(device);
                }
            }
        }
        Ok(())
    }

    fn run_post_chain(&mut self, ctx: &mut FrameContext<'_>) {
        if self.config.post_filters.is_empty() {
            return;
        }
        let shaders = ctx.shaders;
        let filters = self.config.post_filters.clone();
        for name in &filters {
            let Some(shader_id) = shaders.shader_by_name(name) else {
                log::warn!("post filter '{name}' is not a known shader");
                continue;
            };
            let Some(desc) = shaders.shader_desc(shader_id) else { continue };
            if let Err(err) = self.execute_shader(ctx.device, desc, &[]) {
                log::warn!("post filter '{name}' skipped: {err:#}");
            }
        }
    }
}

/// Forward execution over one shader's contiguous call run: the visual and
/// material rebind only when they change from the previous call.
fn draw_forward(device: &mut dyn RenderDevice, calls: &[DrawCall]) {
    let mut bound_visual = VisualId::INVALID;
    let mut bound_material = MaterialId::INVALID;
    for call in calls {
        if call.visual != bound_visual {
            device.bind_visual(call.visual);
            bound_visual = call.visual;
        }
        if call.material != bound_material {
            device.bind_material(call.material);
            bound_material = call.material;
        }
        (call.draw)(device);
    }
}
