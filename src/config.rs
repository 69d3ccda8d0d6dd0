use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "ClusterConfig::default_grid_x")]
    pub grid_x: u32,
    #[serde(default = "ClusterConfig::default_grid_y")]
    pub grid_y: u32,
    #[serde(default = "ClusterConfig::default_grid_z")]
    pub grid_z: u32,
    #[serde(default = "ClusterConfig::default_max_lights_per_cell")]
    pub max_lights_per_cell: u16,
}

impl ClusterConfig {
    const fn default_grid_x() -> u32 {
        16
    }

    const fn default_grid_y() -> u32 {
        8
    }

    const fn default_grid_z() -> u32 {
        8
    }

    const fn default_max_lights_per_cell() -> u16 {
        255
    }

    pub fn cell_count(&self) -> usize {
        self.grid_x.max(1) as usize * self.grid_y.max(1) as usize * self.grid_z.max(1) as usize
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            grid_x: Self::default_grid_x(),
            grid_y: Self::default_grid_y(),
            grid_z: Self::default_grid_z(),
            max_lights_per_cell: Self::default_max_lights_per_cell(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LightingConfig {
    #[serde(default = "LightingConfig::default_lights_per_pass")]
    pub lights_per_pass: u32,
}

impl LightingConfig {
    const fn default_lights_per_pass() -> u32 {
        8
    }
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self { lights_per_pass: Self::default_lights_per_pass() }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default = "ProfilerConfig::default_history_samples")]
    pub history_samples: usize,
    #[serde(default = "ProfilerConfig::default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl ProfilerConfig {
    const fn default_history_samples() -> usize {
        100
    }

    const fn default_refresh_interval_ms() -> u64 {
        500
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            history_samples: Self::default_history_samples(),
            refresh_interval_ms: Self::default_refresh_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub lighting: LightingConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default = "RendererConfig::default_workers")]
    pub workers: usize,
    #[serde(default = "RendererConfig::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default = "RendererConfig::default_scene_output")]
    pub scene_output: String,
    #[serde(default = "RendererConfig::default_screen_output")]
    pub screen_output: String,
    #[serde(default)]
    pub post_filters: Vec<String>,
}

impl RendererConfig {
    const fn default_workers() -> usize {
        3
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.05, 0.06, 0.1, 1.0]
    }

    fn default_scene_output() -> String {
        "scene.color".to_string()
    }

    fn default_screen_output() -> String {
        "screen".to_string()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("config load error: {err:?}, falling back to defaults");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &RendererConfigOverrides) {
        if let Some([x, y, z]) = overrides.cluster_grid {
            self.cluster.grid_x = x.max(1);
            self.cluster.grid_y = y.max(1);
            self.cluster.grid_z = z.max(1);
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers.max(1);
        }
        if let Some(lights_per_pass) = overrides.lights_per_pass {
            self.lighting.lights_per_pass = lights_per_pass.max(1);
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            lighting: LightingConfig::default(),
            profiler: ProfilerConfig::default(),
            workers: Self::default_workers(),
            clear_color: Self::default_clear_color(),
            scene_output: Self::default_scene_output(),
            screen_output: Self::default_screen_output(),
            post_filters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RendererConfigOverrides {
    pub cluster_grid: Option<[u32; 3]>,
    pub workers: Option<usize>,
    pub lights_per_pass: Option<u32>,
}
