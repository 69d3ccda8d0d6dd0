pub mod camera;
pub mod config;
pub mod events;
pub mod gpu;
pub mod handles;
pub mod jobs;
pub mod lights;
pub mod registry;
pub mod renderer;

pub use renderer::{FrameContext, Renderer};
