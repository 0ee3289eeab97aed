mod camera;
pub mod geometry;
pub mod kd_tree;
mod renderer;
pub mod scene;
mod screen_block;
pub mod shading;
pub mod tracer;
pub mod util;

pub use crate::renderer::{FrameBuffer, RenderMode, RenderProgress, RenderSettings, render};
pub use camera::{Camera, PerspectiveCamera};
pub use scene::Scene;
pub use screen_block::{ScreenBlock, ScreenPoint, ScreenSize};
