mod frame_buffer;
mod machinery;
mod worker;

use std::num::{NonZeroU32, NonZeroUsize};

pub use crate::renderer::frame_buffer::FrameBuffer;
pub use crate::renderer::machinery::{RenderProgress, render};

const DEFAULT_TILE_SIZE: NonZeroU32 = NonZeroU32::new(32).unwrap();

/// Strategy used to turn pixels into primary rays.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RenderMode {
    /// One ray through the center of each pixel.
    Single,
    /// 4x4 pixel packets traced together.
    Packet,
    /// Averages `samples` rays through random points of each pixel.
    Jittered { samples: NonZeroU32 },
    /// Four jittered rays per pixel, one in each quadrant. Quadrants of pixels where the
    /// samples differ by more than `threshold` in any channel are refined recursively,
    /// the pixel itself is level 1.
    Adaptive { max_depth: NonZeroU32, threshold: f32 },
}

#[derive(Copy, Clone, Debug, bon::Builder)]
pub struct RenderSettings {
    #[builder(default = DEFAULT_TILE_SIZE)]
    pub tile_size: NonZeroU32,
    #[builder(default = RenderMode::Single)]
    pub mode: RenderMode,
    /// Number of worker threads, one per logical CPU if not set.
    pub workers: Option<NonZeroUsize>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        RenderSettings::builder().build()
    }
}
