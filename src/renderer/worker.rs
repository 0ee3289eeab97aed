use itertools::{Itertools as _, iproduct};
use rand::{Rng as _, SeedableRng, rngs::SmallRng};

use crate::{
    camera::Camera,
    renderer::RenderMode,
    screen_block::ScreenBlock,
    shading::{RayPacketState, RayState},
    tracer::Tracer,
    util::{
        Color, bit_iter,
        simd::{PACKET_GROUPS, PACKET_SIZE, PacketMask, set_lane},
    },
};

/// Pixel offsets of the 16 rays of a packet inside its 4x4 block, as (x, y) pairs.
/// Consecutive rays are neighbors along a Hilbert curve.
const PACKET_GRID: [u32; 2 * PACKET_SIZE] = [
    0, 0, 1, 0, 1, 1, 0, 1, 0, 2, 0, 3, 1, 3, 1, 2, 2, 2, 2, 3, 3, 3, 3, 2, 3, 1, 2, 1, 2, 0, 3, 0,
];
const PACKET_BLOCK: u32 = 4;

pub struct Worker {
    rng: SmallRng,
}

impl Worker {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_os_rng(),
        }
    }

    #[cfg(test)]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Renders the tile into `buffer`, row-major with the tile's bottom row first.
    pub fn render_tile(
        &mut self,
        tracer: &mut Tracer<'_>,
        camera: &dyn Camera,
        mode: RenderMode,
        tile: &ScreenBlock,
        buffer: &mut Vec<Color>,
    ) {
        buffer.clear();
        buffer.resize(tile.area(), Color::new(0.0, 0.0, 0.0));

        match mode {
            RenderMode::Single => {
                for (pixel, point) in buffer.iter_mut().zip(tile.internal_points()) {
                    let mut state = RayState::new(camera.ray(point.x as f32 + 0.5, point.y as f32 + 0.5));
                    tracer.trace_single(&mut state);
                    *pixel = state.color;
                }
            }
            RenderMode::Jittered { samples } => {
                let weight = 1.0 / samples.get() as f32;
                for (pixel, point) in buffer.iter_mut().zip(tile.internal_points()) {
                    let mut sum = Color::new(0.0, 0.0, 0.0);
                    for _ in 0..samples.get() {
                        let x = point.x as f32 + self.rng.random::<f32>();
                        let y = point.y as f32 + self.rng.random::<f32>();
                        let mut state = RayState::new(camera.ray(x, y));
                        tracer.trace_single(&mut state);
                        sum += state.color;
                    }
                    *pixel = sum * weight;
                }
            }
            RenderMode::Adaptive { max_depth, threshold } => {
                let mut trace = |x: f32, y: f32| {
                    let mut state = RayState::new(camera.ray(x, y));
                    tracer.trace_single(&mut state);
                    state.color
                };
                for (pixel, point) in buffer.iter_mut().zip(tile.internal_points()) {
                    let center = (point.x as f32 + 0.5, point.y as f32 + 0.5);
                    *pixel = adaptive_supersample(&mut self.rng, &mut trace, center, 0.5, max_depth.get(), threshold);
                }
            }
            RenderMode::Packet => self.render_tile_packets(tracer, camera, tile, buffer),
        }
    }

    fn render_tile_packets(
        &self,
        tracer: &mut Tracer<'_>,
        camera: &dyn Camera,
        tile: &ScreenBlock,
        buffer: &mut [Color],
    ) {
        let width = tile.width();
        let blocks = iproduct!(
            (tile.min.y..tile.max.y).step_by(PACKET_BLOCK as usize),
            (tile.min.x..tile.max.x).step_by(PACKET_BLOCK as usize)
        );
        for (block_y, block_x) in blocks {
            let mut xs = [wide::f32x4::ZERO; PACKET_GROUPS];
            let mut ys = [wide::f32x4::ZERO; PACKET_GROUPS];
            let mut mask: PacketMask = 0;
            for i in 0..PACKET_SIZE {
                let x = block_x + PACKET_GRID[2 * i];
                let y = block_y + PACKET_GRID[2 * i + 1];
                set_lane(&mut xs, i, x as f32 + 0.5);
                set_lane(&mut ys, i, y as f32 + 0.5);
                if x < tile.max.x && y < tile.max.y {
                    mask |= 1 << i;
                }
            }

            let mut packet = camera.ray_packet(&xs, &ys);
            packet.mask = mask;
            let mut state = RayPacketState::new(packet);
            tracer.trace_packet(&mut state);

            for i in bit_iter(mask as u64) {
                let x = block_x + PACKET_GRID[2 * i] - tile.min.x;
                let y = block_y + PACKET_GRID[2 * i + 1] - tile.min.y;
                buffer[(y * width + x) as usize] = state.colors[i];
            }
        }
    }
}

/// Quadrant directions in the order upper left, upper right, lower left, lower right.
const QUADRANTS: [(f32, f32); 4] = [(-1.0, 1.0), (1.0, 1.0), (-1.0, -1.0), (1.0, -1.0)];

/// Color of the square with half size `extent` around `center`.
///
/// Traces one random point in each quadrant of the square. If two of the samples
/// differ by more than `threshold`, each quadrant is sampled again the same way with
/// `depth - 1` levels left and the result is the mean of both levels.
fn adaptive_supersample(
    rng: &mut SmallRng,
    trace: &mut impl FnMut(f32, f32) -> Color,
    center: (f32, f32),
    extent: f32,
    depth: u32,
    threshold: f32,
) -> Color {
    let (x, y) = center;
    let samples = QUADRANTS.map(|(sx, sy)| {
        let dx = sx * rng.random_range(0.0..extent);
        let dy = sy * rng.random_range(0.0..extent);
        trace(x + dx, y + dy)
    });
    let sum = |colors: &[Color; 4]| colors.iter().fold(Color::new(0.0, 0.0, 0.0), |acc, c| acc + *c);

    let differ = samples
        .iter()
        .tuple_combinations()
        .any(|(a, b)| colors_differ(a, b, threshold));
    if depth <= 1 || !differ {
        return sum(&samples) * 0.25;
    }

    let half = extent / 2.0;
    let refined = QUADRANTS.map(|(sx, sy)| {
        adaptive_supersample(rng, trace, (x + sx * half, y + sy * half), half, depth - 1, threshold)
    });
    (sum(&samples) + sum(&refined)) * 0.125
}

fn colors_differ(a: &Color, b: &Color, threshold: f32) -> bool {
    (a.r - b.r).abs() > threshold || (a.g - b.g).abs() > threshold || (a.b - b.b).abs() > threshold
}
