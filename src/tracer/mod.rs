//! Two level traversal, instance tree on top, per geometry kd-trees below.
//!
//! Both levels use the same front to back descent: a ray interval is split at each
//! plane, the far part goes to a stack and the near part is followed down to a leaf.
//! A geometry is traced only within the interval of the instance cell, so the first
//! leaf with a hit already gives the closest hit of that instance.

mod brute_force;
mod packet;
mod single;

use rand::{SeedableRng as _, rngs::SmallRng};
use wide::i32x4;

use crate::{
    geometry::{Ray, TriangleHit, TriangleHitPacket},
    scene::{GeometryIdx, InstanceIdx, Scene},
    shading::{Light, RayState},
    util::simd::{IntLanes, Lanes, PACKET_GROUPS, PACKET_SIZE, PacketMask, int_lane, lane},
};

/// Capacity of every traversal stack.
pub const MAX_STACK_SIZE: usize = 128;

const _: () = assert!(crate::kd_tree::MAX_DEPTH < MAX_STACK_SIZE);

/// Closest intersection of a ray with the scene.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Hit {
    /// Index into the geometry's triangle list.
    pub triangle: u32,
    /// Weights of the triangle's vertices at the hit point.
    pub barycentric: [f32; 3],
    /// Distance along the ray, in multiples of the direction length.
    pub distance: f32,
    pub instance: InstanceIdx,
    pub geometry: GeometryIdx,
}

impl Hit {
    fn new(hit: &TriangleHit, instance: InstanceIdx, geometry: GeometryIdx) -> Hit {
        Hit {
            triangle: hit.triangle,
            barycentric: hit.barycentric,
            distance: hit.distance,
            instance,
            geometry,
        }
    }
}

/// Per lane hits of a packet, instance and geometry ids are -1 where nothing was hit.
#[derive(Clone, Debug)]
pub struct HitPacket {
    pub triangles: TriangleHitPacket,
    pub instance: IntLanes,
    pub geometry: IntLanes,
}

impl Default for HitPacket {
    fn default() -> Self {
        HitPacket {
            triangles: TriangleHitPacket::default(),
            instance: [i32x4::splat(-1); PACKET_GROUPS],
            geometry: [i32x4::splat(-1); PACKET_GROUPS],
        }
    }
}

impl HitPacket {
    /// Hit of a single ray of the packet.
    pub fn hit(&self, ray: usize) -> Option<Hit> {
        let instance = int_lane(&self.instance, ray);
        if instance < 0 {
            return None;
        }
        Some(Hit {
            triangle: int_lane(&self.triangles.triangle, ray) as u32,
            barycentric: std::array::from_fn(|i| lane(&self.triangles.barycentric[i], ray)),
            distance: lane(&self.triangles.distance, ray),
            instance: InstanceIdx::from_raw(instance as u32),
            geometry: GeometryIdx::from_raw(int_lane(&self.geometry, ray) as u32),
        })
    }

    /// Rays that have a hit.
    pub fn hit_mask(&self) -> PacketMask {
        (0..PACKET_SIZE)
            .filter(|&ray| int_lane(&self.instance, ray) >= 0)
            .fold(0, |acc, ray| acc | (1 << ray))
    }
}

/// Work done by a tracer, summed over all traced rays.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TraversalCounters {
    /// Instance tree leaves visited.
    pub instance_leaves: usize,
    /// Geometry trees entered, after a successful box clip.
    pub geometry_traversals: usize,
    /// Geometry tree leaves visited.
    pub geometry_leaves: usize,
    pub triangle_tests: usize,
}

impl std::ops::AddAssign<&TraversalCounters> for TraversalCounters {
    fn add_assign(&mut self, other: &TraversalCounters) {
        self.instance_leaves += other.instance_leaves;
        self.geometry_traversals += other.geometry_traversals;
        self.geometry_leaves += other.geometry_leaves;
        self.triangle_tests += other.triangle_tests;
    }
}

#[derive(Copy, Clone, Debug)]
struct StackEntry {
    node: usize,
    tnear: f32,
    tfar: f32,
}

#[derive(Copy, Clone, Debug)]
struct PacketStackEntry {
    node: usize,
    tnear: Lanes,
    tfar: Lanes,
}

/// Traversal stacks, reused between rays.
#[derive(Debug)]
struct StackCache {
    instance: Vec<StackEntry>,
    geometry: Vec<StackEntry>,
    instance_packet: Vec<PacketStackEntry>,
    geometry_packet: Vec<PacketStackEntry>,
}

impl Default for StackCache {
    fn default() -> Self {
        StackCache {
            instance: Vec::with_capacity(MAX_STACK_SIZE),
            geometry: Vec::with_capacity(MAX_STACK_SIZE),
            instance_packet: Vec::with_capacity(MAX_STACK_SIZE),
            geometry_packet: Vec::with_capacity(MAX_STACK_SIZE),
        }
    }
}

fn push<T>(stack: &mut Vec<T>, entry: T) {
    debug_assert!(stack.len() < MAX_STACK_SIZE);
    stack.push(entry);
}

/// Traces rays through a prepared scene.
///
/// Owns the scratch memory of the traversal, one tracer per thread.
/// Shading plugins get the tracer back to cast secondary rays and draw random samples.
pub struct Tracer<'a> {
    scene: &'a Scene,
    stacks: StackCache,
    counters: TraversalCounters,
    rng: SmallRng,
}

impl<'a> Tracer<'a> {
    pub fn new(scene: &'a Scene) -> Tracer<'a> {
        Self::with_rng(scene, SmallRng::from_os_rng())
    }

    /// Tracer with reproducible random samples.
    pub fn with_seed(scene: &'a Scene, seed: u64) -> Tracer<'a> {
        Self::with_rng(scene, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(scene: &'a Scene, rng: SmallRng) -> Tracer<'a> {
        debug_assert!(!scene.is_dirty(), "Scene must be prepared before tracing");
        Tracer {
            scene,
            stacks: StackCache::default(),
            counters: TraversalCounters::default(),
            rng,
        }
    }

    pub fn scene(&self) -> &'a Scene {
        self.scene
    }

    /// Random numbers for stochastic shading, private to this thread.
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }

    pub fn counters(&self) -> &TraversalCounters {
        &self.counters
    }

    /// Returns the counters collected so far and starts from zero.
    pub fn take_counters(&mut self) -> TraversalCounters {
        std::mem::take(&mut self.counters)
    }

    /// Runs the material of the hit, or the environment if there is none.
    pub fn shade(&mut self, state: &mut RayState) {
        let scene = self.scene;
        match state.hit {
            Some(hit) => {
                let material = scene.geometry(hit.geometry).tri_desc[hit.triangle as usize].material;
                scene.material(material).shade(self, state, &hit);
            }
            None => scene.environment().shade(state),
        }
    }

    /// Asks a light for its contribution at the hit point of `state`.
    ///
    /// Returns the light state with the direction towards the light and the incoming
    /// color, or `None` when the light doesn't reach the point.
    pub fn illuminate(&mut self, light: &dyn Light, state: &RayState) -> Option<RayState> {
        let mut light_state = state.light_state(self.scene.settings.ray_epsilon);
        light.illuminate(self, &mut light_state).then_some(light_state)
    }

    /// Shades every active ray of a packet from its hits through the single ray interface.
    fn shade_packet(&mut self, state: &mut crate::shading::RayPacketState) {
        for ray in crate::util::bit_iter(state.packet.mask as u64) {
            debug_assert!(ray < PACKET_SIZE);
            let mut ray_state = RayState::new(state.packet.ray(ray));
            ray_state.recursion_depth = state.recursion_depth[ray];
            ray_state.hit = state.hits.hit(ray);
            self.shade(&mut ray_state);
            state.colors[ray] = ray_state.color;
        }
    }
}
