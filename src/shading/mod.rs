//! Per ray shading state and the plugin interfaces called by the tracer.

mod plugins;
mod texture;

use crate::{
    geometry::{Ray, RayPacket, TexturePoint, WorldPoint, WorldVector},
    scene::Scene,
    tracer::{Hit, HitPacket, Tracer},
    util::{Color, simd::PACKET_SIZE},
};

pub use plugins::{
    AreaLight, ColoredHeadlightMaterial, DepthMaterial, HeadlightMaterial, LambertMaterial, PassthroughMaterial,
    PhongMaterial, PointLight, SingleColorEnvironment,
};
pub use texture::{Filter, Texture2D, TextureMode, Wrap};

/// Surface response, called by the tracer for rays that hit a triangle with this material.
pub trait Material: Send + Sync {
    /// Writes the color of the hit into `state.color`. Can trace secondary rays through `tracer`.
    fn shade(&self, tracer: &mut Tracer<'_>, state: &mut RayState, hit: &Hit);
}

/// Color of rays that leave the scene.
pub trait Environment: Send + Sync {
    fn shade(&self, state: &mut RayState);
}

/// Surface pattern looked up by the interpolated texture coordinate of a hit.
pub trait Texture: Send + Sync {
    /// Combines the shaded color of a surface with the texture at `tex_coord`.
    fn apply(&self, color: Color, tex_coord: TexturePoint) -> Color;
}

pub trait Light: Send + Sync {
    /// Fills a light state prepared by `RayState::light_state`: the ray direction points
    /// towards the light and the color is the light arriving at the hit point.
    /// Returns false when no light arrives.
    fn illuminate(&self, tracer: &mut Tracer<'_>, state: &mut RayState) -> bool;
}

/// Everything known about a single ray during shading.
#[derive(Clone, Debug)]
pub struct RayState {
    pub ray: Ray,
    pub hit: Option<Hit>,
    pub color: Color,
    pub recursion_depth: u32,

    /// Valid after `compute_hit_position`.
    pub hit_position: WorldPoint,
    /// Valid after `compute_shading_normal` or `compute_flat_normal`, world space, normalized.
    pub shading_normal: WorldVector,
}

impl RayState {
    /// State of a primary ray.
    pub fn new(ray: Ray) -> RayState {
        RayState {
            ray,
            hit: None,
            color: Color::new(0.0, 0.0, 0.0),
            recursion_depth: 0,
            hit_position: WorldPoint::origin(),
            shading_normal: WorldVector::zeros(),
        }
    }

    /// State of a ray spawned from this one.
    fn secondary(&self, ray: Ray) -> RayState {
        RayState {
            recursion_depth: self.recursion_depth + 1,
            ..RayState::new(ray)
        }
    }

    pub fn compute_hit_position(&mut self, hit: &Hit) -> WorldPoint {
        self.hit_position = self.ray.point_at(hit.distance);
        self.hit_position
    }

    /// Interpolated vertex normal, moved to world space by the instance transform.
    pub fn compute_shading_normal(&mut self, scene: &Scene, hit: &Hit) -> WorldVector {
        let geometry = scene.geometry(hit.geometry);
        let vertices = geometry.tri_desc[hit.triangle as usize].vertices;
        let normal = interpolate(hit, vertices.map(|v| geometry.normals[v as usize]));
        self.shading_normal = scene.instance(hit.instance).transform().transform_normal(&normal);
        self.shading_normal
    }

    /// Geometric normal of the hit triangle, in world space.
    pub fn compute_flat_normal(&mut self, scene: &Scene, hit: &Hit) -> WorldVector {
        let [a, b, c] = scene.geometry(hit.geometry).triangle_vertices(hit.triangle);
        let normal = (b - a).cross(&(c - a));
        self.shading_normal = scene.instance(hit.instance).transform().transform_normal(&normal);
        self.shading_normal
    }

    /// The shading normal faces against the ray.
    pub fn is_front_face(&self) -> bool {
        self.shading_normal.dot(&self.ray.direction) <= 0.0
    }

    /// Mirror direction of the ray around the shading normal, normalized.
    pub fn specular_vector(&self) -> WorldVector {
        reflect(&self.ray.direction.normalize(), &self.shading_normal)
    }

    pub fn stop_recursion(&self, max_recursion_depth: u32) -> bool {
        self.recursion_depth >= max_recursion_depth
    }

    /// Mirror ray from the hit position.
    pub fn reflection_state(&self) -> RayState {
        self.secondary(Ray::new(self.hit_position, self.specular_vector()))
    }

    /// Refracted ray from the hit position, `None` on total internal reflection.
    ///
    /// Entering front faces goes from the medium into the material, back faces the other way.
    pub fn refraction_state(&self, refraction_index: f32, medium_refraction_index: f32) -> Option<RayState> {
        let (normal, ratio) = if self.is_front_face() {
            (self.shading_normal, medium_refraction_index / refraction_index)
        } else {
            (-self.shading_normal, refraction_index / medium_refraction_index)
        };

        let incident = self.ray.direction.normalize();
        let cos_i = -normal.dot(&incident);
        let cos_t2 = 1.0 - ratio * ratio * (1.0 - cos_i * cos_i);
        if cos_t2 <= 0.0 {
            return None;
        }

        let direction = incident * ratio + normal * (ratio * cos_i - cos_t2.sqrt());
        Some(self.secondary(Ray::new(self.hit_position, direction)))
    }

    /// Starting point for a light's `illuminate`: the hit position lifted off the
    /// surface along the shading normal.
    pub fn light_state(&self, ray_epsilon: f32) -> RayState {
        let mut ray = self.ray;
        ray.origin = self.hit_position + self.shading_normal * ray_epsilon;
        RayState {
            ray,
            hit: None,
            color: Color::new(0.0, 0.0, 0.0),
            recursion_depth: self.recursion_depth,
            hit_position: ray.origin,
            shading_normal: self.shading_normal,
        }
    }

    /// Points the ray of a light state at the light, `to_light` is relative to the
    /// hit position and spans `[0, max_distance]`.
    /// Returns false when the light is behind the surface.
    pub fn init_shadow_ray(&mut self, to_light: &WorldVector, max_distance: f32) -> bool {
        if self.shading_normal.dot(to_light) <= 0.0 {
            return false;
        }
        self.ray = Ray::new(self.hit_position, *to_light);
        self.ray.tfar = max_distance;
        true
    }
}

impl Hit {
    /// Interpolated vertex color.
    pub fn shading_color(&self, scene: &Scene) -> Color {
        let geometry = scene.geometry(self.geometry);
        let colors = geometry.tri_desc[self.triangle as usize]
            .vertices
            .map(|v| geometry.colors[v as usize]);
        let [a, b, c] = self.barycentric;
        colors[0] * a + colors[1] * b + colors[2] * c
    }

    /// Interpolated texture coordinate.
    pub fn tex_coord(&self, scene: &Scene) -> TexturePoint {
        let geometry = scene.geometry(self.geometry);
        let vertices = geometry.tri_desc[self.triangle as usize].vertices;
        let [a, b, c] = vertices.map(|v| geometry.tex_coords[v as usize].coords);
        let [wa, wb, wc] = self.barycentric;
        TexturePoint::from(a * wa + b * wb + c * wc)
    }
}

fn interpolate(hit: &Hit, values: [WorldVector; 3]) -> WorldVector {
    let [a, b, c] = hit.barycentric;
    values[0] * a + values[1] * b + values[2] * c
}

/// Mirrors `incident` around `normal`.
pub fn reflect(incident: &WorldVector, normal: &WorldVector) -> WorldVector {
    incident - normal * (2.0 * incident.dot(normal))
}

/// 16 rays traced together and their results.
#[derive(Clone, Debug)]
pub struct RayPacketState {
    pub packet: RayPacket,
    pub hits: HitPacket,
    pub colors: [Color; PACKET_SIZE],
    pub recursion_depth: [u32; PACKET_SIZE],
}

impl RayPacketState {
    pub fn new(packet: RayPacket) -> RayPacketState {
        RayPacketState {
            packet,
            hits: HitPacket::default(),
            colors: [Color::new(0.0, 0.0, 0.0); PACKET_SIZE],
            recursion_depth: [0; PACKET_SIZE],
        }
    }
}
