use std::{f32::consts::TAU, num::NonZeroU32, sync::Arc};

use rand::Rng as _;

use crate::{
    geometry::{Ray, WorldPoint, WorldVector},
    tracer::{Hit, Tracer},
    util::Color,
};

use super::{Environment, Light, Material, RayState, Texture};

const DEFAULT_AREA_LIGHT_SAMPLES: NonZeroU32 = NonZeroU32::new(4).unwrap();

/// Leaves the color of the ray as it is.
#[derive(Copy, Clone, Debug, Default)]
pub struct PassthroughMaterial;

impl Material for PassthroughMaterial {
    fn shade(&self, _tracer: &mut Tracer<'_>, _state: &mut RayState, _hit: &Hit) {}
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SingleColorEnvironment {
    pub color: Color,
}

impl Default for SingleColorEnvironment {
    fn default() -> Self {
        SingleColorEnvironment {
            color: Color::new(0.0, 0.0, 0.0),
        }
    }
}

impl Environment for SingleColorEnvironment {
    fn shade(&self, state: &mut RayState) {
        state.color = self.color;
    }
}

/// Gray level equal to the distance of the hit from the ray origin.
#[derive(Copy, Clone, Debug, Default)]
pub struct DepthMaterial;

impl Material for DepthMaterial {
    fn shade(&self, _tracer: &mut Tracer<'_>, state: &mut RayState, hit: &Hit) {
        let position = state.compute_hit_position(hit);
        let depth = (position - state.ray.origin).norm();
        state.color = Color::new(depth, depth, depth);
    }
}

/// Vertex colors lit by a light at the eye.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeadlightMaterial {
    pub ambient: f32,
}

impl Default for HeadlightMaterial {
    fn default() -> Self {
        HeadlightMaterial { ambient: 0.1 }
    }
}

impl Material for HeadlightMaterial {
    fn shade(&self, tracer: &mut Tracer<'_>, state: &mut RayState, hit: &Hit) {
        let scene = tracer.scene();
        let normal = state.compute_shading_normal(scene, hit);
        let n_dot_d = normal.dot(&state.ray.direction.normalize()).abs();

        let color = hit.shading_color(scene);
        let ambient = Color::new(self.ambient, self.ambient, self.ambient);
        state.color = (ambient + (color - ambient) * n_dot_d) * color;
    }
}

/// Headlight shading with material colors instead of vertex colors.
/// Back faces get only the ambient term.
#[derive(Copy, Clone, Debug, PartialEq, bon::Builder)]
pub struct ColoredHeadlightMaterial {
    #[builder(default = Color::new(0.1, 0.1, 0.1))]
    pub ambient: Color,
    #[builder(default = Color::new(1.0, 1.0, 1.0))]
    pub diffuse: Color,
}

impl Default for ColoredHeadlightMaterial {
    fn default() -> Self {
        ColoredHeadlightMaterial::builder().build()
    }
}

impl Material for ColoredHeadlightMaterial {
    fn shade(&self, tracer: &mut Tracer<'_>, state: &mut RayState, hit: &Hit) {
        let normal = state.compute_shading_normal(tracer.scene(), hit);
        let n_dot_d = (-normal.dot(&state.ray.direction.normalize())).max(0.0);
        state.color = (self.ambient + (self.diffuse - self.ambient) * n_dot_d) * self.diffuse;
    }
}

/// Light arriving at the hit point of `state`, summed over all scene lights.
/// Returns the diffuse sum and the specular sum for `specular_exponent`.
/// Expects the hit position and shading normal to be computed already.
fn gather_light(tracer: &mut Tracer<'_>, state: &RayState, specular_exponent: Option<f32>) -> (Color, Color) {
    let mut diffuse = Color::new(0.0, 0.0, 0.0);
    let mut specular = Color::new(0.0, 0.0, 0.0);
    let specular_vector = state.specular_vector();

    for light in tracer.scene().lights() {
        let Some(light_state) = tracer.illuminate(light.as_ref(), state) else {
            continue;
        };
        let to_light = light_state.ray.direction.normalize();
        diffuse += light_state.color * state.shading_normal.dot(&to_light);

        if let Some(exponent) = specular_exponent {
            let s_dot_l = specular_vector.dot(&to_light);
            if s_dot_l > 0.0 {
                specular += light_state.color * s_dot_l.powf(exponent);
            }
        }
    }
    (diffuse, specular)
}

/// Adds the mirrored ray with weight `reflectivity` and the refracted ray with weight
/// `1 - opacity` to `state.color`, unless the recursion limit is reached.
fn trace_secondary(tracer: &mut Tracer<'_>, state: &mut RayState, reflectivity: f32, opacity: f32, refraction_index: f32) {
    let settings = &tracer.scene().settings;
    if state.stop_recursion(settings.max_recursion_depth) {
        return;
    }
    let medium_refraction_index = settings.medium_refraction_index;

    if reflectivity > 0.0 {
        let mut reflected = state.reflection_state();
        tracer.trace_single(&mut reflected);
        state.color += reflected.color * reflectivity;
    }

    if opacity < 1.0 {
        if let Some(mut refracted) = state.refraction_state(refraction_index, medium_refraction_index) {
            tracer.trace_single(&mut refracted);
            state.color += refracted.color * (1.0 - opacity);
        }
    }
}

/// Diffuse surface lit by the scene lights, optionally reflective or transparent.
#[derive(Copy, Clone, Debug, PartialEq, bon::Builder)]
pub struct LambertMaterial {
    #[builder(default = Color::new(0.1, 0.1, 0.1))]
    pub ambient: Color,
    #[builder(default = Color::new(1.0, 1.0, 1.0))]
    pub diffuse: Color,
    /// Weight of the mirrored ray.
    #[builder(default = 0.0)]
    pub reflectivity: f32,
    /// Below 1 the refracted ray contributes with weight `1 - opacity`.
    #[builder(default = 1.0)]
    pub opacity: f32,
    #[builder(default = 1.0)]
    pub refraction_index: f32,
}

impl Default for LambertMaterial {
    fn default() -> Self {
        LambertMaterial::builder().build()
    }
}

impl Material for LambertMaterial {
    fn shade(&self, tracer: &mut Tracer<'_>, state: &mut RayState, hit: &Hit) {
        let scene = tracer.scene();
        state.compute_shading_normal(scene, hit);
        state.compute_hit_position(hit);

        let (diffuse, _) = gather_light(tracer, state, None);
        state.color = self.diffuse * (self.ambient + diffuse) * hit.shading_color(scene);

        trace_secondary(tracer, state, self.reflectivity, self.opacity, self.refraction_index);
    }
}

/// Lambert shading plus a Phong specular highlight, with an optional texture applied
/// before the secondary rays are added.
#[derive(Clone, bon::Builder)]
pub struct PhongMaterial {
    #[builder(default = Color::new(0.1, 0.1, 0.1))]
    pub ambient: Color,
    #[builder(default = Color::new(1.0, 1.0, 1.0))]
    pub diffuse: Color,
    #[builder(default = Color::new(1.0, 1.0, 1.0))]
    pub specular: Color,
    #[builder(default = 32.0)]
    pub specular_exponent: f32,
    #[builder(default = 0.0)]
    pub reflectivity: f32,
    #[builder(default = 1.0)]
    pub opacity: f32,
    #[builder(default = 1.0)]
    pub refraction_index: f32,
    pub texture: Option<Arc<dyn Texture>>,
}

impl Default for PhongMaterial {
    fn default() -> Self {
        PhongMaterial::builder().build()
    }
}

impl Material for PhongMaterial {
    fn shade(&self, tracer: &mut Tracer<'_>, state: &mut RayState, hit: &Hit) {
        let scene = tracer.scene();
        state.compute_shading_normal(scene, hit);
        state.compute_hit_position(hit);

        let (diffuse, specular) = gather_light(tracer, state, Some(self.specular_exponent));
        state.color = self.diffuse * (self.ambient + diffuse) * hit.shading_color(scene) + self.specular * specular;

        if let Some(texture) = &self.texture {
            state.color = texture.apply(state.color, hit.tex_coord(scene));
        }

        trace_secondary(tracer, state, self.reflectivity, self.opacity, self.refraction_index);
    }
}

/// Point light with distance attenuation `1 / (constant + linear d + quadratic d^2)`.
#[derive(Copy, Clone, Debug, PartialEq, bon::Builder)]
pub struct PointLight {
    pub position: WorldPoint,
    #[builder(default = Color::new(1.0, 1.0, 1.0))]
    pub intensity: Color,
    #[builder(default = true)]
    pub cast_shadows: bool,
    #[builder(default = [0.0, 0.005, 0.01])]
    pub attenuation: [f32; 3],
}

impl Light for PointLight {
    fn illuminate(&self, tracer: &mut Tracer<'_>, state: &mut RayState) -> bool {
        if !state.is_front_face() {
            return false;
        }

        let to_light = self.position - state.hit_position;
        if !state.init_shadow_ray(&to_light, 1.0) {
            return false;
        }
        if self.cast_shadows && tracer.trace_hit_single(state) {
            return false;
        }

        state.color = self.intensity * attenuation(&self.attenuation, to_light.norm());
        true
    }
}

fn attenuation(coefficients: &[f32; 3], distance: f32) -> f32 {
    let [constant, linear, quadratic] = *coefficients;
    1.0 / (constant + linear * distance + quadratic * distance * distance)
}

/// Disk shaped light facing the lit point, gives soft shadows.
///
/// Every illumination casts `samples` shadow rays to random points of the disk,
/// the intensity is scaled by the fraction that reaches the light.
#[derive(Copy, Clone, Debug, PartialEq, bon::Builder)]
pub struct AreaLight {
    pub position: WorldPoint,
    #[builder(default = 1.0)]
    pub radius: f32,
    #[builder(default = DEFAULT_AREA_LIGHT_SAMPLES)]
    pub samples: NonZeroU32,
    #[builder(default = Color::new(1.0, 1.0, 1.0))]
    pub intensity: Color,
    #[builder(default = true)]
    pub cast_shadows: bool,
    #[builder(default = [0.0, 0.005, 0.01])]
    pub attenuation: [f32; 3],
}

impl Light for AreaLight {
    fn illuminate(&self, tracer: &mut Tracer<'_>, state: &mut RayState) -> bool {
        if !state.is_front_face() {
            return false;
        }

        let to_light = self.position - state.hit_position;
        let (axis_u, axis_v) = orthonormal_basis(&to_light);

        let mut visible = 0u32;
        for _ in 0..self.samples.get() {
            let (x, y) = random_disk_point(tracer);
            let to_sample = to_light + axis_u * (x * self.radius) + axis_v * (y * self.radius);
            if !state.init_shadow_ray(&to_sample, 1.0) {
                continue;
            }
            if self.cast_shadows && tracer.trace_hit_single(state) {
                continue;
            }
            visible += 1;
        }

        if visible == 0 {
            return false;
        }

        let coverage = visible as f32 / self.samples.get() as f32;
        state.color = self.intensity * (attenuation(&self.attenuation, to_light.norm()) * coverage);
        state.ray = Ray::new(state.hit_position, to_light);
        true
    }
}

/// Two unit vectors perpendicular to `direction` and to each other.
fn orthonormal_basis(direction: &WorldVector) -> (WorldVector, WorldVector) {
    let direction = direction.normalize();
    let helper = if direction.x.abs() > 0.9 {
        WorldVector::y()
    } else {
        WorldVector::x()
    };
    let u = direction.cross(&helper).normalize();
    let v = direction.cross(&u);
    (u, v)
}

/// Uniformly distributed point of the unit disk.
fn random_disk_point(tracer: &mut Tracer<'_>) -> (f32, f32) {
    let rng = tracer.rng();
    let r = rng.random::<f32>().sqrt();
    let theta = TAU * rng.random::<f32>();
    (r * theta.cos(), r * theta.sin())
}
