mod geometry;
mod instance;
mod obj;
pub mod primitives;

use std::sync::Arc;

use index_vec::IndexVec;
use thiserror::Error;

use crate::{
    geometry::{Transform, WorldBox, WorldMatrix},
    kd_tree::{BuildSettings, KdTree, build_instance_tree},
    shading::{Environment, Light, Material, PassthroughMaterial, SingleColorEnvironment},
};

pub use geometry::{Geometry, GeometryBuilder, PrimitiveKind, TriDesc};
pub use instance::Instance;
pub use obj::{ObjLoadError, load_obj, parse_obj};

index_vec::define_index_type! {
    pub struct GeometryIdx = u32;
}

index_vec::define_index_type! {
    pub struct InstanceIdx = u32;
}

index_vec::define_index_type! {
    pub struct MaterialIdx = u32;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("Geometry {0:?} does not exist")]
    UnknownGeometry(GeometryIdx),
    #[error("Instance {0:?} does not exist")]
    UnknownInstance(InstanceIdx),
    #[error("Material {0:?} does not exist")]
    UnknownMaterial(MaterialIdx),
    #[error("Transform matrix is not invertible")]
    SingularTransform,
    #[error("Vertex index {index} is out of range, the geometry has {count} vertices")]
    VertexOutOfRange { index: u32, count: u32 },
    #[error("Texture image has no pixels")]
    EmptyTexture,
}

/// Parameters used while tracing and shading.
#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct TraceSettings {
    /// Start of every traced ray, keeps secondary rays from hitting their origin surface.
    #[builder(default = 2e-4)]
    pub ray_epsilon: f32,
    #[builder(default = 3)]
    pub max_recursion_depth: u32,
    #[builder(default = 1.0)]
    pub medium_refraction_index: f32,
}

impl Default for TraceSettings {
    fn default() -> Self {
        TraceSettings::builder().build()
    }
}

/// Geometries, their instances and the shading plugins of a frame.
///
/// Changes to instances only mark the scene dirty, the instance tree is rebuilt
/// by `prepare_frame`. Tracing requires a prepared scene.
pub struct Scene {
    geometries: IndexVec<GeometryIdx, Geometry>,
    instances: IndexVec<InstanceIdx, Instance>,
    materials: IndexVec<MaterialIdx, Arc<dyn Material>>,
    lights: Vec<Arc<dyn Light>>,
    environment: Arc<dyn Environment>,

    instance_tree: KdTree,
    dirty: bool,

    pub settings: TraceSettings,
    pub build_settings: BuildSettings,
}

impl Default for Scene {
    fn default() -> Self {
        Scene::new()
    }
}

impl Scene {
    /// Empty scene with the default material at index 0 and a black environment.
    pub fn new() -> Scene {
        let mut materials: IndexVec<MaterialIdx, Arc<dyn Material>> = IndexVec::new();
        materials.push(Arc::new(PassthroughMaterial));

        Scene {
            geometries: IndexVec::new(),
            instances: IndexVec::new(),
            materials,
            lights: Vec::new(),
            environment: Arc::new(SingleColorEnvironment::default()),

            instance_tree: KdTree::empty(),
            dirty: false,

            settings: TraceSettings::default(),
            build_settings: BuildSettings::default(),
        }
    }

    pub fn add_material(&mut self, material: Arc<dyn Material>) -> MaterialIdx {
        self.materials.push(material)
    }

    pub fn add_light(&mut self, light: Arc<dyn Light>) {
        self.lights.push(light);
    }

    pub fn set_environment(&mut self, environment: Arc<dyn Environment>) {
        self.environment = environment;
    }

    /// Adds a geometry, all of its material ids must exist.
    pub fn add_geometry(&mut self, geometry: Geometry) -> Result<GeometryIdx, SceneError> {
        self.check_materials(&geometry)?;
        Ok(self.geometries.push(geometry))
    }

    /// Replaces a geometry, instances of it follow the new bounds.
    pub fn replace_geometry(&mut self, index: GeometryIdx, geometry: Geometry) -> Result<(), SceneError> {
        self.check_materials(&geometry)?;
        let slot = self
            .geometries
            .get_mut(index)
            .ok_or(SceneError::UnknownGeometry(index))?;
        *slot = geometry;

        let bounds = self.geometries[index].bounds();
        for instance in self.instances.iter_mut() {
            if instance.geometry() == index {
                instance.update_bounds(bounds);
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Places a geometry into the world using an object to world matrix.
    pub fn instantiate(&mut self, geometry: GeometryIdx, matrix: WorldMatrix) -> Result<InstanceIdx, SceneError> {
        let bounds = self
            .geometries
            .get(geometry)
            .ok_or(SceneError::UnknownGeometry(geometry))?
            .bounds();
        let transform = Transform::new(matrix).ok_or(SceneError::SingularTransform)?;

        let instance = Instance::new(geometry, transform, bounds);
        self.dirty = true;
        Ok(self.instances.push(instance))
    }

    pub fn set_instance_transform(&mut self, index: InstanceIdx, matrix: WorldMatrix) -> Result<(), SceneError> {
        let transform = Transform::new(matrix).ok_or(SceneError::SingularTransform)?;
        let instance = self
            .instances
            .get_mut(index)
            .ok_or(SceneError::UnknownInstance(index))?;
        instance.set_transform(transform, self.geometries[instance.geometry()].bounds());
        self.dirty = true;
        Ok(())
    }

    /// Rebuilds the instance tree if anything moved since the last frame.
    pub fn prepare_frame(&mut self) {
        if !self.dirty {
            return;
        }
        let boxes: Vec<WorldBox> = self.instances.iter().map(|i| i.bounds().clone()).collect();
        let raw = build_instance_tree(&boxes, &self.build_settings);
        self.instance_tree = KdTree::from_raw(raw);
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn geometry(&self, index: GeometryIdx) -> &Geometry {
        &self.geometries[index]
    }

    pub fn geometries(&self) -> &IndexVec<GeometryIdx, Geometry> {
        &self.geometries
    }

    pub fn instance(&self, index: InstanceIdx) -> &Instance {
        &self.instances[index]
    }

    pub fn instances(&self) -> &IndexVec<InstanceIdx, Instance> {
        &self.instances
    }

    pub fn material(&self, index: MaterialIdx) -> &dyn Material {
        self.materials[index].as_ref()
    }

    pub fn lights(&self) -> &[Arc<dyn Light>] {
        &self.lights
    }

    pub fn environment(&self) -> &dyn Environment {
        self.environment.as_ref()
    }

    pub fn instance_tree(&self) -> &KdTree {
        &self.instance_tree
    }

    /// World box of all instances, degenerate for an empty scene.
    pub fn bounds(&self) -> &WorldBox {
        self.instance_tree.bounds()
    }

    fn check_materials(&self, geometry: &Geometry) -> Result<(), SceneError> {
        match geometry
            .tri_desc
            .iter()
            .find(|t| t.material.index() >= self.materials.len())
        {
            Some(t) => Err(SceneError::UnknownMaterial(t.material)),
            None => Ok(()),
        }
    }
}
