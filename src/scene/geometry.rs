use crate::{
    geometry::{TexturePoint, Transform, TriAccel, WorldBox, WorldMatrix, WorldPoint, WorldVector},
    kd_tree::{BuildSettings, KdTree, TriangleTreeBuilder},
    util::Color,
};

use super::{MaterialIdx, SceneError};

/// Vertex indices and material of a single triangle.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TriDesc {
    pub vertices: [u32; 3],
    pub material: MaterialIdx,
}

/// Triangle mesh with its own kd-tree, in object space.
///
/// Vertex attributes are stored in parallel arrays, `tri_accel[i]` belongs to `tri_desc[i]`
/// and the leaves of the tree reference triangles by this index.
#[derive(Clone, Debug)]
pub struct Geometry {
    pub vertices: Vec<WorldPoint>,
    pub normals: Vec<WorldVector>,
    pub colors: Vec<Color>,
    pub tex_coords: Vec<TexturePoint>,

    pub tri_desc: Vec<TriDesc>,
    pub tri_accel: Vec<TriAccel>,

    kd_tree: KdTree,
}

impl Geometry {
    pub fn builder() -> GeometryBuilder {
        GeometryBuilder::new()
    }

    pub fn kd_tree(&self) -> &KdTree {
        &self.kd_tree
    }

    pub fn bounds(&self) -> &WorldBox {
        self.kd_tree.bounds()
    }

    pub fn triangle_count(&self) -> usize {
        self.tri_desc.len()
    }

    /// Corner positions of a triangle.
    pub fn triangle_vertices(&self, triangle: u32) -> [WorldPoint; 3] {
        self.tri_desc[triangle as usize]
            .vertices
            .map(|i| self.vertices[i as usize])
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveKind {
    /// Every three vertices form a triangle.
    Triangles,
    /// Every vertex after the second forms a triangle with the previous two,
    /// winding alternates so that all triangles face the same way.
    TriangleStrip,
}

/// Assembles a geometry from primitives.
///
/// Vertices pick up the current normal, color and texture coordinate, positions and
/// normals are transformed by the current transform when they are added.
#[derive(Clone, Debug)]
pub struct GeometryBuilder {
    transform: Transform,
    material: MaterialIdx,
    normal: WorldVector,
    color: Color,
    tex_coord: TexturePoint,

    /// Kind of the open primitive and its first vertex
    primitive: Option<(PrimitiveKind, u32)>,
    dropped_triangles: usize,

    vertices: Vec<WorldPoint>,
    normals: Vec<WorldVector>,
    colors: Vec<Color>,
    tex_coords: Vec<TexturePoint>,
    tri_desc: Vec<TriDesc>,
    tri_accel: Vec<TriAccel>,
}

impl Default for GeometryBuilder {
    fn default() -> Self {
        GeometryBuilder::new()
    }
}

impl GeometryBuilder {
    pub fn new() -> GeometryBuilder {
        GeometryBuilder {
            transform: Transform::identity(),
            material: MaterialIdx::from_raw(0),
            normal: WorldVector::z(),
            color: Color::new(1.0, 1.0, 1.0),
            tex_coord: TexturePoint::origin(),

            primitive: None,
            dropped_triangles: 0,

            vertices: Vec::new(),
            normals: Vec::new(),
            colors: Vec::new(),
            tex_coords: Vec::new(),
            tri_desc: Vec::new(),
            tri_accel: Vec::new(),
        }
    }

    /// Sets the transform applied to the following vertices.
    pub fn transform(&mut self, matrix: WorldMatrix) -> Result<&mut Self, SceneError> {
        self.transform = Transform::new(matrix).ok_or(SceneError::SingularTransform)?;
        Ok(self)
    }

    pub fn material(&mut self, material: MaterialIdx) -> &mut Self {
        self.material = material;
        self
    }

    /// Object space normal of the following vertices.
    pub fn normal(&mut self, normal: WorldVector) -> &mut Self {
        self.normal = normal;
        self
    }

    pub fn color(&mut self, color: Color) -> &mut Self {
        self.color = color;
        self
    }

    pub fn tex_coord(&mut self, tex_coord: TexturePoint) -> &mut Self {
        self.tex_coord = tex_coord;
        self
    }

    /// Opens a new primitive, closing the previous one if it is still open.
    pub fn begin(&mut self, kind: PrimitiveKind) -> &mut Self {
        self.end();
        self.primitive = Some((kind, self.vertices.len() as u32));
        self
    }

    pub fn vertex(&mut self, position: WorldPoint) -> &mut Self {
        self.push_vertex(position);
        self
    }

    /// Closes the open primitive and turns its vertices into triangles.
    /// Vertices that don't complete a triangle are kept but not referenced.
    pub fn end(&mut self) -> &mut Self {
        let Some((kind, first)) = self.primitive.take() else {
            return self;
        };
        let last = self.vertices.len() as u32;

        match kind {
            PrimitiveKind::Triangles => {
                let mut i = first;
                while i + 3 <= last {
                    self.add_triangle([i, i + 1, i + 2]);
                    i += 3;
                }
            }
            PrimitiveKind::TriangleStrip => {
                let mut inverted = false;
                for i in first..last.saturating_sub(2).max(first) {
                    if inverted {
                        self.add_triangle([i + 2, i + 1, i]);
                    } else {
                        self.add_triangle([i, i + 1, i + 2]);
                    }
                    inverted = !inverted;
                }
            }
        }
        self
    }

    /// Adds a vertex with the current attributes, returns its index.
    /// The vertex is not part of any triangle until referenced.
    pub fn push_vertex(&mut self, position: WorldPoint) -> u32 {
        let index = self.vertices.len() as u32;
        self.vertices.push(self.transform.transform_point(&position));
        self.normals.push(self.transform.transform_normal(&self.normal));
        self.colors.push(self.color);
        self.tex_coords.push(self.tex_coord);
        index
    }

    /// Adds a triangle over previously pushed vertices.
    /// Returns false if the triangle is degenerate and was dropped.
    pub fn indexed_triangle(&mut self, a: u32, b: u32, c: u32) -> Result<bool, SceneError> {
        let count = self.vertices.len() as u32;
        if let Some(&index) = [a, b, c].iter().find(|&&i| i >= count) {
            return Err(SceneError::VertexOutOfRange { index, count });
        }
        Ok(self.add_triangle([a, b, c]))
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.tri_desc.len()
    }

    /// Builds the kd-tree over the assembled triangles.
    pub fn build(mut self, settings: &BuildSettings) -> Geometry {
        self.end();
        if self.dropped_triangles > 0 {
            tracing::warn!("Dropped {} degenerate triangles", self.dropped_triangles);
        }

        let indices: Vec<[u32; 3]> = self.tri_desc.iter().map(|t| t.vertices).collect();
        let raw = TriangleTreeBuilder::build(&self.vertices, &indices, settings);

        Geometry {
            vertices: self.vertices,
            normals: self.normals,
            colors: self.colors,
            tex_coords: self.tex_coords,
            tri_desc: self.tri_desc,
            tri_accel: self.tri_accel,
            kd_tree: KdTree::from_raw(raw),
        }
    }

    fn add_triangle(&mut self, vertices: [u32; 3]) -> bool {
        let [v0, v1, v2] = vertices.map(|i| &self.vertices[i as usize]);
        let accel = TriAccel::new(v0, v1, v2, self.tri_desc.len() as u32);
        if !accel.valid() {
            self.dropped_triangles += 1;
            return false;
        }
        self.tri_accel.push(accel);
        self.tri_desc.push(TriDesc {
            vertices,
            material: self.material,
        });
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::Ray;
    use crate::geometry::TriangleHit;

    use assert2::{assert, check, let_assert};
    use test_case::test_case;

    fn quad_strip() -> GeometryBuilder {
        let mut builder = GeometryBuilder::new();
        builder
            .begin(PrimitiveKind::TriangleStrip)
            .vertex(WorldPoint::new(0.0, 0.0, 0.0))
            .vertex(WorldPoint::new(1.0, 0.0, 0.0))
            .vertex(WorldPoint::new(0.0, 1.0, 0.0))
            .vertex(WorldPoint::new(1.0, 1.0, 0.0))
            .end();
        builder
    }

    fn face_normal(geometry: &Geometry, triangle: u32) -> WorldVector {
        let [a, b, c] = geometry.triangle_vertices(triangle);
        (b - a).cross(&(c - a))
    }

    #[test]
    fn defaults() {
        let mut builder = GeometryBuilder::new();
        builder.push_vertex(WorldPoint::new(1.0, 2.0, 3.0));
        let geometry = builder.build(&BuildSettings::default());
        assert!(geometry.vertices == [WorldPoint::new(1.0, 2.0, 3.0)]);
        assert!(geometry.normals == [WorldVector::z()]);
        assert!(geometry.colors == [Color::new(1.0, 1.0, 1.0)]);
        assert!(geometry.tex_coords == [TexturePoint::origin()]);
        assert!(geometry.triangle_count() == 0);
    }

    #[test]
    fn strip_winding_alternates() {
        let geometry = quad_strip().build(&BuildSettings::default());
        assert!(geometry.triangle_count() == 2);
        assert!(geometry.tri_desc[0].vertices == [0, 1, 2]);
        assert!(geometry.tri_desc[1].vertices == [3, 2, 1]);

        // Both triangles face +z
        check!(face_normal(&geometry, 0).z > 0.0);
        check!(face_normal(&geometry, 1).z > 0.0);
    }

    #[test_case(2, 0 ; "two_vertices")]
    #[test_case(3, 1 ; "one_triangle")]
    #[test_case(5, 1 ; "incomplete_tail")]
    #[test_case(9, 3 ; "three_triangles")]
    fn triangle_list(vertex_count: usize, expected: usize) {
        let mut builder = GeometryBuilder::new();
        builder.begin(PrimitiveKind::Triangles);
        for i in 0..vertex_count {
            let offset = (i / 3) as f32 * 2.0;
            let corner = match i % 3 {
                0 => WorldPoint::new(offset, 0.0, 0.0),
                1 => WorldPoint::new(offset + 1.0, 0.0, 0.0),
                _ => WorldPoint::new(offset, 1.0, 0.0),
            };
            builder.vertex(corner);
        }
        let geometry = builder.build(&BuildSettings::default());
        assert!(geometry.triangle_count() == expected);
        assert!(geometry.vertices.len() == vertex_count);
    }

    #[test]
    fn degenerate_triangles_are_dropped() {
        let mut builder = GeometryBuilder::new();
        let a = builder.push_vertex(WorldPoint::new(0.0, 0.0, 0.0));
        let b = builder.push_vertex(WorldPoint::new(1.0, 0.0, 0.0));
        let c = builder.push_vertex(WorldPoint::new(2.0, 0.0, 0.0));
        let d = builder.push_vertex(WorldPoint::new(0.0, 1.0, 0.0));

        assert!(let Ok(false) = builder.indexed_triangle(a, b, c));
        assert!(let Ok(true) = builder.indexed_triangle(a, b, d));

        let geometry = builder.build(&BuildSettings::default());
        assert!(geometry.triangle_count() == 1);
        // Triangle ids are dense after dropping
        assert!(geometry.tri_accel[0].triangle_id() == 0);
        assert!(geometry.tri_desc[0].vertices == [a, b, d]);
    }

    #[test]
    fn indexed_triangle_out_of_range() {
        let mut builder = GeometryBuilder::new();
        builder.push_vertex(WorldPoint::origin());
        builder.push_vertex(WorldPoint::new(1.0, 0.0, 0.0));

        let_assert!(Err(SceneError::VertexOutOfRange { index: 2, count: 2 }) = builder.indexed_triangle(0, 1, 2));
        let_assert!(Err(SceneError::VertexOutOfRange { index: 7, count: 2 }) = builder.indexed_triangle(7, 0, 1));
        assert!(builder.triangle_count() == 0);
    }

    #[test]
    fn transform_applies_to_positions_and_normals() {
        let matrix = WorldMatrix::new_translation(&WorldVector::new(0.0, 0.0, 5.0))
            * WorldMatrix::new_nonuniform_scaling(&WorldVector::new(2.0, 1.0, 1.0));
        let mut builder = GeometryBuilder::new();
        builder
            .transform(matrix)
            .unwrap()
            .normal(WorldVector::new(1.0, 1.0, 0.0))
            .push_vertex(WorldPoint::new(1.0, 1.0, 1.0));
        let geometry = builder.build(&BuildSettings::default());

        assert!(geometry.vertices[0] == WorldPoint::new(2.0, 1.0, 6.0));
        let normal = geometry.normals[0];
        check!((normal.norm() - 1.0).abs() < 1e-6);
        // Stretching along x tilts the normal towards y
        check!(normal.y > normal.x);
    }

    #[test]
    fn singular_transform_is_rejected() {
        let mut builder = GeometryBuilder::new();
        let result = builder.transform(WorldMatrix::zeros());
        assert!(matches!(result, Err(SceneError::SingularTransform)));
    }

    #[test]
    fn attributes_and_material_are_per_vertex() {
        let mut builder = GeometryBuilder::new();
        builder
            .material(MaterialIdx::from_raw(2))
            .begin(PrimitiveKind::Triangles)
            .color(Color::new(1.0, 0.0, 0.0))
            .vertex(WorldPoint::new(0.0, 0.0, 0.0))
            .color(Color::new(0.0, 1.0, 0.0))
            .tex_coord(TexturePoint::new(1.0, 0.0))
            .vertex(WorldPoint::new(1.0, 0.0, 0.0))
            .color(Color::new(0.0, 0.0, 1.0))
            .vertex(WorldPoint::new(0.0, 1.0, 0.0))
            .end();
        let geometry = builder.build(&BuildSettings::default());

        assert!(geometry.colors[0] == Color::new(1.0, 0.0, 0.0));
        assert!(geometry.colors[2] == Color::new(0.0, 0.0, 1.0));
        assert!(geometry.tex_coords[0] == TexturePoint::origin());
        assert!(geometry.tex_coords[1] == TexturePoint::new(1.0, 0.0));
        assert!(geometry.tri_desc[0].material == MaterialIdx::from_raw(2));
    }

    #[test]
    fn built_tree_finds_triangles() {
        let geometry = quad_strip().build(&BuildSettings::default());
        assert!(geometry.bounds().max == WorldPoint::new(1.0, 1.0, 0.0));

        let ray = Ray::new(WorldPoint::new(0.75, 0.75, 1.0), -WorldVector::z());
        let mut hit = TriangleHit::default();
        let tree = geometry.kd_tree();
        for i in 0..tree.node_count() {
            let node = tree.node(i);
            if node.is_leaf() {
                for t in tree.leaf_elements(node) {
                    geometry.tri_accel[*t as usize].intersect(&ray, &mut hit);
                }
            }
        }
        assert!(hit.triangle == 1);
        check!((hit.distance - 1.0).abs() < 1e-6);
    }
}
