use std::{fs, path::Path};

use indexmap::IndexMap;
use thiserror::Error;
use wavefront_obj::obj::{ObjSet, Primitive};

use super::{GeometryBuilder, SceneError};
use crate::geometry::{TexturePoint, WorldPoint, WorldVector};

#[derive(Error, Debug)]
pub enum ObjLoadError {
    #[error("Failed to read the file")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse the OBJ content")]
    ParseError(#[from] wavefront_obj::ParseError),
    #[error("Invalid OBJ geometry")]
    GeometryError(#[from] SceneError),
}

/// Reads a Wavefront OBJ file into a geometry builder.
pub fn load_obj(path: impl AsRef<Path>) -> Result<GeometryBuilder, ObjLoadError> {
    let content = fs::read_to_string(path)?;
    parse_obj(content)
}

/// Converts OBJ text into a geometry builder.
///
/// Vertices sharing position, texture and normal indices are merged. Vertices without
/// a normal get the face normal of the first triangle that uses them.
pub fn parse_obj(content: String) -> Result<GeometryBuilder, ObjLoadError> {
    let parsed = wavefront_obj::obj::parse(content)?;
    let mut builder = GeometryBuilder::new();
    add_obj(&parsed, &mut builder)?;
    Ok(builder)
}

fn add_obj(obj: &ObjSet, builder: &mut GeometryBuilder) -> Result<(), SceneError> {
    let mut skipped = 0usize;

    for (object_index, o) in obj.objects.iter().enumerate() {
        let mut vertices = IndexMap::new();
        let position = |i: usize| {
            let v = &o.vertices[i];
            WorldPoint::new(v.x as f32, v.y as f32, v.z as f32)
        };

        for geometry in &o.geometry {
            for shape in &geometry.shapes {
                let &Primitive::Triangle(a, b, c) = &shape.primitive else {
                    skipped += 1;
                    continue;
                };

                let face_normal = {
                    let [pa, pb, pc] = [a, b, c].map(|v| position(v.0));
                    (pb - pa).cross(&(pc - pa))
                };

                let mut handle_vertex = |vtn: (usize, Option<usize>, Option<usize>)| {
                    *vertices.entry(vtn).or_insert_with(|| {
                        let normal = vtn.2.map_or(face_normal, |i| {
                            let n = &o.normals[i];
                            WorldVector::new(n.x as f32, n.y as f32, n.z as f32)
                        });
                        let tex_coord = vtn.1.map_or_else(TexturePoint::origin, |i| {
                            let t = &o.tex_vertices[i];
                            TexturePoint::new(t.u as f32, t.v as f32)
                        });
                        builder.normal(normal).tex_coord(tex_coord);
                        builder.push_vertex(position(vtn.0))
                    })
                };

                let a = handle_vertex(a);
                let b = handle_vertex(b);
                let c = handle_vertex(c);
                builder.indexed_triangle(a, b, c)?;
            }
        }

        tracing::debug!(
            "OBJ object {} ({:?}): {} unique vertices",
            object_index,
            o.name,
            vertices.len()
        );
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} non-triangle OBJ primitives", skipped);
    }
    Ok(())
}
