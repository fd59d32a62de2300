use std::{borrow::Cow, fs, io::Write, path::Path};

use glam::{Mat4, Vec3};
use gltf::mesh::{util::ReadIndices, Mode};

const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;
const COMPONENT_F32: u32 = 5126;
const COMPONENT_U32: u32 = 5125;

#[derive(thiserror::Error, Debug)]
pub enum TriMeshError {
    #[error("glTF error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("Primitive in mesh {0:?} has no positions")]
    MissingPositions(Option<String>),
    #[error("Primitive in mesh {mesh:?} has index {index} out of range for {verts} vertices")]
    IndexOutOfRange {
        mesh: Option<String>,
        index: u32,
        verts: u32,
    },
    #[error("Cannot export a mesh with no triangles")]
    Empty,
    #[error("Failed to serialize glTF json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Flattened triangle soup of every triangle primitive in a scene, with node transforms applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriMesh {
    pub verts: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
}

impl TriMesh {
    pub fn new(verts: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self { verts, indices }
    }

    pub fn from_gltf(path: impl AsRef<Path>) -> Result<Self, TriMeshError> {
        let (doc, buffers, _) = gltf::import(path)?;

        let mut tri_mesh = TriMesh::default();

        let mut visit = |mesh: gltf::Mesh, transform: Mat4| -> Result<(), TriMeshError> {
            for p in mesh.primitives() {
                if p.mode() != Mode::Triangles {
                    continue;
                }

                let reader = p.reader(|buffer| Some(&buffers[buffer.index()]));
                let positions = reader
                    .read_positions()
                    .ok_or_else(|| TriMeshError::MissingPositions(mesh.name().map(str::to_owned)))?;

                let base = tri_mesh.verts.len() as u32;
                tri_mesh.verts.extend(
                    positions.map(|p| transform.transform_point3(Vec3::from(p)).to_array()),
                );
                let added = tri_mesh.verts.len() as u32 - base;

                let local: Vec<u32> = match reader.read_indices() {
                    Some(ReadIndices::U8(iter)) => iter.map(u32::from).collect(),
                    Some(ReadIndices::U16(iter)) => iter.map(u32::from).collect(),
                    Some(ReadIndices::U32(iter)) => iter.collect(),
                    // Non indexed primitive, every three positions make a triangle
                    None => (0..added - added % 3).collect(),
                };

                if let Some(&index) = local.iter().find(|&&i| i >= added) {
                    return Err(TriMeshError::IndexOutOfRange {
                        mesh: mesh.name().map(str::to_owned),
                        index,
                        verts: added,
                    });
                }
                tri_mesh.indices.extend(local.iter().map(|i| base + i));
            }
            Ok(())
        };

        let mut stack = Vec::new();
        for scene in doc.scenes() {
            stack.extend(scene.nodes().map(|n| (n, Mat4::IDENTITY)));
        }

        if stack.is_empty() {
            // Files without a scene still carry meshes we can use
            for mesh in doc.meshes() {
                visit(mesh, Mat4::IDENTITY)?;
            }
        }

        while let Some((node, parent)) = stack.pop() {
            let transform = parent * Mat4::from_cols_array_2d(&node.transform().matrix());
            if let Some(mesh) = node.mesh() {
                visit(mesh, transform)?;
            }
            stack.extend(node.children().map(|c| (c, transform)));
        }

        Ok(tri_mesh)
    }

    pub fn face_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.len() < 3
    }

    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let mut iter = self.verts.iter().map(|&v| Vec3::from(v));
        let first = iter.next()?;
        Some(iter.fold((first, first), |(min, max), v| (min.min(v), max.max(v))))
    }

    /// Drop vertices no triangle references, keeping the first-use order.
    pub fn compact(&mut self) {
        let mut remap = vec![u32::MAX; self.verts.len()];
        let mut verts = Vec::with_capacity(self.verts.len());

        for i in self.indices.iter_mut() {
            let slot = &mut remap[*i as usize];
            if *slot == u32::MAX {
                *slot = verts.len() as u32;
                verts.push(self.verts[*i as usize]);
            }
            *i = *slot;
        }

        self.verts = verts;
    }

    /// Write the mesh as a single-primitive binary glTF.
    pub fn to_glb(&self) -> Result<Vec<u8>, TriMeshError> {
        if self.is_empty() {
            return Err(TriMeshError::Empty);
        }
        let (min, max) = self.bounds().ok_or(TriMeshError::Empty)?;

        let positions: &[u8] = bytemuck::cast_slice(&self.verts);
        let indices: &[u8] = bytemuck::cast_slice(&self.indices);

        let mut bin = Vec::with_capacity(positions.len() + indices.len() + 3);
        bin.extend_from_slice(positions);
        bin.extend_from_slice(indices);
        pad_to_four(&mut bin, 0);

        let root = serde_json::json!({
            "asset": { "version": "2.0", "generator": concat!("baker ", env!("CARGO_PKG_VERSION")) },
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": [{ "mesh": 0 }],
            "meshes": [{
                "primitives": [{
                    "attributes": { "POSITION": 0 },
                    "indices": 1,
                    "mode": 4,
                }]
            }],
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                {
                    "buffer": 0,
                    "byteOffset": 0,
                    "byteLength": positions.len(),
                    "target": ARRAY_BUFFER,
                },
                {
                    "buffer": 0,
                    "byteOffset": positions.len(),
                    "byteLength": indices.len(),
                    "target": ELEMENT_ARRAY_BUFFER,
                },
            ],
            "accessors": [
                {
                    "bufferView": 0,
                    "componentType": COMPONENT_F32,
                    "count": self.verts.len(),
                    "type": "VEC3",
                    "min": min.to_array(),
                    "max": max.to_array(),
                },
                {
                    "bufferView": 1,
                    "componentType": COMPONENT_U32,
                    "count": self.indices.len(),
                    "type": "SCALAR",
                },
            ],
        });

        let mut json = serde_json::to_vec(&root)?;
        pad_to_four(&mut json, b' ');

        // header + two chunk headers
        let length = 12 + 8 + json.len() + 8 + bin.len();

        let glb = gltf::binary::Glb {
            header: gltf::binary::Header {
                magic: *b"glTF",
                version: 2,
                length: length as u32,
            },
            json: Cow::Owned(json),
            bin: Some(Cow::Owned(bin)),
        };

        Ok(glb.to_vec()?)
    }

    pub fn export_glb(&self, path: impl AsRef<Path>) -> Result<(), TriMeshError> {
        let data = self.to_glb()?;
        let mut file = fs::File::create(path)?;
        file.write_all(&data)?;
        Ok(())
    }
}

fn pad_to_four(data: &mut Vec<u8>, fill: u8) {
    while data.len() % 4 != 0 {
        data.push(fill);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriMesh {
        TriMesh::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 1.0, 0.0],
                [0.0, 1.0, 0.0],
                [9.0, 9.0, 9.0],
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    #[test]
    fn compact_drops_unreferenced_verts() {
        let mut mesh = quad();
        mesh.compact();

        assert_eq!(mesh.vert_count(), 4);
        assert_eq!(mesh.face_count(), 2);
        assert_eq!(mesh.bounds().unwrap().1, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn glb_export_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.glb");

        let mut mesh = quad();
        mesh.compact();
        mesh.export_glb(&path).unwrap();

        let loaded = TriMesh::from_gltf(&path).unwrap();
        assert_eq!(loaded, mesh);
    }

    #[test]
    fn indices_past_the_vertex_count_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.glb");

        let mesh = TriMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            vec![0, 1, 99],
        );
        mesh.export_glb(&path).unwrap();

        assert!(matches!(
            TriMesh::from_gltf(&path),
            Err(TriMeshError::IndexOutOfRange {
                index: 99,
                verts: 3,
                ..
            })
        ));
    }

    #[test]
    fn empty_mesh_refuses_export() {
        assert!(matches!(TriMesh::default().to_glb(), Err(TriMeshError::Empty)));
    }
}
