use std::{mem, path::Path};

use common::TriMesh;

use super::{GeometryError, MeshProcessor};

/// Rough per-element working set of the simplifier, in bytes.
const BYTES_PER_VERT: u64 = 64;
const BYTES_PER_SOURCE_INDEX: u64 = 24;
const BYTES_PER_TARGET_INDEX: u64 = 4;

/// glTF geometry backend: `gltf` for I/O and meshoptimizer for quadric simplification.
pub struct MeshoptProcessor {
    max_memory_mb: u64,
    target_error: f32,
}

impl Default for MeshoptProcessor {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl MeshoptProcessor {
    pub fn new(max_memory_mb: u64) -> Self {
        Self {
            max_memory_mb,
            // Let the face budget, not the error bound, decide where simplification stops
            target_error: 1.0,
        }
    }

    pub fn estimated_memory(mesh: &TriMesh, target_faces: usize) -> u64 {
        mesh.vert_count() as u64 * BYTES_PER_VERT
            + mesh.indices.len() as u64 * BYTES_PER_SOURCE_INDEX
            + target_faces as u64 * 3 * BYTES_PER_TARGET_INDEX
    }
}

impl MeshProcessor for MeshoptProcessor {
    type Mesh = TriMesh;

    fn load(&self, path: &Path) -> Result<TriMesh, GeometryError> {
        if !path.exists() {
            return Err(GeometryError::NotFound(path.to_owned()));
        }
        log::info!("Loading model: {}", path.display());
        TriMesh::from_gltf(path).map_err(|e| GeometryError::Parse(path.to_owned(), e.to_string()))
    }

    fn simplify(&self, mesh: &TriMesh, target_faces: usize) -> Result<TriMesh, GeometryError> {
        let required = Self::estimated_memory(mesh, target_faces);
        let budget = self.max_memory_mb * 1024 * 1024;
        if required > budget {
            return Err(GeometryError::ResourceExhausted {
                target_faces,
                required_mb: required.div_ceil(1024 * 1024),
                budget_mb: self.max_memory_mb,
            });
        }

        if target_faces >= mesh.face_count() {
            return Ok(mesh.clone());
        }

        let verts_adapter = meshopt::VertexDataAdapter::new(
            bytemuck::cast_slice(&mesh.verts),
            mem::size_of::<[f32; 3]>(),
            0,
        )
        .map_err(|e| GeometryError::Decimation(format!("{e:?}")))?;

        let indices = meshopt::simplify(
            &mesh.indices,
            &verts_adapter,
            target_faces * 3,
            self.target_error,
            meshopt::SimplifyOptions::None,
            None,
        );

        if indices.is_empty() {
            return Err(GeometryError::Decimation(format!(
                "simplifier collapsed all {} faces",
                mesh.face_count()
            )));
        }
        if indices.len() > target_faces * 3 {
            log::debug!(
                "Simplifier stopped at {} faces, above the {target_faces} face target",
                indices.len() / 3
            );
        }

        let mut simplified = TriMesh::new(mesh.verts.clone(), indices);
        simplified.compact();
        Ok(simplified)
    }

    fn export(&self, mesh: &TriMesh, path: &Path) -> Result<(), GeometryError> {
        mesh.export_glb(path)
            .map_err(|e| GeometryError::Export(path.to_owned(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat grid of `n * n` quads, `2 * n * n` triangles.
    fn grid(n: u32) -> TriMesh {
        let mut verts = Vec::new();
        for y in 0..=n {
            for x in 0..=n {
                // Slight height variation so the simplifier has something to weigh
                let h = ((x * 7 + y * 13) % 5) as f32 * 0.01;
                verts.push([x as f32, h, y as f32]);
            }
        }
        let mut indices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                let i = y * (n + 1) + x;
                indices.extend_from_slice(&[i, i + n + 1, i + 1, i + 1, i + n + 1, i + n + 2]);
            }
        }
        TriMesh::new(verts, indices)
    }

    #[test]
    fn simplify_reduces_face_count() {
        let mesh = grid(20);
        assert_eq!(mesh.face_count(), 800);

        let out = MeshoptProcessor::default().simplify(&mesh, 200).unwrap();
        assert!(out.face_count() < mesh.face_count());
        assert!(out.vert_count() <= mesh.vert_count());
        assert!(out.indices.iter().all(|&i| (i as usize) < out.vert_count()));
    }

    #[test]
    fn budget_exhaustion_is_reported() {
        let mesh = grid(20);
        let err = MeshoptProcessor::new(0).simplify(&mesh, 200).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::ResourceExhausted {
                target_faces: 200,
                ..
            }
        ));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = MeshoptProcessor::default()
            .load(Path::new("missing/model.glb"))
            .unwrap_err();
        assert!(matches!(err, GeometryError::NotFound(_)));
    }

    #[test]
    fn export_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid_lod0.glb");
        let processor = MeshoptProcessor::default();

        processor.export(&grid(4), &path).unwrap();
        let loaded = processor.load(&path).unwrap();
        assert_eq!(loaded.face_count(), 32);
    }
}
