use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use common::{lod::sort_tiers, LodTier, LodTierSpec};
use indicatif::{ProgressBar, ProgressStyle};

pub mod meshopt_chain;

#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    #[error("Mesh file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Failed to parse mesh {0:?}: {1}")]
    Parse(PathBuf, String),
    #[error("Simplifying to {target_faces} faces needs ~{required_mb} MiB, budget is {budget_mb} MiB")]
    ResourceExhausted {
        target_faces: usize,
        required_mb: u64,
        budget_mb: u64,
    },
    #[error("Decimation failed: {0}")]
    Decimation(String),
    #[error("Failed to export {0:?}: {1}")]
    Export(PathBuf, String),
}

pub trait MeshStats {
    fn face_count(&self) -> usize;
    fn vert_count(&self) -> usize;
}

impl MeshStats for common::TriMesh {
    fn face_count(&self) -> usize {
        common::TriMesh::face_count(self)
    }

    fn vert_count(&self) -> usize {
        common::TriMesh::vert_count(self)
    }
}

/// Narrow view of the geometry library: everything the generator needs and nothing more.
pub trait MeshProcessor {
    type Mesh: MeshStats;

    fn load(&self, path: &Path) -> Result<Self::Mesh, GeometryError>;
    fn simplify(&self, mesh: &Self::Mesh, target_faces: usize)
        -> Result<Self::Mesh, GeometryError>;
    fn export(&self, mesh: &Self::Mesh, path: &Path) -> Result<(), GeometryError>;
}

/// A tier that did not make it to disk, and why.
#[derive(Debug)]
pub struct SkippedTier {
    pub name: String,
    pub ratio: f64,
    pub target_faces: usize,
    pub error: GeometryError,
}

#[derive(Debug)]
pub struct LodReport {
    pub source_faces: usize,
    pub source_verts: usize,
    /// Surviving tiers, highest fidelity first.
    pub tiers: Vec<LodTier>,
    pub skipped: Vec<SkippedTier>,
}

impl LodReport {
    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

/// `max(floor(faces * ratio), min_faces)`
pub fn target_face_count(source_faces: usize, ratio: f64, min_faces: usize) -> usize {
    ((source_faces as f64 * ratio).floor() as usize).max(min_faces)
}

pub fn tier_file_name(base_name: &str, tier: &str) -> String {
    format!("{base_name}_{tier}.glb")
}

pub struct LodGenerator<P> {
    processor: P,
    tiers: Vec<LodTierSpec>,
    min_faces: usize,
    show_progress: bool,
}

impl<P: MeshProcessor> LodGenerator<P> {
    pub fn new(processor: P, tiers: Vec<LodTierSpec>) -> Self {
        Self {
            processor,
            tiers,
            min_faces: 12,
            show_progress: true,
        }
    }

    pub fn with_min_faces(mut self, min_faces: usize) -> Self {
        self.min_faces = min_faces;
        self
    }

    pub fn hide_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn load(&self, path: &Path) -> Result<P::Mesh, GeometryError> {
        self.processor.load(path)
    }

    /// Write every configured tier of `mesh` into `output_dir`.
    ///
    /// A failing tier is recorded in [`LodReport::skipped`] and never stops the remaining tiers.
    pub fn generate(
        &self,
        mesh: &P::Mesh,
        base_name: &str,
        output_dir: &Path,
    ) -> Result<LodReport, std::io::Error> {
        fs::create_dir_all(output_dir)?;

        let source_faces = mesh.face_count();
        let source_verts = mesh.vert_count();
        log::info!(
            "Source geometry: {source_faces} faces, {source_verts} vertices, {} tiers requested",
            self.tiers.len()
        );

        let mut order: Vec<&LodTierSpec> = self.tiers.iter().collect();
        order.sort_by(|a, b| {
            b.ratio()
                .total_cmp(&a.ratio())
                .then_with(|| a.name().cmp(b.name()))
        });

        let bar = if self.show_progress {
            let bar = ProgressBar::new(order.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar().template("{bar:30} {pos}/{len} {msg}")
            {
                bar.set_style(style);
            }
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut report = LodReport {
            source_faces,
            source_verts,
            tiers: Vec::new(),
            skipped: Vec::new(),
        };

        for spec in order {
            bar.set_message(spec.name().to_owned());
            let path = output_dir.join(tier_file_name(base_name, spec.name()));

            match self.generate_tier(mesh, spec, &path) {
                Ok(tier) => {
                    log::info!(
                        "{} ({}): {} faces ({:.1}% of source), {:.2} MB in {:.2}s -> {}",
                        tier.name,
                        tier.viewing_context,
                        tier.face_count,
                        tier.face_count as f64 / source_faces.max(1) as f64 * 100.0,
                        tier.size_mb(),
                        tier.elapsed.as_secs_f64(),
                        tier.path.display()
                    );
                    report.tiers.push(tier);
                }
                Err(skipped) => {
                    log::warn!(
                        "Skipping {} (ratio {}, target {} faces) for {base_name}: {}",
                        skipped.name,
                        skipped.ratio,
                        skipped.target_faces,
                        skipped.error
                    );
                    report.skipped.push(skipped);
                }
            }
            bar.inc(1);
        }
        bar.finish_and_clear();

        sort_tiers(&mut report.tiers);

        if report.is_empty() {
            log::warn!("No LOD tiers survived for {base_name}");
        }

        Ok(report)
    }

    fn generate_tier(
        &self,
        mesh: &P::Mesh,
        spec: &LodTierSpec,
        path: &Path,
    ) -> Result<LodTier, SkippedTier> {
        let start = Instant::now();
        let source_faces = mesh.face_count();

        let skip = |target_faces, error| SkippedTier {
            name: spec.name().to_owned(),
            ratio: spec.ratio(),
            target_faces,
            error,
        };

        let (simplified, target_faces) = if spec.is_full_resolution() {
            (None, source_faces)
        } else {
            let target = target_face_count(source_faces, spec.ratio(), self.min_faces);
            match self.simplify_with_retry(mesh, spec.name(), target) {
                Ok(result) => result,
                Err(e) => return Err(skip(target, e)),
            }
        };

        // Full resolution tiers export the source untouched
        let out = simplified.as_ref().unwrap_or(mesh);

        self.processor
            .export(out, path)
            .map_err(|e| skip(target_faces, e))?;

        let byte_size = fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| skip(target_faces, GeometryError::Export(path.to_owned(), e.to_string())))?;

        Ok(LodTier::new(
            spec.name(),
            spec.ratio(),
            path.to_owned(),
            byte_size,
            (out.face_count(), out.vert_count()),
        )
        .with_target(target_faces)
        .with_elapsed(start.elapsed()))
    }

    /// Simplify, retrying exactly once at half the target if the simplifier runs out of memory.
    fn simplify_with_retry(
        &self,
        mesh: &P::Mesh,
        name: &str,
        target: usize,
    ) -> Result<(Option<P::Mesh>, usize), GeometryError> {
        log::debug!("Simplifying {name} to {target} faces");
        match self.processor.simplify(mesh, target) {
            Ok(m) => Ok((Some(m), target)),
            Err(GeometryError::ResourceExhausted { .. }) => {
                let halved = (target / 2).max(self.min_faces);
                log::warn!("Out of memory simplifying {name}, retrying with {halved} faces");
                self.processor
                    .simplify(mesh, halved)
                    .map(|m| (Some(m), halved))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_floored_and_clamped() {
        assert_eq!(target_face_count(1000, 0.5, 12), 500);
        assert_eq!(target_face_count(1000, 0.25, 12), 250);
        assert_eq!(target_face_count(999, 0.5, 12), 499);
        assert_eq!(target_face_count(100, 0.05, 12), 12);
        assert_eq!(target_face_count(0, 0.5, 12), 12);
    }

    #[test]
    fn tier_files_follow_naming() {
        assert_eq!(tier_file_name("sponza", "lod3"), "sponza_lod3.glb");
    }
}
