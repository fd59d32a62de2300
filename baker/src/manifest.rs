use std::{
    fs,
    path::{Path, PathBuf},
};

use common::{
    iiif::{
        Annotation, AnnotationPage, CameraPlacement, Canvas, Choice, ContextEntry, Feature,
        FeatureCollection, GeoPoint, ImageResource, LanguageMap, LinkedService, Manifest,
        MetadataEntry, Model3DService, ModelResource, ModelService, ModelTerms, ModelThumbnail,
        Rendering, RequiredStatement, ViewingHintService, DEFAULT_ATTRIBUTION, DEFAULT_RIGHTS,
        GLTF_BINARY_FORMAT, GLTF_PROFILE, MODEL_3D_CONTEXT, MODEL_SERVICE_LEVEL0,
        MODEL_SERVICE_LEVEL1, PRESENTATION_CONTEXT,
    },
    lod::{bytes_to_mb, compare_tier_names},
    BakerConfig, LodTier, LodTierSpec,
};
use glam::Vec3;

use crate::lod::{MeshProcessor, MeshStats};

/// Metadata keys that feed dedicated manifest fields instead of `metadata[]`.
pub const RESERVED_KEYS: [&str; 4] = ["label", "description", "rights", "attribution"];

/// Tiers tried, in order, for the manifest thumbnail before falling back to the coarsest tier.
pub const THUMBNAIL_PREFERENCE: [&str; 2] = ["lod4", "lod3"];

pub const FORMAT_DESCRIPTION: &str = "glTF 2.0 Binary (.glb)";

const CANVAS_SIZE: u32 = 1000;

#[derive(thiserror::Error, Debug)]
pub enum ManifestBuildError {
    #[error("No LOD tiers survived for {0}, refusing to build a manifest")]
    NoTiers(String),
    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write manifest {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Initial view requested for the canvas. Unset members fall back to [`CameraPlacement::default`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CameraHints {
    pub position: Option<Vec3>,
    pub look_at: Option<Vec3>,
    pub field_of_view: Option<f32>,
    pub up: Option<Vec3>,
}

impl CameraHints {
    /// An up vector alone does not describe a view.
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.look_at.is_none() && self.field_of_view.is_none()
    }

    pub fn placement(&self) -> CameraPlacement {
        let default = CameraPlacement::default();
        CameraPlacement {
            position: self.position.unwrap_or(default.position),
            look_at: self.look_at.unwrap_or(default.look_at),
            field_of_view: self.field_of_view.unwrap_or(default.field_of_view),
            up: self.up.unwrap_or(default.up),
        }
    }
}

/// A rendered preview image, already stored under the thumbnails directory.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailImage {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// Everything known about one asset at manifest time.
#[derive(Debug, Clone, Default)]
pub struct ManifestRequest<'a> {
    pub name: &'a str,
    pub tiers: &'a [LodTier],
    /// Ordered key/value pairs; see [`RESERVED_KEYS`].
    pub metadata: &'a [(String, String)],
    pub geo: Option<GeoPoint>,
    pub camera: CameraHints,
    pub thumbnail_image: Option<ThumbnailImage>,
}

impl ManifestRequest<'_> {
    fn reserved(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

pub struct ManifestBuilder<'a> {
    config: &'a BakerConfig,
    generated: String,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(config: &'a BakerConfig) -> Self {
        Self {
            config,
            generated: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
        }
    }

    /// Pin the `Generated` timestamp, for reproducible output.
    pub fn with_timestamp(mut self, generated: impl Into<String>) -> Self {
        self.generated = generated.into();
        self
    }

    pub fn build(&self, request: &ManifestRequest) -> Result<Manifest, ManifestBuildError> {
        if request.tiers.is_empty() {
            return Err(ManifestBuildError::NoTiers(request.name.to_owned()));
        }

        let base_url = self.config.manifest_base_url(request.name);
        let label = request.reserved("label").unwrap_or(request.name).to_owned();

        let mut tiers: Vec<&LodTier> = request.tiers.iter().collect();
        tiers.sort_by(|a, b| compare_tier_names(&a.name, &b.name));

        let canvas_id = format!("{base_url}/canvas/1");
        let page_id = format!("{canvas_id}/page");

        let choice_items = tiers.iter().map(|t| self.model_resource(t)).collect();

        let annotation = Annotation {
            id: format!("{canvas_id}/annotation/1"),
            kind: "Annotation".to_owned(),
            motivation: "painting".to_owned(),
            target: canvas_id.clone(),
            body: Choice {
                kind: "Choice".to_owned(),
                items: choice_items,
            },
        };

        let nav_place = request.geo.map(|at| {
            let mut feature = Feature::point(format!("{base_url}/feature/1"), at);
            feature
                .properties
                .insert("label".to_owned(), serde_json::json!({ "en": [label.as_str()] }));

            let mut features = FeatureCollection::new(format!("{base_url}/feature-collection/1"));
            features.features.push(serde_json::to_value(feature)?);
            Ok::<_, serde_json::Error>(features)
        });

        let service = (!request.camera.is_empty()).then(|| {
            vec![ViewingHintService {
                context: MODEL_3D_CONTEXT.to_owned(),
                id: format!("{canvas_id}/viewing-hints"),
                kind: "ViewingHints".to_owned(),
                camera: request.camera.placement(),
            }]
        });

        let canvas = Canvas {
            id: canvas_id,
            kind: "Canvas".to_owned(),
            label: LanguageMap::en("3D Model View"),
            height: CANVAS_SIZE,
            width: CANVAS_SIZE,
            items: vec![AnnotationPage {
                id: page_id,
                kind: "AnnotationPage".to_owned(),
                items: vec![annotation],
            }],
            thumbnail: request.thumbnail_image.as_ref().map(|t| {
                vec![ImageResource {
                    id: t.url.clone(),
                    kind: "Image".to_owned(),
                    format: "image/png".to_owned(),
                    width: t.width,
                    height: t.height,
                }]
            }),
            nav_place: nav_place.transpose()?,
            service,
        };

        let rendering = tiers
            .iter()
            .map(|t| Rendering {
                id: self.config.model_url(&t.file_name()),
                kind: "Model".to_owned(),
                label: LanguageMap::en(format!(
                    "Download {} ({:.1} MB)",
                    t.name.to_uppercase(),
                    t.size_mb()
                )),
                format: GLTF_BINARY_FORMAT.to_owned(),
            })
            .collect();

        let thumbnail = thumbnail_tier(&tiers)
            .map(|t| {
                let id = self.config.model_url(&t.file_name());
                vec![ModelThumbnail {
                    id: id.clone(),
                    kind: "Model".to_owned(),
                    format: GLTF_BINARY_FORMAT.to_owned(),
                    service: vec![LinkedService {
                        id,
                        kind: "ModelService".to_owned(),
                        profile: MODEL_SERVICE_LEVEL0.to_owned(),
                    }],
                }]
            })
            .unwrap_or_default();

        Ok(Manifest {
            context: vec![
                ContextEntry::Uri(PRESENTATION_CONTEXT.to_owned()),
                ContextEntry::Terms(ModelTerms::default()),
            ],
            id: format!("{base_url}/manifest.json"),
            kind: "Manifest".to_owned(),
            label: LanguageMap::en(label),
            metadata: self.metadata(request, &tiers),
            summary: request
                .reserved("description")
                .filter(|d| !d.is_empty())
                .map(LanguageMap::en),
            rights: request
                .reserved("rights")
                .unwrap_or(DEFAULT_RIGHTS)
                .to_owned(),
            required_statement: RequiredStatement {
                label: LanguageMap::en("Attribution"),
                value: LanguageMap::en(request.reserved("attribution").unwrap_or(DEFAULT_ATTRIBUTION)),
            },
            items: vec![canvas],
            thumbnail,
            rendering,
            viewing_direction: "none".to_owned(),
            behavior: vec!["continuous".to_owned(), "individuals".to_owned()],
            service: vec![Model3DService {
                context: MODEL_3D_CONTEXT.to_owned(),
                id: base_url,
                kind: "Model3DService".to_owned(),
                profile: MODEL_SERVICE_LEVEL1.to_owned(),
            }],
        })
    }

    fn model_resource(&self, tier: &LodTier) -> ModelResource {
        let id = self.config.model_url(&tier.file_name());
        ModelResource {
            id: id.clone(),
            kind: "Model".to_owned(),
            format: GLTF_BINARY_FORMAT.to_owned(),
            label: LanguageMap::en(tier.label()),
            profile: GLTF_PROFILE.to_owned(),
            service: vec![ModelService {
                id,
                kind: "ModelService".to_owned(),
                profile: MODEL_SERVICE_LEVEL1.to_owned(),
                quality: tier.quality.to_owned(),
                file_size: tier.byte_size,
                lod_level: tier.name.clone(),
            }],
        }
    }

    fn metadata(&self, request: &ManifestRequest, tiers: &[&LodTier]) -> Vec<MetadataEntry> {
        let total_bytes: u64 = tiers.iter().map(|t| t.byte_size).sum();

        request
            .metadata
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| MetadataEntry::new(k, v))
            .chain([
                MetadataEntry::new("Generated", &self.generated),
                MetadataEntry::new("3D Format", FORMAT_DESCRIPTION),
                MetadataEntry::new("LOD Levels", tiers.len().to_string()),
                MetadataEntry::new("Total Size", format!("{:.1} MB", bytes_to_mb(total_bytes))),
            ])
            .collect()
    }
}

/// Coarsest tier for the manifest thumbnail: a named preference first, then the last sorted tier.
pub fn thumbnail_tier<'t>(sorted: &[&'t LodTier]) -> Option<&'t LodTier> {
    THUMBNAIL_PREFERENCE
        .iter()
        .find_map(|name| sorted.iter().find(|t| t.name == *name))
        .or_else(|| sorted.last())
        .copied()
}

pub fn manifest_file_name(name: &str) -> String {
    format!("{name}_manifest.json")
}

pub fn write_manifest(manifest: &Manifest, path: &Path) -> Result<(), ManifestBuildError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ManifestBuildError::Io(parent.to_owned(), e))?;
    }
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json).map_err(|e| ManifestBuildError::Io(path.to_owned(), e))
}

/// Rebuild the tier list of an already baked asset from `{name}_lod<N>.glb` files on disk.
///
/// Ratios come from `specs` by tier name. Tiers that are not configured get their face count
/// over the largest face count found.
/// Files that fail to load are logged and left out.
pub fn discover_tiers<P: MeshProcessor>(
    processor: &P,
    models_dir: &Path,
    name: &str,
    specs: &[LodTierSpec],
) -> Result<Vec<LodTier>, glob::PatternError> {
    let pattern = format!(
        "{}/{}_lod*.glb",
        glob::Pattern::escape(&models_dir.to_string_lossy()),
        glob::Pattern::escape(name)
    );
    let prefix = format!("{name}_");
    let mut found = Vec::new();

    for entry in glob::glob(&pattern)? {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                log::warn!("Unreadable entry while scanning {}: {e}", models_dir.display());
                continue;
            }
        };

        let Some(tier_name) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(&prefix))
            .filter(|t| {
                t.strip_prefix("lod")
                    .is_some_and(|d| !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()))
            })
            .map(str::to_owned)
        else {
            continue;
        };

        let byte_size = match fs::metadata(&path) {
            Ok(m) => m.len(),
            Err(e) => {
                log::warn!("Skipping {}: {e}", path.display());
                continue;
            }
        };

        let configured = specs
            .iter()
            .find(|s| s.name() == tier_name)
            .map(LodTierSpec::ratio);

        match processor.load(&path) {
            Ok(mesh) => {
                let counts = (mesh.face_count(), mesh.vert_count());
                let ratio = configured.unwrap_or(1.0);
                let tier = LodTier::new(tier_name, ratio, path, byte_size, counts);
                found.push((tier, configured.is_some()));
            }
            Err(e) => log::warn!("Skipping {}: {e}", path.display()),
        }
    }

    let max_faces = found.iter().map(|(t, _)| t.face_count).max().unwrap_or(0);
    let mut tiers: Vec<LodTier> = found
        .into_iter()
        .map(|(mut tier, configured)| {
            if !configured {
                tier.ratio = measured_ratio(tier.face_count, max_faces);
            }
            tier
        })
        .collect();

    tiers.sort_by(|a, b| compare_tier_names(&a.name, &b.name));
    Ok(tiers)
}

/// `faces / max_faces`, kept inside (0, 1].
fn measured_ratio(faces: usize, max_faces: usize) -> f64 {
    if max_faces == 0 {
        return 1.0;
    }
    (faces as f64 / max_faces as f64).clamp(f64::MIN_POSITIVE, 1.0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use common::TriMesh;

    use super::*;
    use crate::lod::meshopt_chain::MeshoptProcessor;

    fn tier(name: &str, bytes: u64) -> LodTier {
        LodTier::new(
            name,
            1.0,
            PathBuf::from(format!("out/vase_{name}.glb")),
            bytes,
            (100, 60),
        )
    }

    #[test]
    fn thumbnail_prefers_lod4_then_lod3() {
        let tiers = [tier("lod0", 1), tier("lod3", 1), tier("lod4", 1)];
        let sorted: Vec<_> = tiers.iter().collect();
        assert_eq!(thumbnail_tier(&sorted).unwrap().name, "lod4");

        let sorted: Vec<_> = tiers[..2].iter().collect();
        assert_eq!(thumbnail_tier(&sorted).unwrap().name, "lod3");
    }

    #[test]
    fn thumbnail_falls_back_to_coarsest_tier() {
        let tiers = [tier("lod0", 1), tier("lod1", 1), tier("lod2", 1)];
        let sorted: Vec<_> = tiers.iter().collect();
        assert_eq!(thumbnail_tier(&sorted).unwrap().name, "lod2");
        assert!(thumbnail_tier(&[]).is_none());
    }

    #[test]
    fn camera_hints_need_a_view_member() {
        let up_only = CameraHints {
            up: Some(Vec3::Z),
            ..Default::default()
        };
        assert!(up_only.is_empty());

        let fov = CameraHints {
            field_of_view: Some(30.0),
            ..Default::default()
        };
        assert!(!fov.is_empty());
        let placement = fov.placement();
        assert_eq!(placement.field_of_view, 30.0);
        assert_eq!(placement.position, Vec3::new(5.0, 3.0, 5.0));
        assert_eq!(placement.up, Vec3::Y);
    }

    #[test]
    fn reserved_keys_stay_out_of_metadata() {
        let config = BakerConfig::default();
        let tiers = [tier("lod0", 3 * 1024 * 1024), tier("lod1", 1024 * 1024 / 2)];
        let metadata = vec![
            ("label".to_owned(), "Vase".to_owned()),
            ("Creator".to_owned(), "Jane".to_owned()),
            ("description".to_owned(), "A vase".to_owned()),
        ];
        let manifest = ManifestBuilder::new(&config)
            .with_timestamp("2025-01-01T00:00:00")
            .build(&ManifestRequest {
                name: "vase",
                tiers: &tiers,
                metadata: &metadata,
                ..Default::default()
            })
            .unwrap();

        let labels: Vec<_> = manifest
            .metadata
            .iter()
            .map(|m| m.label.first().unwrap())
            .collect();
        assert_eq!(
            labels,
            ["Creator", "Generated", "3D Format", "LOD Levels", "Total Size"]
        );
        assert_eq!(manifest.metadata[3].value.first(), Some("2"));
        assert_eq!(manifest.metadata[4].value.first(), Some("3.5 MB"));
        assert_eq!(manifest.label.first(), Some("Vase"));
        assert_eq!(manifest.summary, Some(LanguageMap::en("A vase")));
    }

    fn grid(n: u32) -> TriMesh {
        let verts = (0..=n)
            .flat_map(|y| (0..=n).map(move |x| [x as f32, 0.0, y as f32]))
            .collect();
        let indices = (0..n)
            .flat_map(|y| (0..n).map(move |x| y * (n + 1) + x))
            .flat_map(|i| [i, i + n + 1, i + 1, i + 1, i + n + 1, i + n + 2])
            .collect();
        TriMesh::new(verts, indices)
    }

    #[test]
    fn unconfigured_tiers_get_their_measured_ratio() {
        let dir = tempfile::tempdir().unwrap();
        grid(4).export_glb(dir.path().join("vase_lod0.glb")).unwrap();
        grid(2).export_glb(dir.path().join("vase_lod1.glb")).unwrap();
        grid(1).export_glb(dir.path().join("vase_lod7.glb")).unwrap();

        let specs = [
            LodTierSpec::new("lod0", 1.0).unwrap(),
            LodTierSpec::new("lod1", 0.5).unwrap(),
        ];
        let processor = MeshoptProcessor::default();
        let tiers = discover_tiers(&processor, dir.path(), "vase", &specs).unwrap();

        let ratios: Vec<_> = tiers.iter().map(|t| (t.name.as_str(), t.ratio)).collect();
        assert_eq!(ratios, [("lod0", 1.0), ("lod1", 0.5), ("lod7", 2.0 / 32.0)]);
        assert!(tiers.iter().all(|t| t.ratio > 0.0 && t.ratio <= 1.0));
    }

    #[test]
    fn measured_ratio_stays_in_the_unit_interval() {
        assert_eq!(measured_ratio(0, 0), 1.0);
        assert_eq!(measured_ratio(5, 10), 0.5);
        assert!(measured_ratio(0, 10) > 0.0);
    }

    #[test]
    fn zero_tiers_is_refused() {
        let config = BakerConfig::default();
        let err = ManifestBuilder::new(&config)
            .build(&ManifestRequest {
                name: "empty",
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ManifestBuildError::NoTiers(name) if name == "empty"));
    }
}
