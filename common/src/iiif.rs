//! Presentation 3.0 document model, with the 3D model and navPlace extensions.
//!
//! Optional members are skipped when absent so serialized documents only carry what was built.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PRESENTATION_CONTEXT: &str = "http://iiif.io/api/presentation/3/context.json";
pub const NAVPLACE_CONTEXT: &str = "http://iiif.io/api/extension/navplace/context.json";
pub const MODEL_3D_CONTEXT: &str = "http://iiif.io/api/3d/0/context.json";
pub const MODEL_SERVICE_LEVEL0: &str = "http://iiif.io/api/3d/0/level0.json";
pub const MODEL_SERVICE_LEVEL1: &str = "http://iiif.io/api/3d/0/level1.json";
pub const GLTF_PROFILE: &str = "https://www.khronos.org/gltf/";
pub const GLTF_BINARY_FORMAT: &str = "model/gltf-binary";
pub const DEFAULT_RIGHTS: &str = "http://creativecommons.org/licenses/by/4.0/";
pub const DEFAULT_ATTRIBUTION: &str = "Provided via IIIF 3D Extension";

/// `{"en": ["..."]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageMap {
    pub en: Vec<String>,
}

impl LanguageMap {
    pub fn en(text: impl Into<String>) -> Self {
        Self {
            en: vec![text.into()],
        }
    }

    pub fn first(&self) -> Option<&str> {
        self.en.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub label: LanguageMap,
    pub value: LanguageMap,
}

impl MetadataEntry {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: LanguageMap::en(label),
            value: LanguageMap::en(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredStatement {
    pub label: LanguageMap,
    pub value: LanguageMap,
}

/// The extra term definitions a 3D manifest declares next to the presentation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTerms {
    pub gltf: String,
    pub lod: String,
    pub quality: String,
}

impl Default for ModelTerms {
    fn default() -> Self {
        Self {
            gltf: GLTF_PROFILE.to_owned(),
            lod: "http://www.w3.org/ns/lod#".to_owned(),
            quality: "http://iiif.io/api/presentation/3#quality".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextEntry {
    Uri(String),
    Terms(ModelTerms),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(rename = "@context")]
    pub context: Vec<ContextEntry>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    pub metadata: Vec<MetadataEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<LanguageMap>,
    pub rights: String,
    pub required_statement: RequiredStatement,
    pub items: Vec<Canvas>,
    pub thumbnail: Vec<ModelThumbnail>,
    pub rendering: Vec<Rendering>,
    pub viewing_direction: String,
    pub behavior: Vec<String>,
    pub service: Vec<Model3DService>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    pub height: u32,
    pub width: u32,
    pub items: Vec<AnnotationPage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Vec<ImageResource>>,
    #[serde(rename = "navPlace", skip_serializing_if = "Option::is_none")]
    pub nav_place: Option<FeatureCollection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<ViewingHintService>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPage {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub motivation: String,
    pub target: String,
    pub body: Choice,
}

/// Mutually exclusive alternatives for the same target. Index 0 is the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(rename = "type")]
    pub kind: String,
    pub items: Vec<ModelResource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub label: LanguageMap,
    pub profile: String,
    pub service: Vec<ModelService>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelService {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub profile: String,
    pub quality: String,
    pub file_size: u64,
    pub lod_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendering {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelThumbnail {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub service: Vec<LinkedService>,
}

/// Service reference in the older `@id`/`@type` form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedService {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model3DService {
    #[serde(rename = "@context")]
    pub context: String,
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub kind: String,
    pub profile: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub format: String,
    pub width: u32,
    pub height: u32,
}

/// Camera placement a viewer should start from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewingHintService {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub camera: CameraPlacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraPlacement {
    pub position: Vec3,
    pub look_at: Vec3,
    pub field_of_view: f32,
    pub up: Vec3,
}

impl Default for CameraPlacement {
    fn default() -> Self {
        Self {
            position: Vec3::new(5.0, 3.0, 5.0),
            look_at: Vec3::ZERO,
            field_of_view: 45.0,
            up: Vec3::Y,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    /// Kept loosely typed, merged features carry whatever properties their manifest gave them.
    pub features: Vec<Value>,
}

impl FeatureCollection {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "FeatureCollection".to_owned(),
            features: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: serde_json::Map<String, Value>,
    pub geometry: PointGeometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`
    pub coordinates: [f64; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl Feature {
    pub fn point(id: impl Into<String>, at: GeoPoint) -> Self {
        Self {
            id: id.into(),
            kind: "Feature".to_owned(),
            properties: Default::default(),
            geometry: PointGeometry {
                kind: "Point".to_owned(),
                coordinates: [at.lon, at.lat],
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: LanguageMap,
    pub metadata: Vec<MetadataEntry>,
    pub summary: LanguageMap,
    pub items: Vec<ManifestReference>,
    #[serde(rename = "navPlace", skip_serializing_if = "Option::is_none")]
    pub nav_place: Option<FeatureCollection>,
}

/// Collection entry pointing at one manifest. Copied members keep the manifest's own shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestReference {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub label: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<Value>>,
}
