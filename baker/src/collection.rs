use std::{
    fs,
    path::{Path, PathBuf},
};

use common::{
    iiif::{
        Collection, FeatureCollection, LanguageMap, ManifestReference, MetadataEntry,
        NAVPLACE_CONTEXT, PRESENTATION_CONTEXT,
    },
    BakerConfig,
};
use serde_json::{json, Map, Value};

/// Manifest metadata labels copied into a collection entry's preview.
pub const PREVIEW_METADATA_KEYS: [&str; 4] = ["Created", "Scanner", "Total Size", "LOD Levels"];

pub const DEFAULT_SUMMARY: &str = "Collection of 3D models with IIIF manifests";

#[derive(thiserror::Error, Debug)]
pub enum CollectionError {
    #[error("No manifests matching {1:?} in {0:?}")]
    NoManifests(PathBuf, String),
    #[error("Invalid manifest pattern: {0}")]
    Glob(#[from] glob::PatternError),
    #[error("Failed to serialize collection: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to write collection {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Why a single manifest was left out of a collection.
#[derive(thiserror::Error, Debug)]
enum ManifestReadError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("top level JSON value is not an object")]
    NotAnObject,
}

/// Aggregates the manifests of a directory into one collection document.
pub struct CollectionBuilder<'a> {
    config: &'a BakerConfig,
    generated: String,
}

impl<'a> CollectionBuilder<'a> {
    pub fn new(config: &'a BakerConfig) -> Self {
        Self {
            config,
            generated: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
        }
    }

    pub fn with_timestamp(mut self, generated: impl Into<String>) -> Self {
        self.generated = generated.into();
        self
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Manifest files under `manifests_dir`, sorted by file name, excluding the collection output.
    pub fn manifest_files(&self, manifests_dir: &Path) -> Result<Vec<PathBuf>, CollectionError> {
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&manifests_dir.to_string_lossy()),
            self.config.collection.manifest_glob
        );

        let mut files: Vec<PathBuf> = glob::glob(&pattern)?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("Unreadable entry in {}: {e}", manifests_dir.display());
                    None
                }
            })
            .filter(|path| {
                path.file_name()
                    .is_some_and(|f| f != self.config.collection.file_name.as_str())
            })
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    pub fn build(&self, manifests_dir: &Path) -> Result<Collection, CollectionError> {
        let files = self.manifest_files(manifests_dir)?;
        if files.is_empty() {
            return Err(CollectionError::NoManifests(
                manifests_dir.to_owned(),
                self.config.collection.manifest_glob.clone(),
            ));
        }

        let base_url = self.base_url();
        let mut nav_place = FeatureCollection::new(format!("{base_url}/collection/feature-collection"));
        let mut items = Vec::with_capacity(files.len());

        for path in &files {
            let manifest = match read_manifest(path) {
                Ok(manifest) => manifest,
                Err(e) => {
                    log::warn!("Skipping {}: {e}", path.display());
                    continue;
                }
            };

            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            let reference = manifest_reference(&manifest, &format!("{base_url}/{file_name}"));

            nav_place
                .features
                .extend(geo_features(&manifest, &reference.id));
            items.push(reference);
        }

        log::info!(
            "Collected {} of {} manifests, {} geo features",
            items.len(),
            files.len(),
            nav_place.features.len()
        );

        let collection_config = &self.config.collection;
        let metadata = [
            MetadataEntry::new("Generated", &self.generated),
            MetadataEntry::new("Total Items", items.len().to_string()),
        ]
        .into_iter()
        .chain(
            collection_config
                .metadata
                .iter()
                .map(|(k, v)| MetadataEntry::new(k, v)),
        )
        .collect();

        Ok(Collection {
            context: vec![PRESENTATION_CONTEXT.to_owned(), NAVPLACE_CONTEXT.to_owned()],
            id: format!("{base_url}/{}", collection_config.file_name),
            kind: "Collection".to_owned(),
            label: LanguageMap::en(&collection_config.label),
            metadata,
            summary: LanguageMap::en(
                collection_config
                    .description
                    .as_deref()
                    .unwrap_or(DEFAULT_SUMMARY),
            ),
            items,
            nav_place: (!nav_place.features.is_empty()).then_some(nav_place),
        })
    }

    /// Build from `manifests_dir` and write the collection next to the manifests.
    pub fn build_and_write(&self, manifests_dir: &Path) -> Result<PathBuf, CollectionError> {
        let collection = self.build(manifests_dir)?;
        let path = manifests_dir.join(&self.config.collection.file_name);
        write_collection(&collection, &path)?;
        Ok(path)
    }
}

pub fn write_collection(collection: &Collection, path: &Path) -> Result<(), CollectionError> {
    let json = serde_json::to_string_pretty(collection)?;
    fs::write(path, json).map_err(|e| CollectionError::Io(path.to_owned(), e))
}

fn read_manifest(path: &Path) -> Result<Value, ManifestReadError> {
    let text = fs::read_to_string(path)?;
    let manifest: Value = serde_json::from_str(&text)?;
    if !manifest.is_object() {
        return Err(ManifestReadError::NotAnObject);
    }
    Ok(manifest)
}

fn manifest_reference(manifest: &Value, fallback_id: &str) -> ManifestReference {
    let id = manifest
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(fallback_id)
        .to_owned();

    let thumbnail = manifest
        .get("thumbnail")
        .filter(|t| t.as_array().map_or(!t.is_null(), |a| !a.is_empty()))
        .cloned();

    let metadata = manifest
        .get("metadata")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| {
                    entry
                        .pointer("/label/en/0")
                        .and_then(Value::as_str)
                        .is_some_and(|label| PREVIEW_METADATA_KEYS.contains(&label))
                })
                .cloned()
                .collect::<Vec<_>>()
        })
        .filter(|preview| !preview.is_empty());

    ManifestReference {
        id,
        kind: "Manifest".to_owned(),
        label: manifest
            .get("label")
            .cloned()
            .unwrap_or_else(|| json!({ "en": ["Untitled"] })),
        thumbnail,
        summary: manifest.get("summary").filter(|s| !s.is_null()).cloned(),
        metadata,
    }
}

/// Features of the first canvas, each pointing back at `manifest_id`.
fn geo_features(manifest: &Value, manifest_id: &str) -> Vec<Value> {
    let Some(nav_place) = manifest
        .pointer("/items/0/navPlace")
        .filter(|n| n.get("type").and_then(Value::as_str) == Some("FeatureCollection"))
    else {
        return Vec::new();
    };

    nav_place
        .get("features")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|feature| {
            let mut feature = feature.as_object()?.clone();
            let properties = feature
                .entry("properties")
                .or_insert_with(|| Value::Object(Map::new()));
            if !properties.is_object() {
                *properties = Value::Object(Map::new());
            }
            properties
                .as_object_mut()?
                .insert("manifest".to_owned(), Value::String(manifest_id.to_owned()));
            Some(Value::Object(feature))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_only_listed_labels() {
        let manifest = json!({
            "id": "http://host/m/vase/manifest.json",
            "label": { "en": ["Vase"] },
            "thumbnail": [],
            "metadata": [
                { "label": { "en": ["Creator"] }, "value": { "en": ["Jane"] } },
                { "label": { "en": ["LOD Levels"] }, "value": { "en": ["5"] } },
                { "label": { "en": ["Scanner"] }, "value": { "en": ["X"] } },
            ],
        });

        let reference = manifest_reference(&manifest, "unused");
        assert_eq!(reference.id, "http://host/m/vase/manifest.json");
        assert!(reference.thumbnail.is_none());
        assert!(reference.summary.is_none());

        let preview = reference.metadata.unwrap();
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[0]["label"]["en"][0], "LOD Levels");
    }

    #[test]
    fn missing_members_fall_back() {
        let reference = manifest_reference(&json!({}), "http://host/m/a_manifest.json");
        assert_eq!(reference.id, "http://host/m/a_manifest.json");
        assert_eq!(reference.label, json!({ "en": ["Untitled"] }));
        assert!(reference.metadata.is_none());
    }

    #[test]
    fn features_get_a_manifest_back_reference() {
        let manifest = json!({
            "items": [{
                "navPlace": {
                    "type": "FeatureCollection",
                    "features": [
                        { "type": "Feature", "geometry": { "type": "Point", "coordinates": [1.0, 2.0] } },
                        { "type": "Feature", "properties": { "label": "x" } },
                    ],
                },
            }],
        });

        let features = geo_features(&manifest, "M1");
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["manifest"], "M1");
        assert_eq!(features[1]["properties"]["label"], "x");
        assert_eq!(features[1]["properties"]["manifest"], "M1");
    }

    #[test]
    fn only_json_objects_are_read_as_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = [
            ("list.json", "[1, 2, 3]"),
            ("null.json", "null"),
            ("text.json", "\"m\""),
        ];
        for (file, body) in bodies {
            let path = dir.path().join(file);
            fs::write(&path, body).unwrap();
            assert!(matches!(read_manifest(&path), Err(ManifestReadError::NotAnObject)));
        }

        let path = dir.path().join("object.json");
        fs::write(&path, r#"{"id":"M"}"#).unwrap();
        assert_eq!(read_manifest(&path).unwrap()["id"], "M");
    }

    #[test]
    fn no_nav_place_means_no_features() {
        assert!(geo_features(&json!({ "items": [{}] }), "M").is_empty());
        assert!(geo_features(&json!({}), "M").is_empty());
    }
}
