use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::lod::{default_tier_specs, LodTierSpec, TierSpecError};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid LOD tier: {0}")]
    Tier(#[from] TierSpecError),
    #[error("No LOD tiers configured")]
    NoTiers,
}

/// Everything the pipeline needs to know about where things live and how to bake them.
///
/// Each section falls back to its default when missing from the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BakerConfig {
    /// URL the manifests directory is served from. Manifest ids hang off `{base_url}/{name}`.
    pub base_url: String,
    /// Root-relative URL of the models directory, used for model resource ids.
    pub model_url_prefix: String,
    /// Root-relative URL of the thumbnails directory.
    pub thumbnail_url_prefix: String,
    pub paths: PathsConfig,
    pub lod: LodConfig,
    pub thumbnail: ThumbnailConfig,
    pub collection: CollectionConfig,
    pub normalize: NormalizeConfig,
}

impl Default for BakerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/data/manifests".to_owned(),
            model_url_prefix: "/data/models".to_owned(),
            thumbnail_url_prefix: "/thumbnails".to_owned(),
            paths: Default::default(),
            lod: Default::default(),
            thumbnail: Default::default(),
            collection: Default::default(),
            normalize: Default::default(),
        }
    }
}

impl BakerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_owned(), e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        // Surface bad ratios at load time rather than halfway through a bake
        config.lod.tier_specs()?;
        Ok(config)
    }

    pub fn manifest_base_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }

    pub fn model_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.model_url_prefix.trim_end_matches('/'), file_name)
    }

    pub fn thumbnail_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}",
            self.thumbnail_url_prefix.trim_end_matches('/'),
            file_name
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub models: PathBuf,
    pub manifests: PathBuf,
    pub thumbnails: PathBuf,
    pub cache: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models: "public/data/models".into(),
            manifests: "public/data/manifests".into(),
            thumbnails: "public/thumbnails".into(),
            cache: ".model_cache".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    /// Tier name to face ratio. Empty means the default lod0..lod4 ladder.
    pub tiers: BTreeMap<String, f64>,
    /// Floor on the face count of any simplified tier.
    pub min_faces: usize,
    /// Working memory the simplifier may assume, in MiB.
    pub max_memory_mb: u64,
}

impl Default for LodConfig {
    fn default() -> Self {
        Self {
            tiers: default_tier_specs()
                .into_iter()
                .map(|t| (t.name().to_owned(), t.ratio()))
                .collect(),
            min_faces: 12,
            max_memory_mb: 2048,
        }
    }
}

impl LodConfig {
    pub fn tier_specs(&self) -> Result<Vec<LodTierSpec>, ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::NoTiers);
        }
        self.tiers
            .iter()
            .map(|(name, &ratio)| LodTierSpec::new(name.clone(), ratio).map_err(Into::into))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub enabled: bool,
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 512,
            height: 512,
            background: [240, 240, 240],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub label: String,
    pub description: Option<String>,
    /// Glob, relative to the manifests directory, selecting the manifests to aggregate.
    pub manifest_glob: String,
    pub file_name: String,
    /// Extra `(label, value)` entries, written in this order after the generated ones.
    pub metadata: Vec<(String, String)>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            label: "3D Models Collection".to_owned(),
            description: None,
            manifest_glob: "*_manifest.json".to_owned(),
            file_name: "collection.json".to_owned(),
            metadata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Development server origin baked into documents built locally.
    pub origin: String,
    /// Externally resolvable stand-in for the origin.
    pub placeholder: String,
    /// Path prefixes that mark a URL as pointing at stored assets, which become root-relative.
    pub local_markers: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_owned(),
            placeholder: "https://example.org".to_owned(),
            local_markers: vec!["/data/".to_owned(), "/thumbnails/".to_owned()],
        }
    }
}
