use std::path::{Path, PathBuf};

/// A model resolved to a file on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    source: String,
    path: PathBuf,
    byte_size: u64,
    cache_key: Option<String>,
}

impl Asset {
    pub fn new(
        source: impl Into<String>,
        path: PathBuf,
        byte_size: u64,
        cache_key: Option<String>,
    ) -> Self {
        Self {
            source: source.into(),
            path,
            byte_size,
            cache_key,
        }
    }

    /// The locator the asset was requested with, either a path or a URL.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    /// Cache file name, only set for remote sources.
    pub fn cache_key(&self) -> Option<&str> {
        self.cache_key.as_deref()
    }

    pub fn is_remote(&self) -> bool {
        self.cache_key.is_some()
    }

    /// File stem used to name every derived output, `sponza.glb` -> `sponza`.
    pub fn name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_owned())
    }
}
