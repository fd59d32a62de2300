use std::{
    fs,
    path::{Path, PathBuf},
};

use common::config::NormalizeConfig;
use serde_json::Value;

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("Placeholder {placeholder:?} contains the origin {origin:?}, rewriting would never settle")]
    OriginInPlaceholder { origin: String, placeholder: String },
    #[error("Placeholder {placeholder:?} ends with the start of the origin {origin:?}, rewriting would never settle")]
    PlaceholderOverlapsOrigin { origin: String, placeholder: String },
    #[error("Origin is empty")]
    EmptyOrigin,
    #[error("Failed to access {0:?}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Invalid JSON in {0:?}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
    #[error("Invalid pattern: {0}")]
    Glob(#[from] glob::PatternError),
}

/// Visit every string in `value` along with the key of the object member that holds it.
///
/// Array elements report the key of the enclosing member, top level strings report `None`.
/// `rule` returns a replacement, or `None` to leave the string alone. Returns the number of
/// strings replaced.
pub fn map_strings<F>(value: &mut Value, mut rule: F) -> usize
where
    F: FnMut(Option<&str>, &str) -> Option<String>,
{
    map_strings_under(value, None, &mut rule)
}

fn map_strings_under<F>(value: &mut Value, key: Option<&str>, rule: &mut F) -> usize
where
    F: FnMut(Option<&str>, &str) -> Option<String>,
{
    match value {
        Value::String(s) => match rule(key, s.as_str()) {
            Some(replacement) if replacement != *s => {
                *s = replacement;
                1
            }
            _ => 0,
        },
        Value::Array(items) => items
            .iter_mut()
            .map(|item| map_strings_under(item, key, rule))
            .sum(),
        Value::Object(members) => members
            .iter_mut()
            .map(|(k, v)| map_strings_under(v, Some(k.as_str()), rule))
            .sum(),
        _ => 0,
    }
}

/// True when some non-empty tail of `placeholder` is a head of `origin`. Text following such a
/// placeholder could complete the origin again.
fn overlaps(placeholder: &str, origin: &str) -> bool {
    (0..placeholder.len())
        .filter(|&i| placeholder.is_char_boundary(i))
        .any(|i| origin.starts_with(&placeholder[i..]))
}

/// Rewrites development-origin URLs: asset paths become root-relative, everything else moves
/// onto the placeholder origin. Applying it twice changes nothing the second time.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    origin: String,
    placeholder: String,
    local_markers: Vec<String>,
}

impl UrlNormalizer {
    pub fn new(config: &NormalizeConfig) -> Result<Self, NormalizeError> {
        let origin = config.origin.trim_end_matches('/').to_owned();
        if origin.is_empty() {
            return Err(NormalizeError::EmptyOrigin);
        }
        if config.placeholder.contains(&origin) {
            return Err(NormalizeError::OriginInPlaceholder {
                origin,
                placeholder: config.placeholder.clone(),
            });
        }
        let placeholder = config.placeholder.trim_end_matches('/').to_owned();
        if overlaps(&placeholder, &origin) {
            return Err(NormalizeError::PlaceholderOverlapsOrigin {
                origin,
                placeholder: config.placeholder.clone(),
            });
        }
        Ok(Self {
            origin,
            placeholder,
            local_markers: config.local_markers.clone(),
        })
    }

    /// `None` when `text` holds no reference to the origin.
    pub fn normalize_str(&self, text: &str) -> Option<String> {
        if !text.contains(&self.origin) {
            return None;
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(at) = rest.find(&self.origin) {
            out.push_str(&rest[..at]);
            rest = &rest[at + self.origin.len()..];
            if !self.is_local(rest) {
                out.push_str(&self.placeholder);
            }
        }
        out.push_str(rest);
        Some(out)
    }

    fn is_local(&self, path: &str) -> bool {
        self.local_markers.iter().any(|m| path.starts_with(m.as_str()))
    }

    /// Rewrite every string in `doc`, returning how many changed.
    pub fn normalize_value(&self, doc: &mut Value) -> usize {
        map_strings(doc, |_key, text| self.normalize_str(text))
    }

    /// Rewrite a JSON file in place. The file is only written when something changed.
    pub fn normalize_file(&self, path: &Path) -> Result<usize, NormalizeError> {
        let text = fs::read_to_string(path).map_err(|e| NormalizeError::Io(path.to_owned(), e))?;
        let mut doc: Value =
            serde_json::from_str(&text).map_err(|e| NormalizeError::Json(path.to_owned(), e))?;

        let rewrites = self.normalize_value(&mut doc);
        if rewrites > 0 {
            let json = serde_json::to_string_pretty(&doc)
                .map_err(|e| NormalizeError::Json(path.to_owned(), e))?;
            fs::write(path, json).map_err(|e| NormalizeError::Io(path.to_owned(), e))?;
            log::info!("Rewrote {rewrites} URLs in {}", path.display());
        } else {
            log::debug!("Nothing to rewrite in {}", path.display());
        }
        Ok(rewrites)
    }

    /// Normalize every `*.json` file directly under `dir`. Unparseable files are logged and skipped.
    pub fn normalize_dir(&self, dir: &Path) -> Result<usize, NormalizeError> {
        let pattern = format!("{}/*.json", glob::Pattern::escape(&dir.to_string_lossy()));
        let mut files: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();
        files.sort();

        let mut total = 0;
        for file in &files {
            match self.normalize_file(file) {
                Ok(n) => total += n,
                Err(e @ NormalizeError::Json(..)) => log::warn!("Skipping {e}"),
                Err(e) => return Err(e),
            }
        }
        log::info!("Rewrote {total} URLs across {} files", files.len());
        Ok(total)
    }
}
