use std::{cmp::Ordering, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum TierSpecError {
    #[error("Tier {0:?} has ratio {1}, ratios must lie in (0, 1]")]
    RatioOutOfRange(String, f64),
    #[error("Tier name is empty")]
    EmptyName,
}

/// Requested LOD level, before any geometry work has happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodTierSpec {
    name: String,
    ratio: f64,
}

impl LodTierSpec {
    pub fn new(name: impl Into<String>, ratio: f64) -> Result<Self, TierSpecError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TierSpecError::EmptyName);
        }
        if !(ratio.is_finite() && ratio > 0.0 && ratio <= 1.0) {
            return Err(TierSpecError::RatioOutOfRange(name, ratio));
        }
        Ok(Self { name, ratio })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ratio(&self) -> f64 {
        self.ratio
    }

    pub fn ordinal(&self) -> Option<u32> {
        tier_ordinal(&self.name)
    }

    /// A ratio of one keeps the source geometry untouched.
    pub fn is_full_resolution(&self) -> bool {
        self.ratio >= 1.0
    }
}

/// The lod0..lod4 ladder used when no tiers are configured.
pub fn default_tier_specs() -> Vec<LodTierSpec> {
    [
        ("lod0", 1.0),
        ("lod1", 0.5),
        ("lod2", 0.25),
        ("lod3", 0.1),
        ("lod4", 0.05),
    ]
    .into_iter()
    .map(|(name, ratio)| LodTierSpec {
        name: name.to_owned(),
        ratio,
    })
    .collect()
}

/// Trailing decimal digits of a tier name, e.g. `lod12` -> 12.
pub fn tier_ordinal(name: &str) -> Option<u32> {
    let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

/// Highest fidelity first. Names without an ordinal sort after every numbered tier.
pub fn compare_tier_names(a: &str, b: &str) -> Ordering {
    match (tier_ordinal(a), tier_ordinal(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

pub fn quality_for_ordinal(ordinal: Option<u32>) -> &'static str {
    match ordinal {
        Some(0) => "high",
        Some(1) => "medium",
        Some(2) => "low",
        Some(_) => "thumbnail",
        None => "default",
    }
}

pub fn viewing_context_for_ordinal(ordinal: Option<u32>) -> &'static str {
    match ordinal {
        Some(0) => "Close inspection / Full detail",
        Some(1) => "Standard viewing",
        Some(2) => "Overview / Fast loading",
        Some(3) => "Preview / Mobile",
        Some(4) => "Thumbnail / Listing",
        _ => "General viewing",
    }
}

pub fn label_for_tier(name: &str) -> String {
    match tier_ordinal(name) {
        Some(0) => "Maximum resolution (100%)".to_owned(),
        Some(1) => "High resolution (50%)".to_owned(),
        Some(2) => "Medium resolution (25%)".to_owned(),
        Some(3) => "Low resolution (10%)".to_owned(),
        Some(4) => "Lowest resolution (5%)".to_owned(),
        _ => format!("Level {name}"),
    }
}

/// One LOD level written to disk by a generation run.
#[derive(Debug, Clone, PartialEq)]
pub struct LodTier {
    pub name: String,
    pub ordinal: Option<u32>,
    pub ratio: f64,
    /// Face count asked of the simplifier, equal to the source count for full resolution tiers.
    pub target_faces: usize,
    pub face_count: usize,
    pub vert_count: usize,
    pub path: PathBuf,
    pub byte_size: u64,
    pub quality: &'static str,
    pub viewing_context: &'static str,
    pub elapsed: Duration,
}

impl LodTier {
    pub fn new(
        name: impl Into<String>,
        ratio: f64,
        path: PathBuf,
        byte_size: u64,
        (face_count, vert_count): (usize, usize),
    ) -> Self {
        let name = name.into();
        let ordinal = tier_ordinal(&name);
        Self {
            ordinal,
            ratio,
            target_faces: face_count,
            face_count,
            vert_count,
            path,
            byte_size,
            quality: quality_for_ordinal(ordinal),
            viewing_context: viewing_context_for_ordinal(ordinal),
            elapsed: Duration::ZERO,
            name,
        }
    }

    pub fn with_target(mut self, target_faces: usize) -> Self {
        self.target_faces = target_faces;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn label(&self) -> String {
        label_for_tier(&self.name)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size_mb(&self) -> f64 {
        bytes_to_mb(self.byte_size)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Sort tiers from highest to lowest fidelity.
pub fn sort_tiers(tiers: &mut [LodTier]) {
    tiers.sort_by(|a, b| compare_tier_names(&a.name, &b.name));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_outside_unit_interval_are_rejected() {
        assert!(LodTierSpec::new("lod1", 0.5).is_ok());
        assert!(LodTierSpec::new("lod0", 1.0).unwrap().is_full_resolution());
        assert_eq!(
            LodTierSpec::new("lod9", 0.0),
            Err(TierSpecError::RatioOutOfRange("lod9".to_owned(), 0.0))
        );
        assert!(LodTierSpec::new("lod9", 1.5).is_err());
        assert!(LodTierSpec::new("lod9", f64::NAN).is_err());
        assert_eq!(LodTierSpec::new("", 0.5), Err(TierSpecError::EmptyName));
    }

    #[test]
    fn ordinals_are_parsed_from_trailing_digits() {
        assert_eq!(tier_ordinal("lod0"), Some(0));
        assert_eq!(tier_ordinal("lod12"), Some(12));
        assert_eq!(tier_ordinal("preview"), None);
    }

    #[test]
    fn tiers_sort_numerically() {
        let mut names = vec!["lod10", "preview", "lod2", "lod0"];
        names.sort_by(|a, b| compare_tier_names(a, b));
        assert_eq!(names, ["lod0", "lod2", "lod10", "preview"]);
    }

    #[test]
    fn labels_and_quality() {
        assert_eq!(label_for_tier("lod0"), "Maximum resolution (100%)");
        assert_eq!(label_for_tier("lod4"), "Lowest resolution (5%)");
        assert_eq!(label_for_tier("lod7"), "Level lod7");
        assert_eq!(quality_for_ordinal(Some(2)), "low");
        assert_eq!(quality_for_ordinal(Some(7)), "thumbnail");
        assert_eq!(quality_for_ordinal(None), "default");
    }

    #[test]
    fn tiers_carry_their_viewing_context() {
        let tier = |name: &str| LodTier::new(name, 0.5, PathBuf::from("a.glb"), 1, (10, 8));
        assert_eq!(tier("lod0").viewing_context, "Close inspection / Full detail");
        assert_eq!(tier("lod3").viewing_context, "Preview / Mobile");
        assert_eq!(tier("lod4").viewing_context, "Thumbnail / Listing");
        assert_eq!(tier("lod9").viewing_context, "General viewing");
        assert_eq!(tier("preview").viewing_context, "General viewing");
    }
}
