//! Transformation requests and their cache fingerprints.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::key;

/// One breakpoint of the responsive set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeSpec {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl SizeSpec {
    pub const fn width(width: u32) -> Self {
        Self {
            width: Some(width),
            height: None,
        }
    }

    pub const fn bounded(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
        }
    }
}

/// Requested transformation for one source image.
///
/// The serialized form feeds the fingerprint, so changing any field produces
/// a new cache key and forces recomputation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Encoder quality override; per-format configured defaults apply when
    /// absent.
    pub quality: Option<u8>,
    /// Also produce the responsive breakpoint set.
    pub responsive: bool,
    /// Breakpoint table override; [`default_breakpoints`] applies when
    /// absent.
    pub sizes: Option<BTreeMap<String, SizeSpec>>,
}

impl OptimizeOptions {
    /// The breakpoint table in effect, honoring the override.
    pub fn breakpoints(&self) -> BTreeMap<String, SizeSpec> {
        self.sizes.clone().unwrap_or_else(default_breakpoints)
    }

    /// These options with the target box replaced by one breakpoint.
    pub(crate) fn with_size(&self, spec: SizeSpec) -> Self {
        Self {
            width: spec.width,
            height: spec.height,
            ..self.clone()
        }
    }
}

/// Fixed breakpoint table: thumbnail 150×150, small 300, medium 600, large
/// 1200, each width-bounded with free height except the thumbnail.
pub fn default_breakpoints() -> BTreeMap<String, SizeSpec> {
    BTreeMap::from([
        ("thumbnail".to_string(), SizeSpec::bounded(150, 150)),
        ("small".to_string(), SizeSpec::width(300)),
        ("medium".to_string(), SizeSpec::width(600)),
        ("large".to_string(), SizeSpec::width(1200)),
    ])
}

/// Cache key for a variant set: `image_opt_<hash>_<mtime>_<hash>` over the
/// source path, its modification time, and the serialized options.
pub(crate) fn fingerprint(source: &Path, mtime: u64, options: &OptimizeOptions) -> String {
    let path_digest = key::digest_hex(source.to_string_lossy().as_bytes());
    let options_digest = key::digest_hex(serialized(options).as_bytes());
    format!("image_opt_{path_digest}_{mtime}_{options_digest}")
}

/// Canonical serialization of the options. Field order is fixed by the
/// struct and `sizes` is an ordered map, so equal options always serialize
/// identically.
pub(crate) fn serialized(options: &OptimizeOptions) -> String {
    serde_json::to_string(options).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn fingerprint_is_stable_for_equal_inputs() {
        let source = PathBuf::from("public/photo.jpg");
        let options = OptimizeOptions {
            width: Some(600),
            ..Default::default()
        };

        assert_eq!(
            fingerprint(&source, 1_700_000_000, &options),
            fingerprint(&source, 1_700_000_000, &options.clone())
        );
    }

    #[test]
    fn fingerprint_changes_with_any_input() {
        let source = PathBuf::from("public/photo.jpg");
        let options = OptimizeOptions {
            width: Some(600),
            ..Default::default()
        };
        let base = fingerprint(&source, 1_700_000_000, &options);

        let resized = OptimizeOptions {
            width: Some(300),
            ..options.clone()
        };
        assert_ne!(base, fingerprint(&source, 1_700_000_000, &resized));

        assert_ne!(base, fingerprint(&source, 1_700_000_001, &options));

        let moved = PathBuf::from("public/other.jpg");
        assert_ne!(base, fingerprint(&moved, 1_700_000_000, &options));
    }

    #[test]
    fn breakpoints_honor_the_override() {
        let defaults = OptimizeOptions::default().breakpoints();
        assert_eq!(defaults.len(), 4);
        assert_eq!(
            defaults.get("thumbnail"),
            Some(&SizeSpec::bounded(150, 150))
        );
        assert_eq!(defaults.get("large"), Some(&SizeSpec::width(1200)));

        let options = OptimizeOptions {
            sizes: Some(BTreeMap::from([(
                "hero".to_string(),
                SizeSpec::width(1920),
            )])),
            ..Default::default()
        };
        let overridden = options.breakpoints();
        assert_eq!(overridden.len(), 1);
        assert_eq!(overridden.get("hero"), Some(&SizeSpec::width(1920)));
    }
}
