//! Derivative descriptors returned by the pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Output encoding of a derivative file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantFormat {
    Jpeg,
    Png,
    Gif,
    WebP,
}

impl VariantFormat {
    /// Parse a source extension from the allowed set; `jpg` and `jpeg` fold
    /// together.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::WebP),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
            Self::WebP => "webp",
        }
    }
}

/// One derivative file with a stable public URL.
///
/// Dimensions are `None` only on the degraded descriptor that points at an
/// untouched source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageVariant {
    pub path: PathBuf,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_bytes: u64,
    pub format: VariantFormat,
}

/// Every derivative produced for one source image and option set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSet {
    pub original: ImageVariant,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webp: Option<ImageVariant>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub responsive: BTreeMap<String, ImageVariant>,
}

impl VariantSet {
    /// `srcset` attribute value over the responsive set, ordered by
    /// ascending width. Variants without a known width are left out.
    pub fn srcset(&self) -> String {
        let mut entries: Vec<(&ImageVariant, u32)> = self
            .responsive
            .values()
            .filter_map(|variant| variant.width.map(|width| (variant, width)))
            .collect();
        entries.sort_by_key(|(_, width)| *width);

        entries
            .iter()
            .map(|(variant, width)| format!("{} {width}w", variant.url))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
