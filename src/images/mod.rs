//! Image derivative pipeline over the cache store.
//!
//! A source image plus a transformation request becomes a set of cached
//! derivative files with stable public URLs. Variant sets are memoized under
//! a content+options fingerprint, so any change to the source's modification
//! time or to the options lands on a fresh key and never touches the stale
//! entry.
//!
//! Derivative filenames are deterministic in source and options; concurrent
//! writers racing on a miss produce byte-identical files.

mod encode;
mod options;
mod variants;

pub use options::{OptimizeOptions, SizeSpec, default_breakpoints};
pub use variants::{ImageVariant, VariantFormat, VariantSet};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{DynamicImage, GenericImageView};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheStore, key};
use crate::config::ImageSettings;
use crate::util::clock::{Clock, unix_seconds};

/// Invalid pipeline input, surfaced to the caller as a hard failure.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("image file not found: {path}")]
    MissingSource { path: PathBuf },
    #[error("unsupported image format: {extension}")]
    UnsupportedFormat { extension: String },
}

/// Derivative producer bound to one cache store and settings set.
pub struct ImagePipeline {
    store: Arc<CacheStore>,
    settings: ImageSettings,
    clock: Arc<dyn Clock>,
}

impl ImagePipeline {
    pub fn new(store: Arc<CacheStore>, settings: ImageSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    /// Produce (or fetch) the variant set for a source image.
    ///
    /// A missing source or an extension outside the allowed set is the
    /// caller's mistake and comes back as an error. A decode or encode
    /// failure is not: the pipeline logs it and degrades to a descriptor
    /// pointing at the untouched source.
    pub fn optimize(
        &self,
        source: &Path,
        options: &OptimizeOptions,
    ) -> Result<VariantSet, PipelineError> {
        let metadata = fs::metadata(source).map_err(|_| PipelineError::MissingSource {
            path: source.to_path_buf(),
        })?;

        let extension = source
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or_default();
        let format =
            VariantFormat::from_extension(extension).ok_or_else(|| {
                PipelineError::UnsupportedFormat {
                    extension: extension.to_string(),
                }
            })?;

        counter!("ossatura_image_optimize_total").increment(1);

        let mtime = metadata.modified().map(unix_seconds).unwrap_or(0);
        let cache_key = options::fingerprint(source, mtime, options);
        if let Some(set) = self.store.get::<VariantSet>(&cache_key) {
            return Ok(set);
        }

        let set = match self.produce(source, format, options) {
            Ok(set) => set,
            Err(err) => {
                counter!("ossatura_image_degraded_total").increment(1);
                error!(
                    source = %source.display(),
                    error = %err,
                    "image optimization failed, serving the untouched source"
                );
                // Not cached: the next call retries the encode.
                return Ok(self.degraded(source, format, metadata.len()));
            }
        };

        self.store.set(&cache_key, &set, self.settings.variant_ttl);
        Ok(set)
    }

    /// Best URL for the client: the WebP variant when `accept` admits
    /// `image/webp` and one exists, else the original variant, else the raw
    /// public URL when optimization itself failed.
    pub fn url(&self, source: &Path, options: &OptimizeOptions, accept: Option<&str>) -> String {
        match self.optimize(source, options) {
            Ok(set) => {
                let wants_webp = accept.is_some_and(|value| value.contains("image/webp"));
                if wants_webp {
                    if let Some(webp) = set.webp {
                        return webp.url;
                    }
                }
                set.original.url
            }
            Err(error) => {
                warn!(
                    source = %source.display(),
                    %error,
                    "optimized url unavailable, serving the raw source"
                );
                self.public_url(source)
            }
        }
    }

    /// `srcset` attribute value built from the responsive set, ordered by
    /// ascending width.
    pub fn srcset(
        &self,
        source: &Path,
        options: &OptimizeOptions,
    ) -> Result<String, PipelineError> {
        let mut options = options.clone();
        options.responsive = true;
        Ok(self.optimize(source, &options)?.srcset())
    }

    /// Delete derivative files older than `max_age`; returns the count.
    ///
    /// Purely filesystem-local: the key/value index keeps any entries that
    /// point at deleted files, so callers tolerate missing-file responses or
    /// re-run [`ImagePipeline::optimize`].
    pub fn cleanup_cache(&self, max_age: Duration) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub(max_age) else {
            return 0;
        };
        let entries = match fs::read_dir(&self.settings.cache_directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(
                    directory = %self.settings.cache_directory.display(),
                    error = %err,
                    "derivative directory unreadable, nothing to clean"
                );
                return 0;
            }
        };

        let mut deleted = 0;
        for entry in entries.flatten() {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if modified < cutoff {
                match fs::remove_file(entry.path()) {
                    Ok(()) => deleted += 1,
                    Err(err) => warn!(
                        path = %entry.path().display(),
                        error = %err,
                        "failed to delete stale derivative"
                    ),
                }
            }
        }

        info!(
            deleted,
            max_age_seconds = max_age.as_secs(),
            "derivative cleanup finished"
        );
        deleted
    }

    fn produce(
        &self,
        source: &Path,
        format: VariantFormat,
        options: &OptimizeOptions,
    ) -> Result<VariantSet, image::ImageError> {
        fs::create_dir_all(&self.settings.cache_directory)?;
        let image = image::open(source)?;

        let original = self.derive(&image, source, format, options)?;

        let webp = if self.settings.enable_webp {
            Some(self.derive(&image, source, VariantFormat::WebP, options)?)
        } else {
            None
        };

        let mut responsive = BTreeMap::new();
        if options.responsive {
            for (name, spec) in options.breakpoints() {
                let sized = options.with_size(spec);
                responsive.insert(name, self.derive(&image, source, format, &sized)?);
            }
        }

        Ok(VariantSet {
            original,
            webp,
            responsive,
        })
    }

    fn derive(
        &self,
        image: &DynamicImage,
        source: &Path,
        format: VariantFormat,
        options: &OptimizeOptions,
    ) -> Result<ImageVariant, image::ImageError> {
        let started = Instant::now();
        let processed = encode::scale_down(image, options.width, options.height);

        let quality = options.quality.unwrap_or(match format {
            VariantFormat::WebP => self.settings.webp_quality,
            _ => self.settings.jpeg_quality,
        });

        let path = self.derivative_path(source, format, options);
        encode::write(&processed, &path, format, quality)?;
        let size_bytes = fs::metadata(&path)?.len();

        histogram!("ossatura_image_encode_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        let (width, height) = processed.dimensions();
        debug!(
            source = %source.display(),
            derivative = %path.display(),
            width,
            height,
            size_bytes,
            "derivative encoded"
        );

        Ok(ImageVariant {
            url: self.public_url(&path),
            path,
            width: Some(width),
            height: Some(height),
            size_bytes,
            format,
        })
    }

    /// Deterministic derivative location:
    /// `<stem>_<source-hash>_<options-hash>.<format>` under the cache
    /// directory.
    fn derivative_path(
        &self,
        source: &Path,
        format: VariantFormat,
        options: &OptimizeOptions,
    ) -> PathBuf {
        let stem = source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("image");
        let source_digest = key::digest_hex(source.to_string_lossy().as_bytes());
        let options_digest = key::digest_hex(options::serialized(options).as_bytes());

        self.settings.cache_directory.join(format!(
            "{stem}_{}_{}.{}",
            &source_digest[..16],
            &options_digest[..16],
            format.extension()
        ))
    }

    fn degraded(&self, source: &Path, format: VariantFormat, size_bytes: u64) -> VariantSet {
        VariantSet {
            original: ImageVariant {
                path: source.to_path_buf(),
                url: self.public_url(source),
                width: None,
                height: None,
                size_bytes,
                format,
            },
            webp: None,
            responsive: BTreeMap::new(),
        }
    }

    /// Public URL for a file under the public root: strip the root prefix
    /// and prepend the configured base URL.
    fn public_url(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.settings.public_root).unwrap_or(path);
        let relative = relative.to_string_lossy();
        format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }
}
