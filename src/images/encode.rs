//! Decode, scale, and re-encode helpers over the `image` crate.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use super::variants::VariantFormat;

/// Aspect-preserving downscale into the requested box.
///
/// A source that already fits comes back untouched; there is no upscale
/// path. An unset side of the box is unbounded.
pub(crate) fn scale_down(
    image: &DynamicImage,
    width: Option<u32>,
    height: Option<u32>,
) -> DynamicImage {
    let (source_width, source_height) = image.dimensions();
    let max_width = width.unwrap_or(source_width).min(source_width).max(1);
    let max_height = height.unwrap_or(source_height).min(source_height).max(1);

    if max_width >= source_width && max_height >= source_height {
        return image.clone();
    }

    image.resize(max_width, max_height, FilterType::Lanczos3)
}

/// Encode `image` to `path` in the given format.
///
/// `quality` drives the JPEG encoder; the PNG, GIF, and WebP encoders here
/// have no quality knob and ignore it.
pub(crate) fn write(
    image: &DynamicImage,
    path: &Path,
    format: VariantFormat,
    quality: u8,
) -> Result<(), image::ImageError> {
    match format {
        VariantFormat::Jpeg => {
            let writer = BufWriter::new(File::create(path)?);
            let encoder = JpegEncoder::new_with_quality(writer, quality);
            // The JPEG encoder rejects alpha; flatten to RGB first.
            image.to_rgb8().write_with_encoder(encoder)
        }
        VariantFormat::Png => image.save_with_format(path, ImageFormat::Png),
        VariantFormat::Gif => image.save_with_format(path, ImageFormat::Gif),
        VariantFormat::WebP => image.to_rgba8().save_with_format(path, ImageFormat::WebP),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, height)
    }

    #[test]
    fn scale_down_fits_the_box_and_preserves_aspect() {
        let scaled = scale_down(&source(1200, 800), Some(600), None);
        assert_eq!(scaled.dimensions(), (600, 400));

        let boxed = scale_down(&source(1200, 800), Some(150), Some(150));
        let (width, height) = boxed.dimensions();
        assert!(width <= 150 && height <= 150);
        assert_eq!(width, 150);
    }

    #[test]
    fn scale_down_never_upscales() {
        let scaled = scale_down(&source(1200, 800), Some(2400), Some(1600));
        assert_eq!(scaled.dimensions(), (1200, 800));

        let unbounded = scale_down(&source(1200, 800), None, None);
        assert_eq!(unbounded.dimensions(), (1200, 800));
    }

    #[test]
    fn write_produces_decodable_files() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let image = source(32, 16);

        for format in [
            VariantFormat::Jpeg,
            VariantFormat::Png,
            VariantFormat::Gif,
            VariantFormat::WebP,
        ] {
            let path = dir.path().join(format!("out.{}", format.extension()));
            write(&image, &path, format, 85).expect("encode");

            let decoded = image::open(&path).expect("decode");
            assert_eq!(decoded.dimensions(), (32, 16));
        }
    }
}
