//! Image file helpers shared by the classifier and the redactor.

use std::path::Path;

use image::{DynamicImage, ImageFormat, ImageReader, RgbImage};

use crate::error::{Error, Result};

/// Check if a file has a supported image extension (JPEG or PNG).
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(ext.to_lowercase().as_str(), "jpg" | "jpeg" | "png"),
        None => false,
    }
}

/// Decode an image, picking the decoder from the file's leading bytes.
///
/// CDN assets do not always match their extension (PNG bytes under a `.jpg`
/// name, for example); the extension is only a fallback when the content is
/// not recognized.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read, or an image error if it
/// cannot be decoded.
pub fn load_image(path: &Path) -> Result<DynamicImage> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// Save an RGB image with format-specific quality settings.
///
/// JPEG output is written at quality 100 so a redacted asset loses as little
/// as possible on re-encode.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let file = std::io::BufWriter::new(std::fs::File::create(path)?);
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(img)?;
        }
        ImageFormat::Png => {
            DynamicImage::ImageRgb8(img.clone()).save_with_format(path, format)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_supported_image_accepts_jpeg_and_png() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
    }

    #[test]
    fn is_supported_image_rejects_other_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("photo.webp")));
        assert!(!is_supported_image(Path::new("photo")));
    }

    #[test]
    fn save_image_round_trips_png_pixels() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.png");
        let mut img = RgbImage::new(4, 3);
        img.put_pixel(1, 2, image::Rgb([10, 20, 30]));
        save_image(&img, &path).unwrap();
        let back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(back.get_pixel(1, 2), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn load_image_sniffs_content_over_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let png = tmp.path().join("out.png");
        let mut img = RgbImage::new(5, 4);
        img.put_pixel(3, 1, image::Rgb([200, 40, 60]));
        save_image(&img, &png).unwrap();
        let misnamed = tmp.path().join("served-as.jpg");
        std::fs::rename(&png, &misnamed).unwrap();

        let back = load_image(&misnamed).unwrap().to_rgb8();
        assert_eq!(back.dimensions(), (5, 4));
        assert_eq!(back.get_pixel(3, 1), &image::Rgb([200, 40, 60]));
    }

    #[test]
    fn load_image_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();
        assert!(load_image(&path).is_err());
    }

    #[test]
    fn save_image_rejects_unknown_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let err = save_image(&RgbImage::new(2, 2), &tmp.path().join("out.xyz"));
        assert!(matches!(err, Err(Error::UnsupportedFormat(_))));
    }
}
