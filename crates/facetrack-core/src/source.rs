//! Decoding of caller-supplied images into RGB8 pixel grids.

use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("empty image data")]
    Empty,
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
}

/// Decode encoded image bytes (format sniffed from content).
///
/// Grayscale and alpha images are converted to 3-channel RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Read and decode an image file.
pub fn open_image(path: &Path) -> Result<RgbImage, DecodeError> {
    let bytes = std::fs::read(path).map_err(|source| DecodeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    decode_image(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{patterned_image, write_png};

    #[test]
    fn test_decode_png_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        let img = patterned_image(17, 9, 8);
        write_png(&path, &img);
        assert_eq!(open_image(&path).unwrap(), img);
    }

    #[test]
    fn test_decode_grayscale_expands_to_rgb() {
        let gray = image::GrayImage::from_pixel(4, 4, image::Luma([90]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        gray.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        let rgb = decode_image(bytes.get_ref()).unwrap();
        assert!(rgb.pixels().all(|p| p.0 == [90, 90, 90]));
    }

    #[test]
    fn test_decode_failures() {
        assert!(matches!(decode_image(&[]), Err(DecodeError::Empty)));
        assert!(matches!(decode_image(b"GIF? no"), Err(DecodeError::Decode(_))));
        assert!(matches!(
            open_image(Path::new("/nonexistent/face.png")),
            Err(DecodeError::Read { .. })
        ));
    }
}
