//! Path-safe image reading and writing.
//!
//! Tile directories routinely carry non-ASCII path components, and some
//! platform decode paths choke on those. Both directions here go through
//! a byte buffer instead: reads slurp the file and decode from memory,
//! writes encode into memory and then hand the finished bytes to the
//! filesystem. PNG output uses the fast compression profile; the mosaics
//! are large and recompression gains are not worth the encode time.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbImage};

use crate::error::{StitchError, StitchResult};

/// Read and decode an image, buffering the file bytes first.
pub fn read_image(path: &Path) -> StitchResult<DynamicImage> {
    let bytes = fs::read(path)
        .map_err(|e| StitchError::io(format!("reading {}", path.display()), e))?;
    Ok(image::load_from_memory(&bytes)?)
}

/// Encode an RGB image as PNG (fast compression) and write the bytes.
pub fn write_png_rgb(path: &Path, img: &RgbImage) -> StitchResult<()> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut buf),
        CompressionType::Fast,
        PngFilterType::Adaptive,
    );
    encoder.write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ExtendedColorType::Rgb8,
    )?;
    fs::write(path, &buf)
        .map_err(|e| StitchError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_png_round_trips_through_unicode_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("地図タイル_β.png");

        let mut img = RgbImage::new(4, 3);
        img.put_pixel(2, 1, image::Rgb([10, 200, 30]));
        write_png_rgb(&path, &img).unwrap();

        let back = read_image(&path).unwrap().to_rgb8();
        assert_eq!(back.dimensions(), (4, 3));
        assert_eq!(back.get_pixel(2, 1), &image::Rgb([10, 200, 30]));
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let err = read_image(Path::new("/nonexistent/R00_C00.png")).unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
