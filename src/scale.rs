//! SIMD-backed tile downscaling via `fast_image_resize`.
//!
//! Two thin wrappers over the typed-image API, one for RGB8 tiles (the
//! preview composition) and one for grayscale (downscaled matching
//! reads). Tiles are tightly packed, so no stride handling is needed;
//! the caller supplies a reusable [`Resizer`] so the SIMD state is
//! built once per run. The Box convolution filter is an area average,
//! the right reduction for shrinking screenshots.

use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::{U8, U8x3};
use fir::{ResizeAlg, ResizeOptions, Resizer};
use image::{GrayImage, RgbImage};

use crate::error::{StitchError, StitchResult};

fn resize_error(e: impl std::error::Error + Send + Sync + 'static) -> StitchError {
    StitchError::io("image resize", std::io::Error::other(e))
}

fn options() -> ResizeOptions {
    ResizeOptions::new()
        .resize_alg(ResizeAlg::Convolution(fir::FilterType::Box))
        .use_alpha(false)
}

/// Downscale an RGB image to exactly `dst_w` × `dst_h`.
pub fn downscale_rgb(
    resizer: &mut Resizer,
    src: &RgbImage,
    dst_w: u32,
    dst_h: u32,
) -> StitchResult<RgbImage> {
    let dst_w = dst_w.max(1);
    let dst_h = dst_h.max(1);
    let src_view = TypedImageRef::<U8x3>::from_buffer(src.width(), src.height(), src.as_raw())
        .map_err(resize_error)?;
    let mut out = vec![0u8; dst_w as usize * dst_h as usize * 3];
    let mut dst_view =
        TypedImage::<U8x3>::from_buffer(dst_w, dst_h, &mut out).map_err(resize_error)?;
    resizer
        .resize_typed::<U8x3>(&src_view, &mut dst_view, &options())
        .map_err(resize_error)?;
    Ok(RgbImage::from_raw(dst_w, dst_h, out).expect("buffer sized for dimensions"))
}

/// Downscale a grayscale image to exactly `dst_w` × `dst_h`.
pub fn downscale_gray(
    resizer: &mut Resizer,
    src: &GrayImage,
    dst_w: u32,
    dst_h: u32,
) -> StitchResult<GrayImage> {
    let dst_w = dst_w.max(1);
    let dst_h = dst_h.max(1);
    let src_view = TypedImageRef::<U8>::from_buffer(src.width(), src.height(), src.as_raw())
        .map_err(resize_error)?;
    let mut out = vec![0u8; dst_w as usize * dst_h as usize];
    let mut dst_view =
        TypedImage::<U8>::from_buffer(dst_w, dst_h, &mut out).map_err(resize_error)?;
    resizer
        .resize_typed::<U8>(&src_view, &mut dst_view, &options())
        .map_err(resize_error)?;
    Ok(GrayImage::from_raw(dst_w, dst_h, out).expect("buffer sized for dimensions"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_rgb_halves_dimensions() {
        let mut img = RgbImage::new(8, 8);
        for p in img.pixels_mut() {
            *p = image::Rgb([100, 150, 200]);
        }
        let mut resizer = Resizer::new();
        let small = downscale_rgb(&mut resizer, &img, 4, 4).unwrap();
        assert_eq!(small.dimensions(), (4, 4));
        // A constant image stays constant under an area average.
        assert_eq!(small.get_pixel(1, 2), &image::Rgb([100, 150, 200]));
    }

    #[test]
    fn test_downscale_gray_clamps_to_one_pixel() {
        let img = GrayImage::new(5, 5);
        let mut resizer = Resizer::new();
        let tiny = downscale_gray(&mut resizer, &img, 0, 0).unwrap();
        assert_eq!(tiny.dimensions(), (1, 1));
    }
}
