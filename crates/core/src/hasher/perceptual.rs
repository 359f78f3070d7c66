use std::io::Cursor;

use fast_image_resize::{self as fir, images::Image as FirImage};
use image::DynamicImage;

use crate::error::{Error, Result};

/// Read the EXIF orientation tag (1-8). Returns 1 (normal) if missing or
/// unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u8 {
    let read = || -> Option<u8> {
        let mut reader = Cursor::new(bytes);
        let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
        let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
        field.value.get_uint(0).map(|v| v as u8)
    };
    read().unwrap_or(1)
}

/// Apply an EXIF orientation so the image is upright.
///
/// Orientations:
/// 1: Normal                    5: Mirror + rotate 90° CW
/// 2: Mirror horizontal         6: Rotate 90° CW
/// 3: Rotate 180°               7: Mirror + rotate 90° CCW
/// 4: Mirror vertical           8: Rotate 90° CCW
pub fn orient(image: DynamicImage, orientation: u8) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Downscale an image to a `width` x `height` grayscale buffer.
pub(crate) fn gray_thumbnail(image: &DynamicImage, width: u32, height: u32) -> Result<Vec<u8>> {
    let luma = image.to_luma8();
    let (w, h) = luma.dimensions();
    if w == 0 || h == 0 {
        return Err(Error::UnsupportedFormat("image has no pixels".to_string()));
    }
    let src = FirImage::from_vec_u8(w, h, luma.into_raw(), fir::PixelType::U8)
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    let mut dst = FirImage::new(width, height, fir::PixelType::U8);
    fir::Resizer::new()
        .resize(&src, &mut dst, None)
        .map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    Ok(dst.buffer().to_vec())
}

/// Compute the 64-bit difference hash (dHash) of an upright image.
pub fn compute_dhash(image: &DynamicImage) -> Result<u64> {
    let pixels = gray_thumbnail(image, 9, 8)?;
    Ok(dhash_from_pixels(&pixels))
}

/// dHash over 9x8 grayscale pixels. For each row of 9 pixels, compare
/// adjacent pairs: 8 bits per row × 8 rows = 64 bits.
fn dhash_from_pixels(pixels: &[u8]) -> u64 {
    let mut hash: u64 = 0;
    let mut bit = 0;
    for row in 0..8 {
        for col in 0..8 {
            let left = pixels[row * 9 + col];
            let right = pixels[row * 9 + col + 1];
            if left > right {
                hash |= 1 << bit;
            }
            bit += 1;
        }
    }
    hash
}

/// Compute the Hamming distance between two hash values.
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
