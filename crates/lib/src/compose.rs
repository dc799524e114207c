//! Image composition for markdown previews: one image passes through, four images become a 2×2 grid.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage};

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("cannot compose {0} images (expected 1 or 4)")]
    UnsupportedCount(usize),
    #[error("encode png: {0}")]
    Encode(#[from] image::ImageError),
}

/// Merge 1 or 4 images into a single canvas.
///
/// With four images the first image's size is the tile size; tiles of a different size
/// are resized to it before pasting. Placement is row-major: (0,0), (W,0), (0,H), (W,H).
pub fn compose(images: &[DynamicImage]) -> Result<DynamicImage, ComposeError> {
    match images {
        [single] => Ok(single.clone()),
        [first, ..] if images.len() == 4 => {
            let (width, height) = first.dimensions();
            let mut canvas = RgbImage::new(width * 2, height * 2);
            let offsets = [(0, 0), (width, 0), (0, height), (width, height)];
            for (img, (x, y)) in images.iter().zip(offsets) {
                let tile = if img.dimensions() == (width, height) {
                    img.to_rgb8()
                } else {
                    log::warn!(
                        "compose: tile {}x{} differs from {}x{}, resizing",
                        img.width(),
                        img.height(),
                        width,
                        height
                    );
                    imageops::resize(&img.to_rgb8(), width, height, FilterType::Triangle)
                };
                imageops::replace(&mut canvas, &tile, x as i64, y as i64);
            }
            Ok(DynamicImage::ImageRgb8(canvas))
        }
        _ => Err(ComposeError::UnsupportedCount(images.len())),
    }
}

/// Serialize an image as PNG.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, ComposeError> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Compose and serialize in one step; this is what the markdown reply uploads.
pub fn merge_images(images: &[DynamicImage]) -> Result<Vec<u8>, ComposeError> {
    let merged = compose(images)?;
    encode_png(&merged)
}
