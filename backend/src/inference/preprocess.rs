use image::imageops::{self, FilterType};
use image::DynamicImage;
use ndarray::Array4;

use super::model::INPUT_SIZE;

/// ImageNet normalization mean values (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

pub fn decode(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Converts an image of any size into a normalized `[1, 3, 224, 224]` batch.
/// The aspect ratio is not preserved.
pub fn to_input_batch(image: &DynamicImage) -> Array4<f32> {
    let side = INPUT_SIZE as u32;
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, side, side, FilterType::Triangle);

    let side = side as usize;
    Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
        let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
        (value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]
    })
}

pub fn preprocess(bytes: &[u8]) -> Result<Array4<f32>, image::ImageError> {
    let image = decode(bytes)?;
    Ok(to_input_batch(&image))
}
