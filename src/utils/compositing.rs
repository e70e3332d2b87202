//! Mask-guided blending of model output with the original image

use crate::error::{InpaintError, Result};
use image::{Rgb, RgbImage};
use ndarray::{Array4, Zip};

/// Blend the inpainted output into the input where the mask is set
///
/// `result = output * mask + image * (1 - mask)`, with the single-channel mask
/// broadcast over the three colour channels.
///
/// # Errors
/// - `output` and `image` are not `[1, 3, H, W]` of the same size
/// - `mask` is not `[1, 1, H, W]` for that size
pub fn composite(
    output: &Array4<f32>,
    image: &Array4<f32>,
    mask: &Array4<f32>,
) -> Result<Array4<f32>> {
    let (batch, channels, height, width) = image.dim();
    if batch != 1 || channels != 3 {
        return Err(InpaintError::processing_stage_error(
            "compositing",
            "image tensor must be [1, 3, H, W]",
            Some(&format!("{:?}", image.shape())),
        ));
    }
    if output.dim() != image.dim() {
        return Err(InpaintError::processing_stage_error(
            "compositing",
            "model output and image tensors differ in shape",
            Some(&format!("{:?} vs {:?}", output.shape(), image.shape())),
        ));
    }
    if mask.dim() != (1, 1, height, width) {
        return Err(InpaintError::processing_stage_error(
            "compositing",
            "mask tensor must be [1, 1, H, W] matching the image",
            Some(&format!("{:?}", mask.shape())),
        ));
    }

    let mask = mask
        .broadcast(image.raw_dim())
        .ok_or_else(|| InpaintError::internal("mask could not be broadcast over channels"))?;

    let mut merged = Array4::<f32>::zeros(image.raw_dim());
    Zip::from(&mut merged)
        .and(output)
        .and(image)
        .and(&mask)
        .for_each(|dst, &out, &src, &m| {
            *dst = out * m + src * (1.0 - m);
        });
    Ok(merged)
}

/// Convert a `[1, 3, H, W]` tensor in `[0, 1]` to an RGB raster
///
/// Values are clamped, scaled to 0-255 and rounded, so a tensor produced from
/// 8-bit data converts back to exactly the same pixels.
///
/// # Errors
/// - Tensor is not `[1, 3, H, W]`
pub fn tensor_to_rgb(tensor: &Array4<f32>) -> Result<RgbImage> {
    let (batch, channels, height, width) = tensor.dim();
    if batch != 1 || channels != 3 {
        return Err(InpaintError::processing(format!(
            "Expected a [1, 3, H, W] tensor, got [{batch}, {channels}, {height}, {width}]"
        )));
    }

    let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    let mut image = RgbImage::new(width as u32, height as u32);

    #[allow(clippy::indexing_slicing)]
    // Safe: image allocated from the tensor's own height and width
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        *pixel = Rgb([
            to_u8(tensor[[0, 0, y, x]]),
            to_u8(tensor[[0, 1, y, x]]),
            to_u8(tensor[[0, 2, y, x]]),
        ]);
    }

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ImagePreprocessor;

    fn checker(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 37 % 256) as u8, (y * 91 % 256) as u8, ((x + y) * 13 % 256) as u8])
        })
    }

    #[test]
    fn test_composite_keeps_unmasked_pixels() {
        let original = checker(16, 12);
        let image = ImagePreprocessor::rgb_to_tensor(&original);
        let output = Array4::<f32>::from_elem((1, 3, 12, 16), 0.25);
        let mut mask = Array4::<f32>::zeros((1, 1, 12, 16));
        for y in 0..12 {
            for x in 8..16 {
                mask[[0, 0, y, x]] = 1.0;
            }
        }

        let merged = composite(&output, &image, &mask).unwrap();
        let result = tensor_to_rgb(&merged).unwrap();

        for (x, y, pixel) in result.enumerate_pixels() {
            if x < 8 {
                assert_eq!(pixel, original.get_pixel(x, y), "pixel ({x}, {y}) changed");
            } else {
                assert_eq!(pixel.0, [64, 64, 64]);
            }
        }
    }

    #[test]
    fn test_composite_all_zero_mask_is_identity() {
        let original = checker(9, 7);
        let image = ImagePreprocessor::rgb_to_tensor(&original);
        let output = Array4::<f32>::from_elem((1, 3, 7, 9), 0.9);
        let mask = Array4::<f32>::zeros((1, 1, 7, 9));

        let merged = composite(&output, &image, &mask).unwrap();
        assert_eq!(tensor_to_rgb(&merged).unwrap(), original);
    }

    #[test]
    fn test_composite_shape_errors() {
        let image = Array4::<f32>::zeros((1, 3, 4, 4));
        let mask = Array4::<f32>::zeros((1, 1, 4, 4));

        let small_output = Array4::<f32>::zeros((1, 3, 2, 2));
        assert!(composite(&small_output, &image, &mask).is_err());

        let wrong_mask = Array4::<f32>::zeros((1, 1, 4, 3));
        assert!(composite(&image, &image, &wrong_mask).is_err());

        let gray = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(composite(&gray, &gray, &mask).is_err());
    }

    #[test]
    fn test_tensor_to_rgb_clamps_and_rounds() {
        let mut tensor = Array4::<f32>::zeros((1, 3, 1, 2));
        tensor[[0, 0, 0, 0]] = -0.5;
        tensor[[0, 1, 0, 0]] = 1.5;
        tensor[[0, 2, 0, 0]] = 0.5;
        tensor[[0, 0, 0, 1]] = 0.998;

        let image = tensor_to_rgb(&tensor).unwrap();
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [0, 255, 128]);
        assert_eq!(image.get_pixel(1, 0).0, [254, 0, 0]);

        assert!(tensor_to_rgb(&Array4::<f32>::zeros((1, 1, 2, 2))).is_err());
    }
}
