//! Shared image preprocessing utilities
//!
//! Turns an uploaded photograph and a drawn mask into the four aligned rasters
//! the models consume (RGB image, grayscale, Canny edges, binary mask) and then
//! into NCHW tensors.

use crate::{
    error::{InpaintError, Result},
    utils::{
        edges::{canny, CannyOptions},
        validation::TensorValidator,
    },
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::contrast::{self, ThresholdType};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// How the uploaded image is resized before inference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Always resize to an exact size
    Fixed { width: u32, height: u32 },
    /// Round each side up to the next multiple, keeping the aspect ratio close
    MultipleOf { multiple: u32 },
}

impl Default for ResizePolicy {
    fn default() -> Self {
        Self::Fixed {
            width: 512,
            height: 512,
        }
    }
}

impl ResizePolicy {
    /// Dimensions the models will see for an image of `(width, height)`
    #[must_use]
    pub fn target_for(&self, (width, height): (u32, u32)) -> (u32, u32) {
        match *self {
            Self::Fixed { width, height } => (width, height),
            Self::MultipleOf { multiple } => {
                let multiple = multiple.max(1);
                (
                    width.div_ceil(multiple) * multiple,
                    height.div_ceil(multiple) * multiple,
                )
            },
        }
    }
}

/// Configuration for preprocessing behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingOptions {
    /// Size the models run at
    pub resize_policy: ResizePolicy,
    /// Resize the composited result back to the upload's dimensions
    pub restore_original_size: bool,
    /// Mask gray values strictly above this become 255, everything else 0
    pub mask_threshold: u8,
    /// Edge detector parameters
    pub canny: CannyOptions,
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            resize_policy: ResizePolicy::default(),
            restore_original_size: true,
            mask_threshold: 127,
            canny: CannyOptions::default(),
        }
    }
}

/// The four rasters fed to the models, guaranteed to share one size
#[derive(Debug, Clone)]
pub struct PreparedInputs {
    image: RgbImage,
    gray: GrayImage,
    edges: GrayImage,
    mask: GrayImage,
    original_size: (u32, u32),
}

impl PreparedInputs {
    /// Bundle aligned rasters
    ///
    /// # Errors
    /// - `DimensionMismatch` if gray, edges or mask differ in size from the image
    pub fn new(
        image: RgbImage,
        gray: GrayImage,
        edges: GrayImage,
        mask: GrayImage,
        original_size: (u32, u32),
    ) -> Result<Self> {
        let dims = image.dimensions();
        for (name, other) in [
            ("gray", gray.dimensions()),
            ("edges", edges.dimensions()),
            ("mask", mask.dimensions()),
        ] {
            if other != dims {
                return Err(InpaintError::dimension_mismatch("image", dims, name, other));
            }
        }

        Ok(Self {
            image,
            gray,
            edges,
            mask,
            original_size,
        })
    }

    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    #[must_use]
    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    #[must_use]
    pub fn edges(&self) -> &GrayImage {
        &self.edges
    }

    #[must_use]
    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Size of the upload before alignment
    #[must_use]
    pub fn original_size(&self) -> (u32, u32) {
        self.original_size
    }

    /// Size of every prepared raster
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Convert to model tensors
    #[must_use]
    pub fn to_tensors(&self) -> ModelTensors {
        ModelTensors {
            image: ImagePreprocessor::rgb_to_tensor(&self.image),
            gray: ImagePreprocessor::gray_to_tensor(&self.gray),
            edges: ImagePreprocessor::binary_to_tensor(&self.edges),
            mask: ImagePreprocessor::binary_to_tensor(&self.mask),
        }
    }
}

/// NCHW tensors (N = 1) for one request
#[derive(Debug, Clone)]
pub struct ModelTensors {
    /// 3 channels in `[0, 1]`
    pub image: Array4<f32>,
    /// 1 channel in `[0, 1]`
    pub gray: Array4<f32>,
    /// 1 channel in `{0, 1}`
    pub edges: Array4<f32>,
    /// 1 channel in `{0, 1}`, 1 marks pixels to fill
    pub mask: Array4<f32>,
}

/// Shared image preprocessing utilities
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Run the whole preparation step for one request
    ///
    /// This function handles:
    /// - RGB conversion of both inputs (alpha dropped)
    /// - Resizing the image per `options.resize_policy`
    /// - Resizing the mask to the aligned image size and binarizing it
    /// - Grayscale conversion and Canny edge extraction
    ///
    /// # Errors
    /// - Upload dimensions outside 1..=16384
    /// - Resize target outside 1..=16384
    pub fn prepare(
        image: &DynamicImage,
        mask: &DynamicImage,
        options: &PreprocessingOptions,
    ) -> Result<PreparedInputs> {
        let rgb = Self::to_rgb(image);
        let original_size = rgb.dimensions();
        TensorValidator::validate_image_dimensions(original_size.0, original_size.1)?;

        let (target_w, target_h) = options.resize_policy.target_for(original_size);
        TensorValidator::validate_image_dimensions(target_w, target_h)?;

        let resized = Self::resize_rgb(&rgb, target_w, target_h);
        let gray = Self::rgb_to_gray(&resized);
        let edges = canny(&gray, &options.canny);
        let mask = Self::prepare_mask(mask, (target_w, target_h), options.mask_threshold)?;

        PreparedInputs::new(resized, gray, edges, mask, original_size)
    }

    /// Convert any decoded image to 8-bit RGB
    ///
    /// Grayscale is replicated across channels; alpha is discarded without blending.
    #[must_use]
    pub fn to_rgb(image: &DynamicImage) -> RgbImage {
        image.to_rgb8()
    }

    /// BT.601 luma with integer rounding
    #[must_use]
    pub fn rgb_to_gray(image: &RgbImage) -> GrayImage {
        let (width, height) = image.dimensions();
        let mut gray = GrayImage::new(width, height);
        for (dst, src) in gray.pixels_mut().zip(image.pixels()) {
            let [r, g, b] = src.0;
            let luma = (299 * u32::from(r) + 587 * u32::from(g) + 114 * u32::from(b) + 500) / 1000;
            *dst = Luma([luma.min(255) as u8]);
        }
        gray
    }

    /// Bilinear resize; a request for the current size returns an exact copy
    #[must_use]
    pub fn resize_rgb(image: &RgbImage, width: u32, height: u32) -> RgbImage {
        if image.dimensions() == (width, height) {
            return image.clone();
        }
        image::imageops::resize(image, width, height, FilterType::Triangle)
    }

    /// Values strictly above `threshold` become 255, the rest 0
    #[must_use]
    pub fn binarize_mask(mask: &GrayImage, threshold: u8) -> GrayImage {
        contrast::threshold(mask, threshold, ThresholdType::Binary)
    }

    /// Align a drawn mask with the prepared image and binarize it
    ///
    /// # Errors
    /// - Mask dimensions outside 1..=16384
    pub fn prepare_mask(
        mask: &DynamicImage,
        (width, height): (u32, u32),
        threshold: u8,
    ) -> Result<GrayImage> {
        let rgb = Self::to_rgb(mask);
        let (mask_w, mask_h) = rgb.dimensions();
        TensorValidator::validate_image_dimensions(mask_w, mask_h)?;

        let resized = Self::resize_rgb(&rgb, width, height);
        Ok(Self::binarize_mask(&Self::rgb_to_gray(&resized), threshold))
    }

    /// RGB raster to a `[1, 3, H, W]` tensor in `[0, 1]`
    #[must_use]
    pub fn rgb_to_tensor(image: &RgbImage) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match the image
        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            tensor[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            tensor[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }

        tensor
    }

    /// Grayscale raster to a `[1, 1, H, W]` tensor in `[0, 1]`
    #[must_use]
    pub fn gray_to_tensor(image: &GrayImage) -> Array4<f32> {
        Self::single_channel_tensor(image, |v| f32::from(v) / 255.0)
    }

    /// Binary raster (0/255) to a `[1, 1, H, W]` tensor of exact 0.0/1.0
    #[must_use]
    pub fn binary_to_tensor(image: &GrayImage) -> Array4<f32> {
        Self::single_channel_tensor(image, |v| if v > 127 { 1.0 } else { 0.0 })
    }

    /// Single-channel tensor back to a grayscale raster (clamped, rounded)
    ///
    /// # Errors
    /// - Tensor is not `[1, 1, H, W]`
    pub fn tensor_to_gray(tensor: &Array4<f32>) -> Result<GrayImage> {
        let (batch, channels, height, width) = tensor.dim();
        if batch != 1 || channels != 1 {
            return Err(InpaintError::processing(format!(
                "Expected a [1, 1, H, W] tensor, got [{batch}, {channels}, {height}, {width}]"
            )));
        }

        let mut gray = GrayImage::new(width as u32, height as u32);
        #[allow(clippy::indexing_slicing)]
        // Safe: image allocated from the tensor's own height and width
        for (x, y, pixel) in gray.enumerate_pixels_mut() {
            let value = tensor[[0, 0, y as usize, x as usize]];
            *pixel = Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8]);
        }
        Ok(gray)
    }

    fn single_channel_tensor(image: &GrayImage, convert: impl Fn(u8) -> f32) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 1, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match the image
        for (x, y, pixel) in image.enumerate_pixels() {
            tensor[[0, 0, y as usize, x as usize]] = convert(pixel[0]);
        }

        tensor
    }
}
